//! SKIFF VM
//!
//! A small stack-machine interpreter that implements the [`skiff_core::Engine`]
//! capability: it can be paused at any instruction boundary, unwound into a
//! [`skiff_core::Snapshot`], and resumed from that snapshot in another process.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod instruction;
pub mod interpreter;
pub mod module;
pub mod programs;

pub use instruction::Instruction;
pub use interpreter::{EngineConfig, Interpreter, Trap};
pub use module::{Function, Module, ModuleError};
pub use programs::{Program, ProgramCatalog};

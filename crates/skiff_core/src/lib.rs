//! SKIFF Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Everything that crosses a process boundary is serializable with a
//! stable, cross-platform encoding.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod frame;
pub mod id;
pub mod outcome;
pub mod resume;
pub mod signal;
pub mod snapshot;

// Re-exports
pub use engine::Engine;
pub use error::{CoreError, CoreResult};
pub use frame::{CallFrame, FunctionIndex, Word};
pub use id::SessionId;
pub use outcome::{Fault, Outcome};
pub use resume::{ResumeError, ResumePlan};
pub use signal::BreakpointSignal;
pub use snapshot::Snapshot;

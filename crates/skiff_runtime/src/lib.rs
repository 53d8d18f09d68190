//! SKIFF Runtime
//!
//! Decides when a computation pauses and what happens to the snapshot:
//! the breakpoint controller applies a trigger policy to each run, and the
//! coordinator persists, transmits, or resumes the captured state.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod controller;
pub mod coordinator;
pub mod keys;
pub mod session;

pub use config::{Mode, RunConfig, RunOptions};
pub use controller::{BreakpointController, TriggerGuard, TriggerPolicy, TriggerSelection};
pub use coordinator::{Coordinator, Exit};
pub use keys::{KeyAction, KeyCombo, KeyListener, KeyMap};
pub use session::{MigrationSession, MigrationState};

//! Capability interface of an execution engine.
//!
//! Callers depend only on this trait, never on a concrete engine type.

use crate::frame::{FunctionIndex, Word};
use crate::outcome::Outcome;
use crate::snapshot::Snapshot;

/// An engine that can start a function or re-enter a paused one.
///
/// Implementations consult their [`crate::BreakpointSignal`] at every
/// instruction boundary. When it fires they stop before the current
/// instruction and return [`Outcome::Paused`] instead of results.
pub trait Engine: Send + Sync {
    /// Invoke `entry` with `args` from its first instruction
    fn call(&self, entry: FunctionIndex, args: &[Word]) -> Outcome;

    /// Re-enter a paused computation.
    ///
    /// The snapshot is consumed. Frames are replayed innermost first and each
    /// return hands control to the next frame as an ordinary return would.
    fn resume(&self, snapshot: Snapshot) -> Outcome;

    /// Number of functions in the loaded module
    fn function_count(&self) -> usize;
}

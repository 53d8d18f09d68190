//! Outcome of one execution attempt.

use crate::error::CoreError;
use crate::frame::Word;
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An execution fault raised by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Human-readable description, including the faulting location
    pub reason: String,
}

impl Fault {
    /// Create a new fault
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl From<Fault> for CoreError {
    fn from(fault: Fault) -> Self {
        CoreError::EngineFault {
            reason: fault.reason,
        }
    }
}

/// Tri-state result of `call` or `resume`.
///
/// `Paused` is an ordinary outcome routed to the migration path. It is not
/// a fault and must never be handled like one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The invoked function returned
    Completed(Vec<Word>),
    /// The trigger fired; the stack was unwound into a snapshot
    Paused(Snapshot),
    /// The engine trapped
    Faulted(Fault),
}

impl Outcome {
    /// Check if the run completed
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Check if the run paused
    #[must_use]
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused(_))
    }

    /// Short label for logs
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Paused(_) => "paused",
            Self::Faulted(_) => "faulted",
        }
    }

    /// Take the results of a completed run
    #[must_use]
    pub fn into_results(self) -> Option<Vec<Word>> {
        match self {
            Self::Completed(results) => Some(results),
            _ => None,
        }
    }

    /// Take the snapshot of a paused run
    #[must_use]
    pub fn into_snapshot(self) -> Option<Snapshot> {
        match self {
            Self::Paused(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

//! Resume reconstruction contract.
//!
//! An engine never rebuilds its call stack straight from untrusted bytes.
//! It first turns the snapshot into a [`ResumePlan`], which checks that the
//! frames fit the loaded module, then walks the plan outermost first.

use crate::error::CoreError;
use crate::frame::{CallFrame, FunctionIndex};
use crate::outcome::Fault;
use crate::snapshot::Snapshot;

/// Reasons a snapshot cannot be resumed against a module
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResumeError {
    /// The "start fresh" sentinel was passed to resume
    #[error("snapshot is not valid")]
    NotValid,

    /// A valid snapshot without frames
    #[error("snapshot has no frames")]
    Empty,

    /// A frame references a function the module does not have
    #[error("frame {position} references {function} but the module has {count} functions")]
    UnknownFunction {
        /// Position of the frame, innermost = 0
        position: usize,
        /// Referenced function
        function: FunctionIndex,
        /// Functions in the module
        count: usize,
    },

    /// The outermost frame is not the entry function
    #[error("outermost frame runs {found}, snapshot entry is {entry}")]
    EntryMismatch {
        /// Recorded entry function
        entry: FunctionIndex,
        /// Function of the outermost frame
        found: FunctionIndex,
    },
}

impl From<ResumeError> for Fault {
    fn from(err: ResumeError) -> Self {
        Fault::new(format!("cannot resume: {}", err))
    }
}

impl From<ResumeError> for CoreError {
    fn from(err: ResumeError) -> Self {
        CoreError::EngineFault {
            reason: format!("cannot resume: {}", err),
        }
    }
}

/// A validated snapshot, ready to be rebuilt into an engine's call stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePlan {
    frames: Vec<CallFrame>,
    entry: FunctionIndex,
}

impl ResumePlan {
    /// Validate `snapshot` against a module with `function_count` functions
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot is invalid, empty, references unknown
    /// functions, or its outermost frame is not the entry function
    pub fn new(snapshot: Snapshot, function_count: usize) -> Result<Self, ResumeError> {
        if !snapshot.valid {
            return Err(ResumeError::NotValid);
        }
        let outermost = snapshot.frames.last().ok_or(ResumeError::Empty)?;
        if outermost.function_index != snapshot.entry_function_index {
            return Err(ResumeError::EntryMismatch {
                entry: snapshot.entry_function_index,
                found: outermost.function_index,
            });
        }
        if let Some((position, frame)) = snapshot
            .frames
            .iter()
            .enumerate()
            .find(|(_, frame)| frame.function_index.as_usize() >= function_count)
        {
            return Err(ResumeError::UnknownFunction {
                position,
                function: frame.function_index,
                count: function_count,
            });
        }

        Ok(Self {
            frames: snapshot.frames,
            entry: snapshot.entry_function_index,
        })
    }

    /// Entry function of the paused computation
    #[must_use]
    pub fn entry(&self) -> FunctionIndex {
        self.entry
    }

    /// Number of frames to rebuild
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Frames in rebuild order: the entry frame first, the paused frame last
    pub fn outermost_first(self) -> impl Iterator<Item = CallFrame> {
        self.frames.into_iter().rev()
    }
}

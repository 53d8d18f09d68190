//! Call frames: the resumable portion of one function activation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine word. Arguments, locals, operands and results are all words.
pub type Word = i64;

/// Index into a module's function table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionIndex(pub u32);

impl FunctionIndex {
    /// Create a new function index
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get as usize for table lookups
    #[must_use]
    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FunctionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

impl From<u32> for FunctionIndex {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

/// One recorded activation record.
///
/// For the innermost frame `program_counter` is the instruction that has not
/// executed yet. For every caller it is the return offset, the instruction
/// right after the `call` that created the next frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallFrame {
    /// Instruction offset within the owning function's code
    pub program_counter: u32,
    /// Function the frame belongs to
    pub function_index: FunctionIndex,
    /// Local slots, parameters first
    pub locals: Vec<Word>,
    /// Frame-private operand stack, bottom first
    pub operands: Vec<Word>,
}

impl CallFrame {
    /// Create a frame with no locals and an empty operand stack
    #[must_use]
    pub fn new(function_index: FunctionIndex, program_counter: u32) -> Self {
        Self {
            program_counter,
            function_index,
            locals: Vec::new(),
            operands: Vec::new(),
        }
    }

    /// Set the local slots
    #[must_use]
    pub fn with_locals(mut self, locals: Vec<Word>) -> Self {
        self.locals = locals;
        self
    }

    /// Set the operand stack
    #[must_use]
    pub fn with_operands(mut self, operands: Vec<Word>) -> Self {
        self.operands = operands;
        self
    }
}

impl fmt::Display for CallFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fn {}@{}", self.function_index.0, self.program_counter)
    }
}

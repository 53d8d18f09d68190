//! Instruction set.

use skiff_core::{FunctionIndex, Word};
use serde::{Deserialize, Serialize};

/// One VM instruction.
///
/// Jump targets are absolute offsets into the owning function's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Do nothing
    Nop,
    /// Trap unconditionally
    Unreachable,
    /// Push a constant
    Const(Word),
    /// Push a local
    LocalGet(u32),
    /// Pop into a local
    LocalSet(u32),
    /// Copy the top of the stack into a local
    LocalTee(u32),
    /// Discard the top of the stack
    Drop,
    /// Wrapping addition
    Add,
    /// Wrapping subtraction
    Sub,
    /// Wrapping multiplication
    Mul,
    /// Signed division
    DivS,
    /// Signed remainder
    RemS,
    /// Push 1 if equal, else 0
    Eq,
    /// Push 1 if not equal, else 0
    Ne,
    /// Signed less-than
    LtS,
    /// Signed less-or-equal
    LeS,
    /// Signed greater-than
    GtS,
    /// Signed greater-or-equal
    GeS,
    /// Push 1 if the top of the stack is zero, else 0
    Eqz,
    /// Unconditional jump
    Jump(u32),
    /// Pop; jump if non-zero
    JumpIf(u32),
    /// Pop; jump if zero
    JumpIfNot(u32),
    /// Call a function; arguments are taken from the operand stack
    Call(FunctionIndex),
    /// Return the function's results from the top of the operand stack
    Return,
}

impl Instruction {
    /// Jump target, if this is a branch
    #[must_use]
    pub fn jump_target(&self) -> Option<u32> {
        match self {
            Self::Jump(t) | Self::JumpIf(t) | Self::JumpIfNot(t) => Some(*t),
            _ => None,
        }
    }

    /// Local slot accessed, if any
    #[must_use]
    pub fn local_index(&self) -> Option<u32> {
        match self {
            Self::LocalGet(i) | Self::LocalSet(i) | Self::LocalTee(i) => Some(*i),
            _ => None,
        }
    }

    /// Check if control never falls through to the next instruction
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Return | Self::Unreachable | Self::Jump(_))
    }
}

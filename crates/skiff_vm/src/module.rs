//! Modules and their validation.

use crate::instruction::Instruction;
use skiff_core::{CoreError, FunctionIndex};
use serde::{Deserialize, Serialize};

/// Module validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleError {
    /// Module has no functions
    #[error("Module has no functions")]
    Empty,

    /// Function body is empty
    #[error("Function {function} has an empty body")]
    EmptyBody {
        /// Function name
        function: String,
    },

    /// Function body can fall off its end
    #[error("Function {function} does not end in return or unreachable")]
    MissingTerminator {
        /// Function name
        function: String,
    },

    /// More parameters than local slots
    #[error("Function {function} declares {params} params but only {locals} locals")]
    ParamsExceedLocals {
        /// Function name
        function: String,
        /// Declared parameters
        params: u32,
        /// Declared local slots
        locals: u32,
    },

    /// Jump outside the body
    #[error("Function {function} jumps to {target} at pc {pc}, body has {len} instructions")]
    BadJump {
        /// Function name
        function: String,
        /// Offending instruction offset
        pc: usize,
        /// Jump target
        target: u32,
        /// Body length
        len: usize,
    },

    /// Call to a function that does not exist
    #[error("Function {function} calls unknown {callee} at pc {pc}")]
    BadCall {
        /// Function name
        function: String,
        /// Offending instruction offset
        pc: usize,
        /// Called function
        callee: FunctionIndex,
    },

    /// Local slot out of range
    #[error("Function {function} uses local {index} at pc {pc}, only {locals} declared")]
    BadLocal {
        /// Function name
        function: String,
        /// Offending instruction offset
        pc: usize,
        /// Local slot used
        index: u32,
        /// Declared local slots
        locals: u32,
    },

    /// Duplicate function name
    #[error("Duplicate function name: {0}")]
    DuplicateName(String),
}

impl From<ModuleError> for CoreError {
    fn from(err: ModuleError) -> Self {
        CoreError::Configuration {
            reason: err.to_string(),
        }
    }
}

/// A function definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Export name
    pub name: String,
    /// Number of parameters; they occupy the first local slots
    pub params: u32,
    /// Total local slots, parameters included
    pub locals: u32,
    /// Number of results left on the operand stack by `Return`
    pub results: u32,
    /// Function body
    pub code: Vec<Instruction>,
}

impl Function {
    /// Create a function with `params` parameters and one result
    #[must_use]
    pub fn new(name: impl Into<String>, params: u32, code: Vec<Instruction>) -> Self {
        Self {
            name: name.into(),
            params,
            locals: params,
            results: 1,
            code,
        }
    }

    /// Reserve extra local slots beyond the parameters
    #[must_use]
    pub fn with_extra_locals(mut self, extra: u32) -> Self {
        self.locals = self.params + extra;
        self
    }

    /// Set the result count
    #[must_use]
    pub fn with_results(mut self, results: u32) -> Self {
        self.results = results;
        self
    }

    fn validate(&self, function_count: usize) -> Result<(), ModuleError> {
        let name = || self.name.clone();
        let last = self.code.last().ok_or_else(|| ModuleError::EmptyBody { function: name() })?;
        if !last.is_terminator() {
            return Err(ModuleError::MissingTerminator { function: name() });
        }
        if self.params > self.locals {
            return Err(ModuleError::ParamsExceedLocals {
                function: name(),
                params: self.params,
                locals: self.locals,
            });
        }

        let len = self.code.len();
        for (pc, instruction) in self.code.iter().enumerate() {
            if let Some(target) = instruction.jump_target() {
                if target as usize >= len {
                    return Err(ModuleError::BadJump {
                        function: name(),
                        pc,
                        target,
                        len,
                    });
                }
            }
            if let Some(index) = instruction.local_index() {
                if index >= self.locals {
                    return Err(ModuleError::BadLocal {
                        function: name(),
                        pc,
                        index,
                        locals: self.locals,
                    });
                }
            }
            if let Instruction::Call(callee) = instruction {
                if callee.as_usize() >= function_count {
                    return Err(ModuleError::BadCall {
                        function: name(),
                        pc,
                        callee: *callee,
                    });
                }
            }
        }
        Ok(())
    }
}

/// A validated set of functions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    functions: Vec<Function>,
}

impl Module {
    /// Build and validate a module
    ///
    /// # Errors
    ///
    /// Returns error if any function is malformed or names collide
    pub fn new(functions: Vec<Function>) -> Result<Self, ModuleError> {
        if functions.is_empty() {
            return Err(ModuleError::Empty);
        }
        for (i, function) in functions.iter().enumerate() {
            if functions[..i].iter().any(|f| f.name == function.name) {
                return Err(ModuleError::DuplicateName(function.name.clone()));
            }
            function.validate(functions.len())?;
        }
        Ok(Self { functions })
    }

    /// Look up a function by index
    #[must_use]
    pub fn function(&self, index: FunctionIndex) -> Option<&Function> {
        self.functions.get(index.as_usize())
    }

    /// Resolve an exported function name
    #[must_use]
    pub fn export(&self, name: &str) -> Option<FunctionIndex> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FunctionIndex(i as u32))
    }

    /// Number of functions
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if the module has no functions (never true for a validated module)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

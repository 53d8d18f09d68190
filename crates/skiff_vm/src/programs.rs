//! Built-in programs.

use crate::instruction::Instruction;
use crate::module::{Function, Module, ModuleError};
use skiff_core::{CoreError, CoreResult, FunctionIndex, Word};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A runnable module with a designated entry function
#[derive(Debug, Clone)]
pub struct Program {
    name: String,
    description: String,
    module: Arc<Module>,
    entry: FunctionIndex,
    default_args: Vec<Word>,
}

impl Program {
    /// Create a program whose entry is the function exported as `name`
    ///
    /// # Errors
    ///
    /// Returns error if the module does not export `name`
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        module: Module,
        default_args: Vec<Word>,
    ) -> CoreResult<Self> {
        let name = name.into();
        let entry = module
            .export(&name)
            .ok_or_else(|| CoreError::config(format!("module does not export {name}")))?;
        Ok(Self {
            name,
            description: description.into(),
            module: Arc::new(module),
            entry,
            default_args,
        })
    }

    /// Program name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One-line description
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Shared module
    #[must_use]
    pub fn module(&self) -> Arc<Module> {
        Arc::clone(&self.module)
    }

    /// Entry function index
    #[must_use]
    pub fn entry(&self) -> FunctionIndex {
        self.entry
    }

    /// Number of entry parameters
    #[must_use]
    pub fn arity(&self) -> usize {
        self.module
            .function(self.entry)
            .map_or(0, |f| f.params as usize)
    }

    /// Arguments used when none are supplied
    #[must_use]
    pub fn default_args(&self) -> &[Word] {
        &self.default_args
    }

    /// Resolve the arguments for a run
    ///
    /// # Errors
    ///
    /// Returns error if explicit arguments do not match the entry arity
    pub fn resolve_args(&self, args: &[Word]) -> CoreResult<Vec<Word>> {
        if args.is_empty() {
            return Ok(self.default_args.clone());
        }
        if args.len() != self.arity() {
            return Err(CoreError::config(format!(
                "{} takes {} arguments, got {}",
                self.name,
                self.arity(),
                args.len()
            )));
        }
        Ok(args.to_vec())
    }
}

/// Named set of built-in programs
#[derive(Debug, Clone, Default)]
pub struct ProgramCatalog {
    programs: BTreeMap<String, Program>,
}

impl ProgramCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with `fib`, `sum` and `ackermann`
    ///
    /// # Errors
    ///
    /// Returns error if a built-in module fails validation
    pub fn builtin() -> CoreResult<Self> {
        let mut catalog = Self::new();
        catalog.register(Program::new(
            "fib",
            "naive recursive fibonacci",
            single("fib", 1, 0, fib_code())?,
            vec![9],
        )?);
        catalog.register(Program::new(
            "sum",
            "iterative sum of 1..=n",
            single("sum", 1, 2, sum_code())?,
            vec![100_000_000],
        )?);
        catalog.register(Program::new(
            "ackermann",
            "two-argument ackermann function",
            single("ackermann", 2, 0, ackermann_code())?,
            vec![2, 3],
        )?);
        Ok(catalog)
    }

    /// Add or replace a program
    pub fn register(&mut self, program: Program) {
        self.programs.insert(program.name.clone(), program);
    }

    /// Look up a program by name
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the known programs
    pub fn lookup(&self, name: &str) -> CoreResult<&Program> {
        self.programs.get(name).ok_or_else(|| {
            CoreError::config(format!(
                "unknown program {name:?}, expected one of: {}",
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    /// Iterate over program names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.programs.keys().map(String::as_str)
    }

    /// Iterate over programs in name order
    pub fn iter(&self) -> impl Iterator<Item = &Program> {
        self.programs.values()
    }
}

fn single(name: &str, params: u32, extra: u32, code: Vec<Instruction>) -> Result<Module, ModuleError> {
    Module::new(vec![Function::new(name, params, code).with_extra_locals(extra)])
}

const SELF: FunctionIndex = FunctionIndex(0);

/// fib(n) = n < 2 ? n : fib(n - 1) + fib(n - 2)
fn fib_code() -> Vec<Instruction> {
    use Instruction::*;

    vec![
        LocalGet(0),
        Const(2),
        LtS,
        JumpIfNot(6),
        LocalGet(0),
        Return,
        LocalGet(0),
        Const(1),
        Sub,
        Call(SELF),
        LocalGet(0),
        Const(2),
        Sub,
        Call(SELF),
        Add,
        Return,
    ]
}

/// locals: 0 = n, 1 = i, 2 = acc
fn sum_code() -> Vec<Instruction> {
    use Instruction::*;

    vec![
        Const(1),
        LocalSet(1),
        // loop head
        LocalGet(1),
        LocalGet(0),
        GtS,
        JumpIf(15),
        LocalGet(2),
        LocalGet(1),
        Add,
        LocalSet(2),
        LocalGet(1),
        Const(1),
        Add,
        LocalSet(1),
        Jump(2),
        // exit
        LocalGet(2),
        Return,
    ]
}

fn ackermann_code() -> Vec<Instruction> {
    use Instruction::*;

    vec![
        // m == 0 -> n + 1
        LocalGet(0),
        Eqz,
        JumpIfNot(7),
        LocalGet(1),
        Const(1),
        Add,
        Return,
        // n == 0 -> A(m - 1, 1)
        LocalGet(1),
        Eqz,
        JumpIfNot(16),
        LocalGet(0),
        Const(1),
        Sub,
        Const(1),
        Call(SELF),
        Return,
        // A(m - 1, A(m, n - 1))
        LocalGet(0),
        Const(1),
        Sub,
        LocalGet(0),
        LocalGet(1),
        Const(1),
        Sub,
        Call(SELF),
        Call(SELF),
        Return,
    ]
}

//! The interpreter loop.
//!
//! Each activation owns its locals and its own operand stack, so unwinding
//! into a snapshot is a walk over the frame stack and resuming is the same
//! walk in reverse. The breakpoint signal is consulted before every
//! instruction, except the one a resume re-enters at: that boundary was
//! already consumed by the capture.

use crate::instruction::Instruction;
use crate::module::{Function, Module};
use skiff_core::{
    BreakpointSignal, CallFrame, Engine, Fault, FunctionIndex, Outcome, ResumePlan, Snapshot, Word,
};
use std::fmt;
use std::sync::Arc;

/// Interpreter limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of live activations
    pub max_call_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 10_000,
        }
    }
}

/// Trap reasons that can occur during execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trap {
    /// `Unreachable` executed
    Unreachable,
    /// Division or remainder by zero
    DivisionByZero,
    /// `i64::MIN / -1`
    IntegerOverflow,
    /// Pop from an empty operand stack
    StackUnderflow,
    /// Too many nested calls
    CallDepthExceeded(usize),
    /// Wrong number of entry arguments
    ArgumentMismatch {
        /// Declared parameters
        expected: u32,
        /// Supplied arguments
        got: usize,
    },
    /// Function index outside the module
    UnknownFunction(FunctionIndex),
    /// Program counter outside the function body
    PcOutOfRange(usize),
    /// A restored frame does not match its function's layout
    CorruptFrame(String),
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trap::Unreachable => write!(f, "unreachable executed"),
            Trap::DivisionByZero => write!(f, "integer division by zero"),
            Trap::IntegerOverflow => write!(f, "integer overflow"),
            Trap::StackUnderflow => write!(f, "operand stack underflow"),
            Trap::CallDepthExceeded(limit) => write!(f, "call depth exceeded {limit}"),
            Trap::ArgumentMismatch { expected, got } => {
                write!(f, "expected {expected} arguments, got {got}")
            }
            Trap::UnknownFunction(index) => write!(f, "function {index} not found"),
            Trap::PcOutOfRange(pc) => write!(f, "pc {pc} outside function body"),
            Trap::CorruptFrame(reason) => write!(f, "corrupt frame: {reason}"),
        }
    }
}

impl std::error::Error for Trap {}

/// Live activation record
struct Frame {
    function: FunctionIndex,
    pc: usize,
    locals: Vec<Word>,
    operands: Vec<Word>,
}

impl Frame {
    fn enter(index: FunctionIndex, function: &Function, mut args: Vec<Word>) -> Self {
        args.resize(function.locals as usize, 0);
        Self {
            function: index,
            pc: 0,
            locals: args,
            operands: Vec::new(),
        }
    }

    fn pop(&mut self) -> Result<Word, Trap> {
        self.operands.pop().ok_or(Trap::StackUnderflow)
    }

    fn pop_pair(&mut self) -> Result<(Word, Word), Trap> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        Ok((lhs, rhs))
    }

    fn take_top(&mut self, count: usize) -> Result<Vec<Word>, Trap> {
        let len = self.operands.len();
        if len < count {
            return Err(Trap::StackUnderflow);
        }
        Ok(self.operands.split_off(len - count))
    }

    fn record(self) -> CallFrame {
        CallFrame::new(self.function, self.pc as u32)
            .with_locals(self.locals)
            .with_operands(self.operands)
    }
}

/// What the loop does after one instruction
enum Control {
    Next,
    Call(FunctionIndex),
    Return,
}

/// Where a trap happened
struct TrapSite {
    trap: Trap,
    function: FunctionIndex,
    pc: usize,
}

/// Resumable interpreter
pub struct Interpreter {
    module: Arc<Module>,
    signal: BreakpointSignal,
    config: EngineConfig,
}

impl Interpreter {
    /// Create an interpreter bound to a module and a breakpoint signal
    #[must_use]
    pub fn new(module: Arc<Module>, signal: BreakpointSignal) -> Self {
        Self {
            module,
            signal,
            config: EngineConfig::default(),
        }
    }

    /// Override the default limits
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Get the loaded module
    #[must_use]
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Get the breakpoint signal this interpreter consults
    #[must_use]
    pub fn signal(&self) -> &BreakpointSignal {
        &self.signal
    }

    fn function(&self, index: FunctionIndex) -> Result<&Function, Trap> {
        self.module.function(index).ok_or(Trap::UnknownFunction(index))
    }

    /// Turn a validated plan back into live frames, outermost first
    fn rebuild(&self, plan: ResumePlan) -> Result<Vec<Frame>, Trap> {
        let mut stack = Vec::with_capacity(plan.depth());
        for recorded in plan.outermost_first() {
            let function = self.function(recorded.function_index)?;
            if recorded.locals.len() != function.locals as usize {
                return Err(Trap::CorruptFrame(format!(
                    "{} has {} locals, frame carries {}",
                    function.name,
                    function.locals,
                    recorded.locals.len()
                )));
            }
            let pc = recorded.program_counter as usize;
            if pc >= function.code.len() {
                return Err(Trap::PcOutOfRange(pc));
            }
            stack.push(Frame {
                function: recorded.function_index,
                pc,
                locals: recorded.locals,
                operands: recorded.operands,
            });
        }
        if stack.len() > self.config.max_call_depth {
            return Err(Trap::CallDepthExceeded(self.config.max_call_depth));
        }
        Ok(stack)
    }

    /// Run until the stack empties, the signal fires, or a trap
    fn run(&self, mut stack: Vec<Frame>, entry: FunctionIndex, resumed: bool) -> Outcome {
        let mut check = !resumed;
        let mut steps: u64 = 0;

        loop {
            if check && !stack.is_empty() && self.signal.take() {
                tracing::debug!(depth = stack.len(), steps, "breakpoint observed, capturing");
                return capture(stack, entry);
            }
            check = true;

            let Some(frame) = stack.last_mut() else {
                return Outcome::Faulted(Fault::new("empty call stack"));
            };
            let site = (frame.function, frame.pc);
            let control = self
                .function(frame.function)
                .and_then(|function| {
                    let instruction = *function.code.get(frame.pc).ok_or(Trap::PcOutOfRange(frame.pc))?;
                    frame.pc += 1;
                    execute(frame, instruction)
                });
            steps += 1;

            let control = match control {
                Ok(control) => control,
                Err(trap) => {
                    return self.fault(TrapSite {
                        trap,
                        function: site.0,
                        pc: site.1,
                    })
                }
            };

            match control {
                Control::Next => {}
                Control::Call(callee) => {
                    if let Err(trap) = self.push_call(&mut stack, callee) {
                        return self.fault(TrapSite {
                            trap,
                            function: site.0,
                            pc: site.1,
                        });
                    }
                }
                Control::Return => match self.pop_return(&mut stack) {
                    Ok(Some(results)) => {
                        tracing::debug!(steps, "run completed");
                        return Outcome::Completed(results);
                    }
                    Ok(None) => {}
                    Err(trap) => {
                        return self.fault(TrapSite {
                            trap,
                            function: site.0,
                            pc: site.1,
                        })
                    }
                },
            }
        }
    }

    fn push_call(&self, stack: &mut Vec<Frame>, callee: FunctionIndex) -> Result<(), Trap> {
        if stack.len() >= self.config.max_call_depth {
            return Err(Trap::CallDepthExceeded(self.config.max_call_depth));
        }
        let function = self.function(callee)?;
        let caller = stack.last_mut().ok_or(Trap::StackUnderflow)?;
        let args = caller.take_top(function.params as usize)?;
        tracing::trace!(depth = stack.len() + 1, callee = %callee, "call");
        stack.push(Frame::enter(callee, function, args));
        Ok(())
    }

    /// Pop the returning frame. `Some(results)` when the entry frame returned.
    fn pop_return(&self, stack: &mut Vec<Frame>) -> Result<Option<Vec<Word>>, Trap> {
        let mut frame = stack.pop().ok_or(Trap::StackUnderflow)?;
        let results = self.function(frame.function)?.results as usize;
        let values = frame.take_top(results)?;
        tracing::trace!(depth = stack.len(), function = %frame.function, "return");
        match stack.last_mut() {
            Some(caller) => {
                caller.operands.extend(values);
                Ok(None)
            }
            None => Ok(Some(values)),
        }
    }

    fn fault(&self, site: TrapSite) -> Outcome {
        let name = self
            .module
            .function(site.function)
            .map_or_else(|| site.function.to_string(), |f| f.name.clone());
        tracing::debug!(function = %name, pc = site.pc, trap = %site.trap, "trap");
        Outcome::Faulted(Fault::new(format!("{} in {} at pc {}", site.trap, name, site.pc)))
    }
}

/// Execute one non-call, non-return instruction against the current frame
fn execute(frame: &mut Frame, instruction: Instruction) -> Result<Control, Trap> {
    use Instruction::*;

    match instruction {
        Nop => {}
        Unreachable => return Err(Trap::Unreachable),
        Const(value) => frame.operands.push(value),
        LocalGet(index) => frame.operands.push(frame.locals[index as usize]),
        LocalSet(index) => {
            let value = frame.pop()?;
            frame.locals[index as usize] = value;
        }
        LocalTee(index) => {
            let value = *frame.operands.last().ok_or(Trap::StackUnderflow)?;
            frame.locals[index as usize] = value;
        }
        Drop => {
            frame.pop()?;
        }
        Add => binary(frame, |a, b| Ok(a.wrapping_add(b)))?,
        Sub => binary(frame, |a, b| Ok(a.wrapping_sub(b)))?,
        Mul => binary(frame, |a, b| Ok(a.wrapping_mul(b)))?,
        DivS => binary(frame, |a, b| {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            a.checked_div(b).ok_or(Trap::IntegerOverflow)
        })?,
        RemS => binary(frame, |a, b| {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            a.checked_rem(b).ok_or(Trap::IntegerOverflow)
        })?,
        Eq => binary(frame, |a, b| Ok(Word::from(a == b)))?,
        Ne => binary(frame, |a, b| Ok(Word::from(a != b)))?,
        LtS => binary(frame, |a, b| Ok(Word::from(a < b)))?,
        LeS => binary(frame, |a, b| Ok(Word::from(a <= b)))?,
        GtS => binary(frame, |a, b| Ok(Word::from(a > b)))?,
        GeS => binary(frame, |a, b| Ok(Word::from(a >= b)))?,
        Eqz => {
            let value = frame.pop()?;
            frame.operands.push(Word::from(value == 0));
        }
        Jump(target) => frame.pc = target as usize,
        JumpIf(target) => {
            if frame.pop()? != 0 {
                frame.pc = target as usize;
            }
        }
        JumpIfNot(target) => {
            if frame.pop()? == 0 {
                frame.pc = target as usize;
            }
        }
        Call(callee) => return Ok(Control::Call(callee)),
        Return => return Ok(Control::Return),
    }
    Ok(Control::Next)
}

fn binary(frame: &mut Frame, op: impl FnOnce(Word, Word) -> Result<Word, Trap>) -> Result<(), Trap> {
    let (lhs, rhs) = frame.pop_pair()?;
    frame.operands.push(op(lhs, rhs)?);
    Ok(())
}

/// Unwind the live stack into a snapshot, innermost frame first
fn capture(stack: Vec<Frame>, entry: FunctionIndex) -> Outcome {
    let frames: Vec<CallFrame> = stack.into_iter().rev().map(Frame::record).collect();
    match Snapshot::capture(frames, entry) {
        Ok(snapshot) => Outcome::Paused(snapshot),
        Err(err) => Outcome::Faulted(Fault::new(err.to_string())),
    }
}

impl Engine for Interpreter {
    fn call(&self, entry: FunctionIndex, args: &[Word]) -> Outcome {
        let function = match self.function(entry) {
            Ok(function) => function,
            Err(trap) => return Outcome::Faulted(Fault::new(trap.to_string())),
        };
        if args.len() != function.params as usize {
            let trap = Trap::ArgumentMismatch {
                expected: function.params,
                got: args.len(),
            };
            return Outcome::Faulted(Fault::new(format!("{} calling {}", trap, function.name)));
        }
        tracing::trace!(depth = 1, callee = %entry, "call");
        let frame = Frame::enter(entry, function, args.to_vec());
        self.run(vec![frame], entry, false)
    }

    fn resume(&self, snapshot: Snapshot) -> Outcome {
        let plan = match ResumePlan::new(snapshot, self.module.len()) {
            Ok(plan) => plan,
            Err(err) => return Outcome::Faulted(err.into()),
        };
        let entry = plan.entry();
        match self.rebuild(plan) {
            Ok(stack) => {
                tracing::debug!(depth = stack.len(), "resuming");
                self.run(stack, entry, true)
            }
            Err(trap) => Outcome::Faulted(Fault::new(format!("cannot resume: {}", trap))),
        }
    }

    fn function_count(&self) -> usize {
        self.module.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::ProgramCatalog;
    use Instruction::*;

    fn interpreter(functions: Vec<Function>) -> Interpreter {
        Interpreter::new(Arc::new(Module::new(functions).unwrap()), BreakpointSignal::new())
    }

    fn fib() -> (Interpreter, FunctionIndex) {
        let program = ProgramCatalog::builtin().unwrap().lookup("fib").unwrap().clone();
        let entry = program.entry();
        (Interpreter::new(program.module(), BreakpointSignal::new()), entry)
    }

    /// Drive a paused computation to completion one resume at a time,
    /// arming before each resume so every step is a separate invocation.
    fn step_to_completion(engine: &Interpreter, mut snapshot: Snapshot) -> (Vec<Word>, usize) {
        let mut resumes = 0;
        loop {
            engine.signal().arm();
            resumes += 1;
            match engine.resume(snapshot) {
                Outcome::Paused(next) => snapshot = next,
                Outcome::Completed(results) => return (results, resumes),
                Outcome::Faulted(fault) => panic!("unexpected fault: {fault}"),
            }
        }
    }

    #[test]
    fn test_call_fib() {
        let (engine, entry) = fib();
        assert_eq!(engine.call(entry, &[9]), Outcome::Completed(vec![34]));
        assert_eq!(engine.call(entry, &[0]), Outcome::Completed(vec![0]));
        assert_eq!(engine.call(entry, &[1]), Outcome::Completed(vec![1]));
    }

    #[test]
    fn test_argument_mismatch() {
        let (engine, entry) = fib();
        let outcome = engine.call(entry, &[]);
        assert!(matches!(outcome, Outcome::Faulted(f) if f.reason.contains("expected 1 arguments")));
    }

    #[test]
    fn test_armed_before_call_captures_first_instruction() {
        let (engine, entry) = fib();
        engine.signal().arm();

        let snapshot = engine.call(entry, &[9]).into_snapshot().unwrap();
        assert!(snapshot.valid);
        assert_eq!(snapshot.depth(), 1);
        assert_eq!(snapshot.frames[0].program_counter, 0);
        assert_eq!(snapshot.frames[0].function_index, entry);
        assert_eq!(snapshot.frames[0].locals, vec![9]);
        assert!(!engine.signal().is_armed());
    }

    #[test]
    fn test_double_arm_single_capture() {
        let (engine, entry) = fib();
        engine.signal().arm();
        engine.signal().arm();

        let snapshot = engine.call(entry, &[9]).into_snapshot().unwrap();
        assert_eq!(engine.resume(snapshot), Outcome::Completed(vec![34]));
    }

    #[test]
    fn test_step_all_makes_one_instruction_of_progress() {
        let (engine, entry) = fib();
        engine.signal().arm();
        let first = engine.call(entry, &[2]).into_snapshot().unwrap();

        engine.signal().arm();
        let second = engine.resume(first.clone()).into_snapshot().unwrap();
        assert_eq!(second.frames[0].program_counter, first.frames[0].program_counter + 1);
    }

    #[test]
    fn test_transparency_at_every_instruction() {
        let (engine, entry) = fib();
        let expected = engine.call(entry, &[9]).into_results().unwrap();

        engine.signal().arm();
        let snapshot = engine.call(entry, &[9]).into_snapshot().unwrap();
        let (results, resumes) = step_to_completion(&engine, snapshot);

        assert_eq!(results, expected);
        assert!(resumes > 100);
    }

    #[test]
    fn test_transparency_after_serialization_each_step() {
        let (engine, entry) = fib();
        engine.signal().arm();
        let mut snapshot = engine.call(entry, &[6]).into_snapshot().unwrap();
        let mut max_depth = 0;

        let results = loop {
            let bytes = snapshot.encode().unwrap();
            let restored = Snapshot::decode(&bytes).unwrap();
            assert_eq!(restored, snapshot);
            max_depth = max_depth.max(restored.depth());

            engine.signal().arm();
            match engine.resume(restored) {
                Outcome::Paused(next) => snapshot = next,
                Outcome::Completed(results) => break results,
                Outcome::Faulted(fault) => panic!("unexpected fault: {fault}"),
            }
        };

        assert_eq!(results, vec![8]);
        assert!(max_depth > 3);
    }

    #[test]
    fn test_caller_frames_record_return_offset() {
        let engine = interpreter(vec![
            Function::new("main", 0, vec![Const(5), Call(FunctionIndex(1)), Const(1), Add, Return]),
            Function::new("inner", 1, vec![Nop, LocalGet(0), Return]),
        ]);

        // main: Const, Call -> inner pc 0. Arm once the callee is on top.
        engine.signal().arm();
        let mut snapshot = engine.call(FunctionIndex(0), &[]).into_snapshot().unwrap();
        for _ in 0..2 {
            engine.signal().arm();
            snapshot = engine.resume(snapshot).into_snapshot().unwrap();
        }

        assert_eq!(snapshot.depth(), 2);
        assert_eq!(snapshot.frames[0].function_index, FunctionIndex(1));
        assert_eq!(snapshot.frames[0].program_counter, 0);
        assert_eq!(snapshot.frames[0].locals, vec![5]);
        assert_eq!(snapshot.frames[1].function_index, FunctionIndex(0));
        assert_eq!(snapshot.frames[1].program_counter, 2);
        assert!(snapshot.frames[1].operands.is_empty());

        assert_eq!(engine.resume(snapshot), Outcome::Completed(vec![6]));
    }

    #[test]
    fn test_resume_invalid_snapshot_faults() {
        let (engine, _) = fib();
        let outcome = engine.resume(Snapshot::invalid());
        assert!(matches!(outcome, Outcome::Faulted(f) if f.reason.contains("not valid")));
    }

    #[test]
    fn test_resume_corrupt_locals_faults() {
        let (engine, entry) = fib();
        engine.signal().arm();
        let mut snapshot = engine.call(entry, &[4]).into_snapshot().unwrap();
        snapshot.frames[0].locals.push(1);
        let outcome = engine.resume(snapshot);
        assert!(matches!(outcome, Outcome::Faulted(f) if f.reason.contains("corrupt frame")));
    }

    #[test]
    fn test_resume_pc_out_of_range_faults() {
        let (engine, entry) = fib();
        engine.signal().arm();
        let mut snapshot = engine.call(entry, &[4]).into_snapshot().unwrap();
        snapshot.frames[0].program_counter = 10_000;
        assert!(matches!(engine.resume(snapshot), Outcome::Faulted(_)));
    }

    #[test]
    fn test_division_by_zero_is_fault_not_pause() {
        let engine = interpreter(vec![Function::new("f", 0, vec![Const(1), Const(0), DivS, Return])]);
        let outcome = engine.call(FunctionIndex(0), &[]);
        assert!(matches!(outcome, Outcome::Faulted(f) if f.reason.contains("division by zero") && f.reason.contains("pc 2")));
    }

    #[test]
    fn test_integer_overflow() {
        let engine = interpreter(vec![Function::new(
            "f",
            0,
            vec![Const(i64::MIN), Const(-1), DivS, Return],
        )]);
        assert!(matches!(engine.call(FunctionIndex(0), &[]), Outcome::Faulted(f) if f.reason.contains("overflow")));
    }

    #[test]
    fn test_unreachable() {
        let engine = interpreter(vec![Function::new("f", 0, vec![Unreachable])]);
        assert!(matches!(engine.call(FunctionIndex(0), &[]), Outcome::Faulted(f) if f.reason.contains("unreachable")));
    }

    #[test]
    fn test_stack_underflow() {
        let engine = interpreter(vec![Function::new("f", 0, vec![Add, Return])]);
        assert!(matches!(engine.call(FunctionIndex(0), &[]), Outcome::Faulted(f) if f.reason.contains("underflow")));
    }

    #[test]
    fn test_call_depth_limit() {
        let engine = interpreter(vec![Function::new("loop", 0, vec![Call(FunctionIndex(0)), Return])])
            .with_config(EngineConfig { max_call_depth: 64 });
        assert!(matches!(engine.call(FunctionIndex(0), &[]), Outcome::Faulted(f) if f.reason.contains("call depth")));
    }

    #[test]
    fn test_comparisons_and_branches() {
        // max(a, b)
        let engine = interpreter(vec![Function::new(
            "max",
            2,
            vec![LocalGet(0), LocalGet(1), GtS, JumpIfNot(5), LocalGet(0), Return],
        )
        .with_results(1)]);
        // b >= a jumps straight to Return with nothing on the stack
        assert_eq!(engine.call(FunctionIndex(0), &[7, 3]), Outcome::Completed(vec![7]));
        assert!(matches!(engine.call(FunctionIndex(0), &[3, 7]), Outcome::Faulted(_)));
    }

    #[test]
    fn test_local_tee_and_eqz() {
        let engine = interpreter(vec![Function::new(
            "f",
            0,
            vec![Const(0), LocalTee(0), Eqz, LocalGet(0), Add, Return],
        )
        .with_extra_locals(1)]);
        assert_eq!(engine.call(FunctionIndex(0), &[]), Outcome::Completed(vec![1]));
    }

    #[test]
    fn test_trap_display() {
        assert_eq!(Trap::DivisionByZero.to_string(), "integer division by zero");
        assert_eq!(
            Trap::ArgumentMismatch { expected: 2, got: 0 }.to_string(),
            "expected 2 arguments, got 0"
        );
    }
}

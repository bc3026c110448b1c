use tracing::{debug, instrument, trace};

use crate::bytecode::{FuncId, Function, Instruction, Slot};
use crate::lang::value::Value;
use crate::runtime::frame::Frame;
use crate::runtime::host::{ExecutionContext, Globals, HostRegistry};
use crate::runtime::runtime_error::RuntimeError;
use crate::runtime::stack::{CallStack, Cell, ValueStack};

/// Optional resource limits. The interpreter itself is unbounded; every limit
/// defaults to `None`.
#[derive(Debug, Clone, Default)]
pub struct InterpreterConfig {
    /// Maximum number of simultaneously active frames.
    pub max_call_depth: Option<usize>,
    /// Maximum value-stack length.
    pub max_stack_size: Option<usize>,
    /// Maximum number of executed instructions per interpretation.
    pub max_steps: Option<usize>,
}

/// What one instruction asks of the call stack.
enum Flow {
    /// Advance the current frame's pc by one.
    Next,
    /// Continue at this pc of the current frame.
    Jump(usize),
    /// Push a callee frame. The caller's pc stays on its `Call`.
    Enter(Frame),
    /// Pop the current frame with this result.
    Return(Value),
}

/// Register-machine interpreter.
///
/// Owns one value stack and one call stack; run several interpreters to run
/// code concurrently. Functions are shared read-only.
pub struct Interpreter<'h> {
    config: InterpreterConfig,
    stack: ValueStack,
    frames: CallStack,
    host: Option<&'h HostRegistry>,
    globals: Option<&'h Globals>,
    steps: usize,
}

impl Default for Interpreter<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'h> Interpreter<'h> {
    pub fn new() -> Self {
        Self::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        Self {
            config,
            stack: ValueStack::new(),
            frames: CallStack::new(),
            host: None,
            globals: None,
            steps: 0,
        }
    }

    /// Make `host`'s callbacks available to `Execute`.
    pub fn with_host(mut self, host: &'h HostRegistry) -> Self {
        self.host = Some(host);
        self
    }

    /// Expose `globals` to callbacks through their execution context.
    pub fn with_globals(mut self, globals: &'h Globals) -> Self {
        self.globals = Some(globals);
        self
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn stack(&self) -> &[Value] {
        self.stack.as_slice()
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn call_depth(&self) -> usize {
        self.frames.depth()
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.top().ok()
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.steps = 0;
    }

    /// Run `function` with `args` to its outermost `Return`.
    #[instrument(skip_all, fields(len = function.len(), args = args.len()))]
    pub fn interpret(&mut self, function: &Function, args: &[Value]) -> Result<Value, RuntimeError> {
        self.start(function, args)?;

        loop {
            if let Some(result) = self.step()? {
                debug!(steps = self.steps, %result, "finished");
                return Ok(result);
            }
        }
    }

    /// Discard any previous state and enter `function` at depth 1.
    pub fn start(&mut self, function: &Function, args: &[Value]) -> Result<(), RuntimeError> {
        self.reset();

        if args.len() != usize::from(function.arg_count()) {
            return Err(RuntimeError::ArgumentCount {
                expected: usize::from(function.arg_count()),
                found: args.len(),
            });
        }

        for &arg in args {
            self.stack.push(arg);
        }
        self.stack.grow(usize::from(function.num_locals()));
        self.check_stack_size()?;

        self.frames.push(Frame::new(0, function.clone(), 0)?);
        debug!(depth = 1, bottom = 0, "enter");
        Ok(())
    }

    /// Execute one instruction. Returns the program result once the outermost
    /// frame returns.
    pub fn step(&mut self) -> Result<Option<Value>, RuntimeError> {
        self.check_steps()?;

        let depth = self.frames.depth();
        let frame = self.frames.top()?;
        let op = frame.instruction()?;
        trace!(depth, pc = frame.pc(), op = %op.opcode(), "step");

        let flow = Step {
            frame,
            stack: &mut self.stack,
            config: &self.config,
            host: self.host,
            globals: self.globals,
            depth,
        }
        .run(op)?;

        match flow {
            Flow::Next => self.frames.top_mut()?.increment_pc()?,
            Flow::Jump(pc) => self.frames.top_mut()?.jump(pc)?,
            Flow::Enter(callee) => {
                let bottom = callee.bottom();
                self.frames.push(callee);
                debug!(depth = self.frames.depth(), bottom, "call");
            }
            Flow::Return(result) => return self.unwind(result),
        }

        Ok(None)
    }

    // Execution

    fn check_steps(&mut self) -> Result<(), RuntimeError> {
        self.steps += 1;

        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(RuntimeError::StepLimitExceeded(max));
            }
        }
        Ok(())
    }

    fn check_stack_size(&self) -> Result<(), RuntimeError> {
        check_stack_size(&self.config, &self.stack)
    }

    /// Pop the current frame. At depth 0 `result` is the program result;
    /// otherwise it lands in the `dest` of the caller's `Call`, which then
    /// moves past the call.
    fn unwind(&mut self, result: Value) -> Result<Option<Value>, RuntimeError> {
        let frame = self.frames.pop()?;
        self.stack.truncate(frame.bottom());

        if self.frames.depth() == 0 {
            return Ok(Some(result));
        }

        let caller = self.frames.top_mut()?;
        let dest = match caller.instruction()? {
            Instruction::Call { dest, .. } => *dest,
            _ => return Err(RuntimeError::NotACallSite { pc: caller.pc() }),
        };
        caller.set_value(&mut self.stack, usize::from(dest), result)?;
        caller.increment_pc()?;
        debug!(depth = self.frames.depth(), %result, "return");

        Ok(None)
    }
}

fn check_stack_size(config: &InterpreterConfig, stack: &ValueStack) -> Result<(), RuntimeError> {
    if let Some(max) = config.max_stack_size {
        if stack.len() > max {
            return Err(RuntimeError::StackLimitExceeded(max));
        }
    }
    Ok(())
}

/// One instruction's view of the interpreter: the running frame, borrowed,
/// and the state an instruction may touch.
struct Step<'a, 'h> {
    frame: &'a Frame,
    stack: &'a mut ValueStack,
    config: &'a InterpreterConfig,
    host: Option<&'h HostRegistry>,
    globals: Option<&'h Globals>,
    depth: usize,
}

impl Step<'_, '_> {
    fn run(mut self, op: &Instruction) -> Result<Flow, RuntimeError> {
        match op {
            Instruction::Allocate { dest }
            | Instruction::AllocateI32 { dest }
            | Instruction::AllocateDouble { dest } => {
                let cell = self.stack.allocate()?;
                check_stack_size(self.config, &*self.stack)?;
                self.set(*dest, cell.to_value())?;
            }

            Instruction::Store { x, y } => {
                let cell = self.cell_at(*x)?;
                let value = self.get(*y)?;
                self.stack.store(cell, value)?;
            }
            Instruction::StoreI32 { x, y } => {
                let cell = self.cell_at(*x)?;
                let value = Value::Int32(self.get_i32(*y)?);
                self.stack.store(cell, value)?;
            }
            Instruction::StoreDouble { x, y } => {
                let cell = self.cell_at(*x)?;
                let value = Value::Double(self.get_f64(*y)?);
                self.stack.store(cell, value)?;
            }

            Instruction::Load { dest, x } => {
                let cell = self.cell_at(*x)?;
                let value = self.stack.load(cell)?;
                self.set(*dest, value)?;
            }
            Instruction::LoadI32 { dest, x } => {
                let cell = self.cell_at(*x)?;
                let value = self.stack.load(cell)?;
                if !value.is_i32() {
                    return Err(RuntimeError::type_mismatch("int32", &value));
                }
                self.set(*dest, value)?;
            }
            Instruction::LoadDouble { dest, x } => {
                let cell = self.cell_at(*x)?;
                let value = self.stack.load(cell)?;
                if !value.is_double() {
                    return Err(RuntimeError::type_mismatch("double", &value));
                }
                self.set(*dest, value)?;
            }

            Instruction::EqI32 { dest, x, y } => {
                let a = self.get_i32(*x)?;
                let b = self.get_i32(*y)?;
                self.set(*dest, Value::Int32(i32::from(a == b)))?;
            }

            Instruction::Const { dest, value } => self.set(*dest, *value)?,
            Instruction::ConstI32 { dest, value } => self.set(*dest, Value::Int32(*value))?,
            Instruction::ConstDouble { dest, value } => self.set(*dest, Value::Double(*value))?,

            Instruction::ExtractI32 { dest, x } => {
                let value = self.get_i32(*x)?;
                self.set(*dest, Value::Int32(value))?;
            }
            Instruction::ExtractDouble { dest, x } => {
                let value = self.get_f64(*x)?;
                self.set(*dest, Value::Double(value))?;
            }

            Instruction::Jump { offset } => return Ok(Flow::Jump(usize::from(*offset))),
            Instruction::IfI32 { x, offset } => {
                if self.get_i32(*x)? != 0 {
                    return Ok(Flow::Jump(usize::from(*offset)));
                }
            }

            Instruction::AddI32 { dest, x, y } => {
                let a = self.get_i32(*x)?;
                let b = self.get_i32(*y)?;
                self.set(*dest, Value::Int32(a.wrapping_add(b)))?;
            }

            Instruction::Call { function, args, .. } => return self.call(*function, args),

            Instruction::Return { x } => return Ok(Flow::Return(self.get(*x)?)),

            Instruction::Execute { dest, callee, args } => {
                let result = self.execute_host(*callee, args)?;
                self.set(*dest, result)?;
            }
        }

        Ok(Flow::Next)
    }

    /// Build the frame for a call to `id`, a function of the running frame's
    /// module, and push its window.
    fn call(&mut self, id: FuncId, args: &[Slot]) -> Result<Flow, RuntimeError> {
        let function = self
            .frame
            .function()
            .callee(id)
            .ok_or(RuntimeError::UnknownFunction(id))?;

        let arg_count = usize::from(function.arg_count());
        if args.len() != arg_count {
            return Err(RuntimeError::ArgumentCount {
                expected: arg_count,
                found: args.len(),
            });
        }

        if let Some(max) = self.config.max_call_depth {
            if self.depth >= max {
                return Err(RuntimeError::CallDepthExceeded(max));
            }
        }

        // Arguments are absolute stack indices.
        let values = args
            .iter()
            .map(|&index| self.stack.get(usize::from(index)))
            .collect::<Result<Vec<_>, _>>()?;

        let bottom = self.stack.len();
        for value in values {
            self.stack.push(value);
        }
        self.stack.grow(usize::from(function.num_locals()));
        check_stack_size(self.config, &*self.stack)?;

        Ok(Flow::Enter(Frame::new(bottom, function, 0)?))
    }

    fn execute_host(&self, callee: Slot, args: &[Slot]) -> Result<Value, RuntimeError> {
        let target = self.get(callee)?;
        let id = target
            .as_native_callback()
            .ok_or_else(|| RuntimeError::type_mismatch("native callback", &target))?;
        let host = self
            .host
            .ok_or(RuntimeError::UnknownCallback(u64::from(id)))?;

        let values = args
            .iter()
            .map(|&slot| self.get(slot))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(callback = host.name(id).unwrap_or("?"), args = values.len(), "execute");
        host.invoke(id, &ExecutionContext::new(&values, self.globals))
    }

    // Slot access

    fn get(&self, slot: Slot) -> Result<Value, RuntimeError> {
        self.frame.value(&*self.stack, usize::from(slot))
    }

    fn set(&mut self, slot: Slot, value: Value) -> Result<(), RuntimeError> {
        self.frame.set_value(&mut *self.stack, usize::from(slot), value)
    }

    fn get_i32(&self, slot: Slot) -> Result<i32, RuntimeError> {
        let value = self.get(slot)?;
        value
            .as_i32()
            .ok_or_else(|| RuntimeError::type_mismatch("int32", &value))
    }

    fn get_f64(&self, slot: Slot) -> Result<f64, RuntimeError> {
        let value = self.get(slot)?;
        value
            .as_f64()
            .ok_or_else(|| RuntimeError::type_mismatch("double", &value))
    }

    fn cell_at(&self, slot: Slot) -> Result<Cell, RuntimeError> {
        self.stack.cell(self.get(slot)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Module;
    use crate::bytecode::Opcode;
    use crate::bytecode::dsl::{Assembler, define_dsl, locals_needed, read_dsl};
    use crate::bytecode::verify::verify_all;
    use crate::lang::value::Tag;

    // ============================================================
    // Test Helpers
    // ============================================================

    /// Define each `(name, dsl, arg_count)` in order in one module, sizing
    /// locals from the slots each body mentions, and return the last one
    /// verified.
    fn program(defs: &[(&str, &str, Slot)]) -> Function {
        let mut module = Module::new();
        let mut last = None;
        for &(name, dsl, arg_count) in defs {
            let id = define_dsl(&mut module, name, dsl, arg_count, None, None)
                .expect("assembly should succeed");
            last = Some(id);
        }
        let f = module
            .into_function(last.expect("at least one definition"))
            .unwrap();
        verify_all(&f).expect("verification should succeed");
        f
    }

    fn func(dsl: &str, arg_count: Slot) -> Function {
        program(&[("main", dsl, arg_count)])
    }

    /// Step `f` to completion, returning the result and the deepest call
    /// depth reached.
    fn run_tracking_depth(f: &Function, args: &[Value]) -> (Value, usize) {
        let mut vm = Interpreter::new();
        vm.start(f, args).unwrap();
        let mut max_depth = 0;
        loop {
            max_depth = max_depth.max(vm.call_depth());
            if let Some(v) = vm.step().unwrap() {
                return (v, max_depth);
            }
        }
    }

    fn run(f: &Function, args: &[Value]) -> Result<Value, RuntimeError> {
        Interpreter::new().interpret(f, args)
    }

    fn assert_result(dsl: &str, args: &[Value], expected: Value) {
        let f = func(dsl, args.len() as Slot);
        assert_eq!(run(&f, args), Ok(expected), "program: {}", dsl);
    }

    fn assert_type_error(dsl: &str, args: &[Value]) {
        let f = func(dsl, args.len() as Slot);
        match run(&f, args) {
            Err(RuntimeError::TypeMismatch { .. }) => {}
            other => panic!("expected type error for {}, got {:?}", dsl, other),
        }
    }

    // ============================================================
    // Const / Return
    // ============================================================

    #[test]
    fn test_const_return() {
        assert_result("Ci0,i8|R0", &[], Value::Int32(8));
    }

    #[test]
    fn test_const_return_ignores_args() {
        // Unverified on purpose: dest 0 is a parameter slot here.
        let code = read_dsl("Ci0,i8|R0", &Module::new()).unwrap();
        let f = Function::new(code, 2, 0);
        assert_eq!(
            run(&f, &[Value::Int32(1), Value::Double(2.0)]),
            Ok(Value::Int32(8))
        );
    }

    #[test]
    fn test_const_family() {
        assert_result("C0,T|R0", &[], Value::Boolean(true));
        assert_result("Cd0,d1.5|R0", &[], Value::Double(1.5));
        assert_result("R0", &[Value::Null], Value::Null);
    }

    #[test]
    fn test_return_argument() {
        let tagged = Value::Tagged(Tag::User(1), 77);
        assert_result("R0", &[tagged], tagged);
    }

    // ============================================================
    // Cells
    // ============================================================

    #[test]
    fn test_untyped_cell_round_trip_any_tag() {
        let values = [
            Value::Null,
            Value::Boolean(false),
            Value::Int32(-3),
            Value::Double(6.25),
            Value::Tagged(Tag::Code, 12),
        ];
        for v in values {
            assert_result("A1|S1,0|L2,1|R2", &[v], v);
        }
    }

    #[test]
    fn test_typed_cells() {
        assert_result("Ai1|Si1,0|Li2,1|R2", &[Value::Int32(5)], Value::Int32(5));
        assert_result("Ad1|Sd1,0|Ld2,1|R2", &[Value::Double(0.5)], Value::Double(0.5));

        assert_type_error("Ai1|Si1,0|Li2,1|R2", &[Value::Double(5.0)]);
        assert_type_error("Ad1|Sd1,0|Ld2,1|R2", &[Value::Int32(5)]);
        assert_type_error("A1|S1,0|Li2,1|R2", &[Value::Boolean(true)]);
        assert_type_error("A1|S1,0|Ld2,1|R2", &[Value::Null]);
    }

    #[test]
    fn test_allocate_writes_absolute_address() {
        // Window is [arg, addr]; the cell lands right after it.
        assert_result("A1|R1", &[Value::Null], Value::Int32(2));
    }

    #[test]
    fn test_unwritten_cell_is_undefined() {
        assert_result("A0|L1,0|R1", &[], Value::Undefined);
        assert_type_error("Ai0|Li1,0|R1", &[]);
    }

    #[test]
    fn test_store_through_non_address() {
        let f = func("S0,0|R0", 1);
        assert_eq!(
            run(&f, &[Value::Int32(50)]),
            Err(RuntimeError::InvalidCell { address: 50, len: 1 })
        );
        assert_type_error("S0,0|R0", &[Value::Double(1.0)]);
    }

    #[test]
    fn test_store_many_times() {
        assert_result(
            "A0|Ci1,i1|Ci2,i2|S0,1|S0,2|L3,0|R3",
            &[],
            Value::Int32(2),
        );
    }

    // ============================================================
    // Integers
    // ============================================================

    #[test]
    fn test_eq_i32() {
        let pairs = [
            (0, 0, 1),
            (7, 7, 1),
            (-1, -1, 1),
            (i32::MAX, i32::MAX, 1),
            (i32::MIN, i32::MIN, 1),
            (0, 1, 0),
            (1, -1, 0),
            (i32::MIN, i32::MAX, 0),
            (i32::MAX, i32::MAX - 1, 0),
        ];
        for (a, b, expected) in pairs {
            assert_result(
                "=i2,0,1|R2",
                &[Value::Int32(a), Value::Int32(b)],
                Value::Int32(expected),
            );
        }
    }

    #[test]
    fn test_eq_i32_type_error() {
        assert_type_error("=i2,0,1|R2", &[Value::Int32(1), Value::Double(1.0)]);
    }

    #[test]
    fn test_add_i32() {
        assert_result(
            "+i2,0,1|R2",
            &[Value::Int32(40), Value::Int32(2)],
            Value::Int32(42),
        );
        assert_result(
            "+i2,0,1|R2",
            &[Value::Int32(i32::MAX), Value::Int32(1)],
            Value::Int32(i32::MIN),
        );
        assert_type_error("+i2,0,1|R2", &[Value::Int32(1), Value::Null]);
    }

    #[test]
    fn test_extract() {
        assert_result("Ei1,0|R1", &[Value::Int32(3)], Value::Int32(3));
        assert_result("Ed1,0|R1", &[Value::Double(3.0)], Value::Double(3.0));
        assert_type_error("Ei1,0|R1", &[Value::Double(3.0)]);
        assert_type_error("Ed1,0|R1", &[Value::Int32(3)]);
    }

    // ============================================================
    // Control flow
    // ============================================================

    #[test]
    fn test_if_i32() {
        let dsl = "Ii0,3|Ci1,i99|R1|Ci2,i7|R2";
        assert_result(dsl, &[Value::Int32(0)], Value::Int32(99));
        assert_result(dsl, &[Value::Int32(1)], Value::Int32(7));
        assert_result(dsl, &[Value::Int32(-5)], Value::Int32(7));
        assert_type_error(dsl, &[Value::Boolean(true)]);
    }

    #[test]
    fn test_jump_skips() {
        assert_result("Ci0,i1|J3|Ci1,i2|R0", &[], Value::Int32(1));
    }

    #[test]
    fn test_loop_sums_with_cells() {
        let dsl = "A1|Ci2,i0|S1,2|A3|S3,0|Ci4,i-1|Ci5,i0|\
                   L6,3|=i7,6,5|Ii7,16|L8,1|+i9,8,6|S1,9|+i10,6,4|S3,10|J7|\
                   L11,1|R11";
        assert_result(dsl, &[Value::Int32(4)], Value::Int32(10));
        assert_result(dsl, &[Value::Int32(0)], Value::Int32(0));
        assert_result(dsl, &[Value::Int32(100)], Value::Int32(5050));
    }

    #[test]
    fn test_jump_out_of_range() {
        let f = func("J5|R0", 1);
        assert_eq!(
            run(&f, &[Value::Null]),
            Err(RuntimeError::PcOutOfRange { pc: 5, len: 2 })
        );
    }

    #[test]
    fn test_falling_off_the_end() {
        let f = func("Ci0,i1", 0);
        assert_eq!(run(&f, &[]), Err(RuntimeError::PcOutOfRange { pc: 1, len: 1 }));
    }

    #[test]
    fn test_empty_function() {
        let f = Function::new(Vec::<Instruction>::new(), 0, 0);
        assert_eq!(run(&f, &[]), Err(RuntimeError::PcOutOfRange { pc: 0, len: 0 }));
    }

    // ============================================================
    // Calls
    // ============================================================

    #[test]
    fn test_nested_call_adds_result() {
        let g = program(&[("h", "Ci0,i30|R0", 0), ("g", "Ci0,i12|()1,h|+i2,0,1|R2", 0)]);
        assert_eq!(run(&g, &[]), Ok(Value::Int32(42)));
    }

    #[test]
    fn test_call_restores_stack_length() {
        let g = program(&[("h", "Ci0,i30|R0", 0), ("g", "Ci0,i12|()1,h|+i2,0,1|R2", 0)]);

        let mut vm = Interpreter::new();
        vm.start(&g, &[]).unwrap();

        let mut before_call = None;
        let mut after_return = None;
        let mut max_depth = 0;
        let result = loop {
            let (depth, pc, opcode) = {
                let frame = vm.current_frame().unwrap();
                (vm.call_depth(), frame.pc(), frame.instruction().unwrap().opcode())
            };
            max_depth = max_depth.max(depth);
            if depth == 1 && opcode == Opcode::Call && before_call.is_none() {
                before_call = Some(vm.stack_len());
            }
            if depth == 1 && pc == 2 && after_return.is_none() {
                after_return = Some(vm.stack_len());
            }
            if let Some(v) = vm.step().unwrap() {
                break v;
            }
        };

        assert_eq!(result, Value::Int32(42));
        assert_eq!(max_depth, 2);
        assert_eq!(before_call, Some(3));
        assert_eq!(after_return, before_call);
        assert_eq!(vm.stack_len(), 0);
        assert_eq!(vm.call_depth(), 0);
    }

    #[test]
    fn test_return_advances_caller() {
        let g = program(&[("h", "Ci0,i1|R0", 0), ("g", "()0,h|R0", 0)]);

        let mut vm = Interpreter::new();
        vm.start(&g, &[]).unwrap();
        assert_eq!(vm.step(), Ok(None));
        assert_eq!(vm.call_depth(), 2);

        // The return writes the caller's dest and moves it past the call.
        vm.step().unwrap();
        vm.step().unwrap();
        assert_eq!(vm.call_depth(), 1);
        assert_eq!(vm.current_frame().map(Frame::pc), Some(1));
        assert_eq!(vm.stack(), &[Value::Int32(1)]);
    }

    #[test]
    fn test_call_args_are_absolute_indices() {
        // `middle` runs at depth 2 with bottom 3, so absolute index 0 is the
        // outermost frame's slot 0, not its own parameter.
        let outer = program(&[
            ("id", "R0", 1),
            ("middle", "Ci1,i6|()2,id,0|R2", 1),
            ("outer", "Ci0,i5|Ci1,i9|()2,middle,1|R2", 0),
        ]);
        assert_eq!(run(&outer, &[]), Ok(Value::Int32(5)));
    }

    #[test]
    fn test_call_arg_out_of_range() {
        let outer = program(&[("id", "R0", 1), ("outer", "()0,id,40|R0", 0)]);
        assert_eq!(
            run(&outer, &[]),
            Err(RuntimeError::IndexOutOfRange { index: 40, len: 1 })
        );
    }

    #[test]
    fn test_callee_stores_through_caller_cell() {
        let outer = program(&[
            ("writer", "Ci1,i42|S0,1|R1", 1),
            ("outer", "A0|Ci1,i0|S0,1|()2,writer,0|L3,0|R3", 0),
        ]);
        assert_eq!(run(&outer, &[]), Ok(Value::Int32(42)));
    }

    #[test]
    fn test_callee_cells_are_released() {
        // The callee's cell is gone once it returns; only the caller's window
        // is left.
        let outer = program(&[("leaf", "A0|Ci1,i3|S0,1|R0", 0), ("outer", "()0,leaf|L1,0|R1", 0)]);
        assert_eq!(
            run(&outer, &[]),
            Err(RuntimeError::InvalidCell { address: 4, len: 2 })
        );
    }

    #[test]
    fn test_call_argument_count_checked() {
        // Unverified: the call passes no arguments to a two-argument function.
        let mut module = Module::new();
        let two = module.add(vec![Instruction::Return { x: 0 }], 2, 0).unwrap();
        let bad = module
            .add(vec![Instruction::call(0, two, vec![]), Instruction::Return { x: 0 }], 0, 1)
            .unwrap();
        assert_eq!(
            run(&module.into_function(bad).unwrap(), &[]),
            Err(RuntimeError::ArgumentCount {
                expected: 2,
                found: 0
            })
        );
    }

    #[test]
    fn test_call_to_missing_function() {
        let f = Function::new(
            vec![Instruction::call(0, FuncId(3), vec![]), Instruction::Return { x: 0 }],
            0,
            1,
        );
        assert_eq!(run(&f, &[]), Err(RuntimeError::UnknownFunction(FuncId(3))));
    }

    #[test]
    fn test_call_to_undefined_function() {
        let mut module = Module::new();
        let later = module.declare("later", 0).unwrap();
        let main = module
            .add(vec![Instruction::call(0, later, vec![]), Instruction::Return { x: 0 }], 0, 1)
            .unwrap();
        assert_eq!(
            run(&module.into_function(main).unwrap(), &[]),
            Err(RuntimeError::PcOutOfRange { pc: 0, len: 0 })
        );
    }

    // ============================================================
    // Recursion
    // ============================================================

    /// `sum(c)` adds up the counter in cell `c` down to zero, decrementing
    /// it before each self-call. `main(n)` keeps the cell's address at
    /// absolute index 1, which every level passes on.
    const SUM_DOWN: &str = "L1,0|Ii1,3|R1|Ci2,i-1|+i3,1,2|S0,3|()4,sum,1|+i5,4,1|R5";
    const SUM_MAIN: &str = "A1|S1,0|()2,sum,1|R2";

    #[test]
    fn test_self_recursion() {
        let main = program(&[("sum", SUM_DOWN, 1), ("main", SUM_MAIN, 1)]);

        let (result, depth) = run_tracking_depth(&main, &[Value::Int32(5)]);
        assert_eq!(result, Value::Int32(15));
        assert_eq!(depth, 7);

        assert_eq!(run(&main, &[Value::Int32(0)]), Ok(Value::Int32(0)));
        assert_eq!(run(&main, &[Value::Int32(100)]), Ok(Value::Int32(5050)));
    }

    #[test]
    fn test_self_recursion_leaves_stack_empty() {
        let main = program(&[("sum", SUM_DOWN, 1), ("main", SUM_MAIN, 1)]);
        let mut vm = Interpreter::new();
        assert_eq!(vm.interpret(&main, &[Value::Int32(10)]), Ok(Value::Int32(55)));
        assert_eq!(vm.stack_len(), 0);
        assert_eq!(vm.call_depth(), 0);
    }

    #[test]
    fn test_recursion_hits_depth_limit() {
        let main = program(&[("sum", SUM_DOWN, 1), ("main", SUM_MAIN, 1)]);
        let config = InterpreterConfig {
            max_call_depth: Some(8),
            ..Default::default()
        };

        let mut vm = Interpreter::with_config(config);
        assert_eq!(vm.interpret(&main, &[Value::Int32(6)]), Ok(Value::Int32(21)));
        assert_eq!(
            vm.interpret(&main, &[Value::Int32(7)]),
            Err(RuntimeError::CallDepthExceeded(8))
        );
    }

    #[test]
    fn test_mutual_recursion() {
        // even/odd over a shared counter cell, each calling the other.
        let even_dsl = "L1,0|Ii1,4|Ci2,i1|R2|Ci3,i-1|+i4,1,3|S0,4|()5,odd,1|R5";
        let odd_dsl = "L1,0|Ii1,4|Ci2,i0|R2|Ci3,i-1|+i4,1,3|S0,4|()5,even,1|R5";

        let mut module = Module::new();
        let even = module.declare("even", 1).unwrap();
        let odd = module.declare("odd", 1).unwrap();
        let even_code = read_dsl(even_dsl, &module).unwrap();
        let odd_code = read_dsl(odd_dsl, &module).unwrap();
        let even_locals = locals_needed(&even_code, 1);
        let odd_locals = locals_needed(&odd_code, 1);
        module.define(even, even_code, even_locals).unwrap();
        module.define(odd, odd_code, odd_locals).unwrap();
        let main = define_dsl(&mut module, "main", "A1|S1,0|()2,even,1|R2", 1, None, None).unwrap();

        let main = module.into_function(main).unwrap();
        verify_all(&main).unwrap();

        let (result, depth) = run_tracking_depth(&main, &[Value::Int32(10)]);
        assert_eq!(result, Value::Int32(1));
        assert_eq!(depth, 12);
        assert_eq!(run(&main, &[Value::Int32(7)]), Ok(Value::Int32(0)));
        assert_eq!(run(&main, &[Value::Int32(0)]), Ok(Value::Int32(1)));
    }

    #[test]
    fn test_interpret_argument_count_checked() {
        let f = func("R0", 1);
        assert_eq!(
            run(&f, &[]),
            Err(RuntimeError::ArgumentCount {
                expected: 1,
                found: 0
            })
        );
    }

    // ============================================================
    // Host callbacks
    // ============================================================

    fn registry() -> HostRegistry {
        let mut host = HostRegistry::new();
        host.register("sum", |ctx| {
            Value::Int32(ctx.args().iter().filter_map(Value::as_i32).sum())
        })
        .unwrap();
        host.register("limit", |ctx| ctx.global("limit").unwrap_or(Value::Null))
            .unwrap();
        host
    }

    #[test]
    fn test_execute_callback() {
        let host = registry();
        let code = Assembler::new()
            .with_callbacks(&host)
            .assemble("C0,esum|Ci1,i2|Ci2,i3|X3,0,1,2|R3")
            .unwrap();
        let f = Function::new(code, 0, 4);

        let result = Interpreter::new().with_host(&host).interpret(&f, &[]);
        assert_eq!(result, Ok(Value::Int32(5)));
    }

    #[test]
    fn test_execute_sees_globals() {
        let host = registry();
        let mut globals = Globals::new();
        globals.insert("limit".to_string(), Value::Int32(64));

        let code = Assembler::new()
            .with_callbacks(&host)
            .assemble("C0,elimit|X1,0|R1")
            .unwrap();
        let f = Function::new(code, 0, 2);

        let result = Interpreter::new()
            .with_host(&host)
            .with_globals(&globals)
            .interpret(&f, &[]);
        assert_eq!(result, Ok(Value::Int32(64)));
    }

    #[test]
    fn test_execute_without_host() {
        let f = Function::new(
            vec![
                Instruction::Const {
                    dest: 0,
                    value: Value::native_callback(0),
                },
                Instruction::execute(1, 0, vec![]),
                Instruction::Return { x: 1 },
            ],
            0,
            2,
        );
        assert_eq!(run(&f, &[]), Err(RuntimeError::UnknownCallback(0)));
    }

    #[test]
    fn test_execute_non_callback() {
        assert_type_error("X1,0|R1", &[Value::Int32(0)]);
    }

    // ============================================================
    // Limits
    // ============================================================

    #[test]
    fn test_step_limit() {
        let f = func("J0", 0);
        let config = InterpreterConfig {
            max_steps: Some(100),
            ..Default::default()
        };
        assert_eq!(
            Interpreter::with_config(config).interpret(&f, &[]),
            Err(RuntimeError::StepLimitExceeded(100))
        );
    }

    #[test]
    fn test_stack_limit() {
        let f = func("A0|J0", 0);
        let config = InterpreterConfig {
            max_stack_size: Some(64),
            ..Default::default()
        };
        assert_eq!(
            Interpreter::with_config(config).interpret(&f, &[]),
            Err(RuntimeError::StackLimitExceeded(64))
        );
    }

    #[test]
    fn test_call_depth_limit() {
        let outer = program(&[
            ("id", "R0", 1),
            ("middle", "()1,id,0|R1", 1),
            ("outer", "Ci0,i1|()1,middle,0|R1", 0),
        ]);

        let config = InterpreterConfig {
            max_call_depth: Some(2),
            ..Default::default()
        };
        assert_eq!(
            Interpreter::with_config(config.clone()).interpret(&outer, &[]),
            Err(RuntimeError::CallDepthExceeded(2))
        );

        let config = InterpreterConfig {
            max_call_depth: Some(3),
            ..config
        };
        assert_eq!(
            Interpreter::with_config(config).interpret(&outer, &[]),
            Ok(Value::Int32(1))
        );
    }

    #[test]
    fn test_interpreter_is_reusable() {
        let f = func("+i2,0,1|R2", 2);
        let mut vm = Interpreter::new();
        assert_eq!(
            vm.interpret(&f, &[Value::Int32(1), Value::Int32(2)]),
            Ok(Value::Int32(3))
        );
        assert_eq!(
            vm.interpret(&f, &[Value::Int32(10), Value::Int32(20)]),
            Ok(Value::Int32(30))
        );
        assert_eq!(vm.step(), Err(RuntimeError::NoFrame));
    }
}

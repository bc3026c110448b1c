use crate::bytecode::{Function, Instruction};
use crate::lang::value::Value;
use crate::runtime::runtime_error::RuntimeError;
use crate::runtime::stack::ValueStack;

/// One activation of a [`Function`].
///
/// A frame owns no values: its slots are the value-stack cells starting at
/// `bottom`. Two frames are equal when they run the same function at the same
/// pc over the same window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bottom: usize,
    function: Function,
    pc: usize,
}

impl Frame {
    /// Create a frame whose slot window begins at `bottom`, about to execute
    /// instruction `pc` of `function`.
    ///
    /// `pc` must lie inside the function unless the function is empty.
    pub fn new(bottom: usize, function: Function, pc: usize) -> Result<Self, RuntimeError> {
        if !function.is_empty() && pc >= function.len() {
            return Err(RuntimeError::PcOutOfRange {
                pc,
                len: function.len(),
            });
        }
        Ok(Self {
            bottom,
            function,
            pc,
        })
    }

    pub fn bottom(&self) -> usize {
        self.bottom
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn instruction(&self) -> Result<&Instruction, RuntimeError> {
        self.function
            .instruction(self.pc)
            .ok_or(RuntimeError::PcOutOfRange {
                pc: self.pc,
                len: self.function.len(),
            })
    }

    /// Move to the next instruction. Running off the end of the function is
    /// an error: every path must end in `Return`.
    pub fn increment_pc(&mut self) -> Result<(), RuntimeError> {
        self.jump(self.pc + 1)
    }

    pub fn jump(&mut self, index: usize) -> Result<(), RuntimeError> {
        if index >= self.function.len() {
            return Err(RuntimeError::PcOutOfRange {
                pc: index,
                len: self.function.len(),
            });
        }
        self.pc = index;
        Ok(())
    }

    fn absolute(&self, stack: &ValueStack, index: usize) -> Result<usize, RuntimeError> {
        let absolute = self.bottom + index;
        if absolute >= stack.len() {
            return Err(RuntimeError::SlotOutOfRange {
                slot: index,
                bottom: self.bottom,
                len: stack.len(),
            });
        }
        Ok(absolute)
    }

    /// Read frame-relative slot `index`.
    pub fn value(&self, stack: &ValueStack, index: usize) -> Result<Value, RuntimeError> {
        stack.get(self.absolute(stack, index)?)
    }

    /// Write frame-relative slot `index`.
    pub fn set_value(
        &self,
        stack: &mut ValueStack,
        index: usize,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let absolute = self.absolute(stack, index)?;
        stack.set(absolute, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_ops() -> Function {
        Function::new(
            vec![
                Instruction::ConstI32 { dest: 0, value: 1 },
                Instruction::Jump { offset: 0 },
                Instruction::Return { x: 0 },
            ],
            0,
            1,
        )
    }

    #[test]
    fn test_new_checks_pc() {
        assert!(Frame::new(0, three_ops(), 2).is_ok());
        assert_eq!(
            Frame::new(0, three_ops(), 3),
            Err(RuntimeError::PcOutOfRange { pc: 3, len: 3 })
        );

        // An empty function has no range to check against.
        assert!(Frame::new(4, Function::new(Vec::<Instruction>::new(), 0, 0), 0).is_ok());
    }

    #[test]
    fn test_increment_and_jump() {
        let mut frame = Frame::new(0, three_ops(), 0).unwrap();
        frame.increment_pc().unwrap();
        assert_eq!(frame.pc(), 1);
        assert_eq!(frame.instruction(), Ok(&Instruction::Jump { offset: 0 }));

        frame.jump(0).unwrap();
        assert_eq!(frame.pc(), 0);
        assert!(frame.jump(3).is_err());

        frame.jump(2).unwrap();
        assert_eq!(
            frame.increment_pc(),
            Err(RuntimeError::PcOutOfRange { pc: 3, len: 3 })
        );
        assert_eq!(frame.pc(), 2);
    }

    #[test]
    fn test_slots_are_bottom_relative() {
        let mut stack = ValueStack::new();
        stack.grow(5);
        let frame = Frame::new(3, three_ops(), 0).unwrap();

        frame.set_value(&mut stack, 1, Value::Int32(9)).unwrap();
        assert_eq!(stack.get(4), Ok(Value::Int32(9)));
        assert_eq!(frame.value(&stack, 1), Ok(Value::Int32(9)));
        assert_eq!(frame.value(&stack, 0), Ok(Value::Undefined));
        assert_eq!(
            frame.value(&stack, 2),
            Err(RuntimeError::SlotOutOfRange {
                slot: 2,
                bottom: 3,
                len: 5
            })
        );
    }

    #[test]
    fn test_equality() {
        let f = three_ops();
        let a = Frame::new(1, f.clone(), 0).unwrap();
        assert_eq!(a, Frame::new(1, f.clone(), 0).unwrap());
        assert_ne!(a, Frame::new(2, f.clone(), 0).unwrap());
        assert_ne!(a, Frame::new(1, f, 1).unwrap());
        assert_ne!(a, Frame::new(1, three_ops(), 0).unwrap());
    }
}

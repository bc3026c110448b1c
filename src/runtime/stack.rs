//! Value stack and call stack.
//!
//! One growable array of values is shared by every frame of an
//! interpretation; a frame sees it through its `bottom` offset. Cells handed
//! out by `Allocate` are plain indices into the same array.

use crate::lang::value::Value;
use crate::runtime::frame::Frame;
use crate::runtime::runtime_error::RuntimeError;

/// Handle to a value-stack cell, checked against the stack when it was made.
///
/// Bytecode carries cells as `Int32` addresses; [`ValueStack::cell`] turns
/// such an address back into a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell(usize);

impl Cell {
    /// A handle for `address`, if bytecode can name it as an `Int32`.
    fn checked(address: usize) -> Result<Self, RuntimeError> {
        i32::try_from(address)
            .map(|_| Cell(address))
            .map_err(|_| RuntimeError::AddressSpaceExhausted(address))
    }

    pub fn address(self) -> usize {
        self.0
    }

    /// The `Int32` value bytecode uses to refer to this cell.
    pub fn to_value(self) -> Value {
        // `ValueStack::allocate` never hands out an index above `i32::MAX`.
        Value::Int32(self.0 as i32)
    }
}

#[derive(Debug, Default)]
pub struct ValueStack {
    values: Vec<Value>,
}

impl ValueStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Result<Value, RuntimeError> {
        self.values
            .get(index)
            .copied()
            .ok_or(RuntimeError::IndexOutOfRange {
                index,
                len: self.values.len(),
            })
    }

    pub fn set(&mut self, index: usize, value: Value) -> Result<(), RuntimeError> {
        let len = self.values.len();
        let cell = self
            .values
            .get_mut(index)
            .ok_or(RuntimeError::IndexOutOfRange { index, len })?;
        *cell = value;
        Ok(())
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Append `count` `Undefined` cells.
    pub fn grow(&mut self, count: usize) {
        self.values.resize(self.values.len() + count, Value::Undefined);
    }

    /// Drop every cell at or above `len`.
    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Append one `Undefined` cell and return its handle.
    pub fn allocate(&mut self) -> Result<Cell, RuntimeError> {
        let cell = Cell::checked(self.values.len())?;
        self.values.push(Value::Undefined);
        Ok(cell)
    }

    /// Recover the cell addressed by an `Int32` produced by `allocate`.
    pub fn cell(&self, address: Value) -> Result<Cell, RuntimeError> {
        let raw = address
            .as_i32()
            .ok_or_else(|| RuntimeError::type_mismatch("cell address", &address))?;
        usize::try_from(raw)
            .ok()
            .filter(|&index| index < self.values.len())
            .map(Cell)
            .ok_or(RuntimeError::InvalidCell {
                address: i64::from(raw),
                len: self.values.len(),
            })
    }

    pub fn load(&self, cell: Cell) -> Result<Value, RuntimeError> {
        self.get(cell.0)
    }

    pub fn store(&mut self, cell: Cell, value: Value) -> Result<(), RuntimeError> {
        self.set(cell.0, value)
    }
}

/// Stack of active frames. Depth 1 is the outermost invocation.
#[derive(Debug, Default)]
pub struct CallStack {
    frames: Vec<Frame>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Result<Frame, RuntimeError> {
        self.frames.pop().ok_or(RuntimeError::NoFrame)
    }

    pub fn top(&self) -> Result<&Frame, RuntimeError> {
        self.frames.last().ok_or(RuntimeError::NoFrame)
    }

    pub fn top_mut(&mut self) -> Result<&mut Frame, RuntimeError> {
        self.frames.last_mut().ok_or(RuntimeError::NoFrame)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

use serde::{Deserialize, Serialize};

use crate::bytecode::module::FuncId;
use crate::lang::value::Value;

/// Index of a value-stack cell. Frame-relative unless the operand says
/// otherwise.
pub type Slot = u16;

// =============================================================================
// OPCODE - discriminant of an instruction
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Allocate,
    AllocateI32,
    AllocateDouble,
    Store,
    StoreI32,
    StoreDouble,
    Load,
    LoadI32,
    LoadDouble,
    EqI32,
    Const,
    ConstI32,
    ConstDouble,
    ExtractI32,
    ExtractDouble,
    Jump,
    IfI32,
    AddI32,
    Call,
    Return,
    Execute,
}

impl Opcode {
    pub const ALL: [Opcode; 21] = [
        Opcode::Allocate,
        Opcode::AllocateI32,
        Opcode::AllocateDouble,
        Opcode::Store,
        Opcode::StoreI32,
        Opcode::StoreDouble,
        Opcode::Load,
        Opcode::LoadI32,
        Opcode::LoadDouble,
        Opcode::EqI32,
        Opcode::Const,
        Opcode::ConstI32,
        Opcode::ConstDouble,
        Opcode::ExtractI32,
        Opcode::ExtractDouble,
        Opcode::Jump,
        Opcode::IfI32,
        Opcode::AddI32,
        Opcode::Call,
        Opcode::Return,
        Opcode::Execute,
    ];

    /// Assembler prefix for this opcode.
    pub fn prefix(self) -> &'static str {
        match self {
            Opcode::Allocate => "A",
            Opcode::AllocateI32 => "Ai",
            Opcode::AllocateDouble => "Ad",
            Opcode::Store => "S",
            Opcode::StoreI32 => "Si",
            Opcode::StoreDouble => "Sd",
            Opcode::Load => "L",
            Opcode::LoadI32 => "Li",
            Opcode::LoadDouble => "Ld",
            Opcode::EqI32 => "=i",
            Opcode::Const => "C",
            Opcode::ConstI32 => "Ci",
            Opcode::ConstDouble => "Cd",
            Opcode::ExtractI32 => "Ei",
            Opcode::ExtractDouble => "Ed",
            Opcode::Jump => "J",
            Opcode::IfI32 => "Ii",
            Opcode::AddI32 => "+i",
            Opcode::Call => "()",
            Opcode::Return => "R",
            Opcode::Execute => "X",
        }
    }

    /// Upper-case mnemonic used by the disassembler.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Allocate => "ALLOC",
            Opcode::AllocateI32 => "ALLOC_I32",
            Opcode::AllocateDouble => "ALLOC_DBL",
            Opcode::Store => "STORE",
            Opcode::StoreI32 => "STORE_I32",
            Opcode::StoreDouble => "STORE_DBL",
            Opcode::Load => "LOAD",
            Opcode::LoadI32 => "LOAD_I32",
            Opcode::LoadDouble => "LOAD_DBL",
            Opcode::EqI32 => "EQ_I32",
            Opcode::Const => "CONST",
            Opcode::ConstI32 => "CONST_I32",
            Opcode::ConstDouble => "CONST_DBL",
            Opcode::ExtractI32 => "EXTRACT_I32",
            Opcode::ExtractDouble => "EXTRACT_DBL",
            Opcode::Jump => "JUMP",
            Opcode::IfI32 => "IF_I32",
            Opcode::AddI32 => "ADD_I32",
            Opcode::Call => "CALL",
            Opcode::Return => "RETURN",
            Opcode::Execute => "EXECUTE",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

// =============================================================================
// INSTRUCTION - one bytecode
// =============================================================================

/// A single Scramjet instruction.
///
/// Scramjet code is single-assignment: a slot may be the `dest` of at most one
/// instruction in a function, and the first `arg_count` slots (the
/// parameters) may never be a `dest`. The interpreter trusts this; see
/// [`verify`](crate::bytecode::verify).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// Append an `Undefined` cell to the value stack and write its absolute
    /// index into `dest`.
    Allocate { dest: Slot },
    AllocateI32 { dest: Slot },
    AllocateDouble { dest: Slot },

    /// Write `S[y]` into the cell whose address is held in `S[x]`.
    Store { x: Slot, y: Slot },
    StoreI32 { x: Slot, y: Slot },
    StoreDouble { x: Slot, y: Slot },

    /// Copy the cell whose address is held in `S[x]` into `dest`.
    Load { dest: Slot, x: Slot },
    LoadI32 { dest: Slot, x: Slot },
    LoadDouble { dest: Slot, x: Slot },

    /// `dest = 1` if the int32 values in `x` and `y` are equal, else `0`.
    EqI32 { dest: Slot, x: Slot, y: Slot },

    Const { dest: Slot, value: Value },
    ConstI32 { dest: Slot, value: i32 },
    ConstDouble { dest: Slot, value: f64 },

    /// Copy `S[x]` into `dest`, requiring an int32.
    ExtractI32 { dest: Slot, x: Slot },
    /// Copy `S[x]` into `dest`, requiring a double.
    ExtractDouble { dest: Slot, x: Slot },

    /// Continue at the absolute instruction index `offset`.
    Jump { offset: u16 },

    /// Continue at `offset` if the int32 in `S[x]` is non-zero.
    IfI32 { x: Slot, offset: u16 },

    AddI32 { dest: Slot, x: Slot, y: Slot },

    /// Call `function` of the caller's module. Each entry of `args` is an
    /// absolute value-stack index whose value is copied into the callee's
    /// parameter slots. The result is written to `dest` when the callee
    /// returns.
    Call {
        dest: Slot,
        function: FuncId,
        args: Box<[Slot]>,
    },

    /// Return `S[x]` from the current function.
    Return { x: Slot },

    /// Invoke the host callback held in `S[callee]` with the values of the
    /// frame-relative `args` slots, writing its result to `dest`.
    Execute {
        dest: Slot,
        callee: Slot,
        args: Box<[Slot]>,
    },
}

impl Instruction {
    pub fn call(dest: Slot, function: FuncId, args: Vec<Slot>) -> Self {
        Instruction::Call {
            dest,
            function,
            args: args.into_boxed_slice(),
        }
    }

    pub fn execute(dest: Slot, callee: Slot, args: Vec<Slot>) -> Self {
        Instruction::Execute {
            dest,
            callee,
            args: args.into_boxed_slice(),
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Allocate { .. } => Opcode::Allocate,
            Instruction::AllocateI32 { .. } => Opcode::AllocateI32,
            Instruction::AllocateDouble { .. } => Opcode::AllocateDouble,
            Instruction::Store { .. } => Opcode::Store,
            Instruction::StoreI32 { .. } => Opcode::StoreI32,
            Instruction::StoreDouble { .. } => Opcode::StoreDouble,
            Instruction::Load { .. } => Opcode::Load,
            Instruction::LoadI32 { .. } => Opcode::LoadI32,
            Instruction::LoadDouble { .. } => Opcode::LoadDouble,
            Instruction::EqI32 { .. } => Opcode::EqI32,
            Instruction::Const { .. } => Opcode::Const,
            Instruction::ConstI32 { .. } => Opcode::ConstI32,
            Instruction::ConstDouble { .. } => Opcode::ConstDouble,
            Instruction::ExtractI32 { .. } => Opcode::ExtractI32,
            Instruction::ExtractDouble { .. } => Opcode::ExtractDouble,
            Instruction::Jump { .. } => Opcode::Jump,
            Instruction::IfI32 { .. } => Opcode::IfI32,
            Instruction::AddI32 { .. } => Opcode::AddI32,
            Instruction::Call { .. } => Opcode::Call,
            Instruction::Return { .. } => Opcode::Return,
            Instruction::Execute { .. } => Opcode::Execute,
        }
    }

    /// The slot this instruction assigns, if any.
    pub fn dest(&self) -> Option<Slot> {
        use Instruction::*;
        match self {
            Allocate { dest }
            | AllocateI32 { dest }
            | AllocateDouble { dest }
            | Load { dest, .. }
            | LoadI32 { dest, .. }
            | LoadDouble { dest, .. }
            | EqI32 { dest, .. }
            | Const { dest, .. }
            | ConstI32 { dest, .. }
            | ConstDouble { dest, .. }
            | ExtractI32 { dest, .. }
            | ExtractDouble { dest, .. }
            | AddI32 { dest, .. }
            | Call { dest, .. }
            | Execute { dest, .. } => Some(*dest),
            Store { .. } | StoreI32 { .. } | StoreDouble { .. } | Jump { .. } | IfI32 { .. }
            | Return { .. } => None,
        }
    }

    pub fn x(&self) -> Option<Slot> {
        use Instruction::*;
        match self {
            Store { x, .. }
            | StoreI32 { x, .. }
            | StoreDouble { x, .. }
            | Load { x, .. }
            | LoadI32 { x, .. }
            | LoadDouble { x, .. }
            | EqI32 { x, .. }
            | ExtractI32 { x, .. }
            | ExtractDouble { x, .. }
            | IfI32 { x, .. }
            | AddI32 { x, .. }
            | Return { x } => Some(*x),
            Execute { callee, .. } => Some(*callee),
            _ => None,
        }
    }

    pub fn y(&self) -> Option<Slot> {
        use Instruction::*;
        match self {
            Store { y, .. }
            | StoreI32 { y, .. }
            | StoreDouble { y, .. }
            | EqI32 { y, .. }
            | AddI32 { y, .. } => Some(*y),
            _ => None,
        }
    }

    /// Jump target of `Jump` and `IfI32`.
    pub fn offset(&self) -> Option<u16> {
        match self {
            Instruction::Jump { offset } | Instruction::IfI32 { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    /// Inline literal of the `Const` family, as a value.
    pub fn value(&self) -> Option<Value> {
        match self {
            Instruction::Const { value, .. } => Some(*value),
            Instruction::ConstI32 { value, .. } => Some(Value::Int32(*value)),
            Instruction::ConstDouble { value, .. } => Some(Value::Double(*value)),
            _ => None,
        }
    }

    pub fn function(&self) -> Option<FuncId> {
        match self {
            Instruction::Call { function, .. } => Some(*function),
            _ => None,
        }
    }

    pub fn args(&self) -> Option<&[Slot]> {
        match self {
            Instruction::Call { args, .. } | Instruction::Execute { args, .. } => Some(args),
            _ => None,
        }
    }
}

pub mod disasm;
pub mod dsl;
pub mod function;
pub mod image;
pub mod module;
pub mod op;
pub mod verify;

pub use function::Function;
pub use module::{FuncId, Module};
pub use op::{Instruction, Opcode, Slot};

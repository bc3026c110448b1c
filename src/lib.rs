//! # Scramjet
//!
//! A small register-based virtual machine executing single-assignment
//! bytecode over a tagged [`Value`] type.
//!
//! The crate is split the same way a program flows through it:
//!
//! - [`lang`] holds the value representation.
//! - [`bytecode`] holds instructions, function modules, the assembler, the
//!   single-assignment verifier, the disassembler and the binary image codec.
//! - [`runtime`] holds frames, the shared value stack, the interpreter loop,
//!   host callbacks and the [`Engine`] embedding context.

pub mod bytecode;
pub mod lang;
pub mod runtime;

pub use bytecode::{FuncId, Function, Instruction, Module, Opcode, Slot};
pub use lang::value::{Tag, Value};
pub use runtime::engine::{Engine, EngineError};
pub use runtime::host::{CallbackId, ExecutionContext, HostError, HostRegistry};
pub use runtime::runtime_error::RuntimeError;
pub use runtime::vm::{Interpreter, InterpreterConfig};

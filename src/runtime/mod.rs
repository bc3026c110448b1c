//! Execution: the value and call stacks, frames, the interpreter loop, host
//! callbacks and the embedding engine.

pub mod engine;
pub mod frame;
pub mod host;
pub mod runtime_error;
pub mod stack;
pub mod vm;

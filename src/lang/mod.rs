//! # Scramjet values
//!
//! The tagged value type every instruction operates over. Arithmetic is not
//! defined on values themselves; it lives in the interpreter, which checks
//! operand tags as it goes.

pub mod value;

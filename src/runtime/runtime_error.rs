use thiserror::Error;

use crate::bytecode::FuncId;

/// A broken execution-time precondition.
///
/// Well-formed, verified bytecode never produces one of these; each variant
/// names the contract that the running code violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("slot {slot} out of range (frame bottom {bottom}, stack length {len})")]
    SlotOutOfRange { slot: usize, bottom: usize, len: usize },

    #[error("absolute stack index {index} out of range (stack length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid cell address {address} (stack length {len})")]
    InvalidCell { address: i64, len: usize },

    #[error("type error: expected {expected}, got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("program counter {pc} outside function of length {len}")]
    PcOutOfRange { pc: usize, len: usize },

    #[error("function takes {expected} arguments, got {found}")]
    ArgumentCount { expected: usize, found: usize },

    #[error("instruction at pc={pc} is not a call site")]
    NotACallSite { pc: usize },

    #[error("unknown native callback {0}")]
    UnknownCallback(u64),

    #[error("no active frame")]
    NoFrame,

    #[error("call depth limit exceeded ({0})")]
    CallDepthExceeded(usize),

    #[error("stack size limit exceeded ({0})")]
    StackLimitExceeded(usize),

    #[error("cell address space exhausted: {0} is not representable as int32")]
    AddressSpaceExhausted(usize),

    #[error("call to {0}, which is not in the module")]
    UnknownFunction(FuncId),

    #[error("execution step limit exceeded ({0})")]
    StepLimitExceeded(usize),
}

impl RuntimeError {
    pub fn type_mismatch(expected: &'static str, found: &crate::lang::value::Value) -> Self {
        RuntimeError::TypeMismatch {
            expected,
            found: found.type_name(),
        }
    }
}

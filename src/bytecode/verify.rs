use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::bytecode::module::{FuncId, Module};
use crate::bytecode::{Function, Instruction, Slot};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// A parameter slot appeared as a `dest`.
    #[error("assignment to argument slot {slot} at pc={pc} (function takes {arg_count} arguments)")]
    ArgumentAssigned { pc: usize, slot: Slot, arg_count: Slot },

    /// A local slot appeared as a `dest` more than once.
    #[error("slot {slot} assigned twice: first at pc={first}, again at pc={second}")]
    Reassigned { slot: Slot, first: usize, second: usize },

    #[error("call at pc={pc} names {callee}, which is not in the module")]
    UnknownCallee { pc: usize, callee: FuncId },

    #[error("call at pc={pc} passes {found} arguments to {callee}, which takes {expected}")]
    CallArity {
        pc: usize,
        callee: FuncId,
        expected: Slot,
        found: usize,
    },

    #[error("{0} is declared but has no body")]
    Undefined(FuncId),

    #[error("unknown function {0}")]
    UnknownFunction(FuncId),
}

/// Check one function of `module`.
///
/// Every `dest` must name a local (`>= arg_count`) and each local may be a
/// `dest` at most once. This is a linear scan: an assignment inside a loop
/// body counts once even though it may execute many times. Every `Call` must
/// name a function of the module and pass it exactly its parameter count.
pub fn check_function(module: &Module, id: FuncId) -> Result<(), VerifyError> {
    let def = module.get(id).ok_or(VerifyError::UnknownFunction(id))?;
    if !def.is_defined() {
        return Err(VerifyError::Undefined(id));
    }

    let arg_count = def.arg_count();
    let mut assigned: HashMap<Slot, usize> = HashMap::new();

    for (pc, op) in def.code().iter().enumerate() {
        if let Instruction::Call { function, args, .. } = op {
            let callee = module.get(*function).ok_or(VerifyError::UnknownCallee {
                pc,
                callee: *function,
            })?;
            if args.len() != usize::from(callee.arg_count()) {
                return Err(VerifyError::CallArity {
                    pc,
                    callee: *function,
                    expected: callee.arg_count(),
                    found: args.len(),
                });
            }
        }

        let Some(slot) = op.dest() else {
            continue;
        };

        if slot < arg_count {
            return Err(VerifyError::ArgumentAssigned { pc, slot, arg_count });
        }

        if let Some(&first) = assigned.get(&slot) {
            return Err(VerifyError::Reassigned {
                slot,
                first,
                second: pc,
            });
        }
        assigned.insert(slot, pc);
    }

    Ok(())
}

/// Check `entry` and every function reachable from it through `Call`, each
/// once. Cycles are fine.
pub fn check_reachable(module: &Module, entry: FuncId) -> Result<(), VerifyError> {
    let mut seen = HashSet::new();
    let mut pending = vec![entry];

    while let Some(id) = pending.pop() {
        if !seen.insert(id) {
            continue;
        }
        check_function(module, id)?;

        if let Some(def) = module.get(id) {
            pending.extend(def.code().iter().filter_map(Instruction::function));
        }
    }

    Ok(())
}

pub fn verify_function(function: &Function) -> Result<(), VerifyError> {
    check_function(function.module(), function.id())
}

pub fn verify_all(function: &Function) -> Result<(), VerifyError> {
    check_reachable(function.module(), function.id())
}

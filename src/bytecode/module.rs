//! Function tables.
//!
//! A [`Module`] owns a flat list of function definitions addressed by
//! [`FuncId`]. `Call` names its callee by id, so a function may call itself
//! and functions may call each other. A function is declared (name and
//! parameter count) before its body is defined, which is what lets a body
//! refer to functions that are not finished yet.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bytecode::function::Function;
use crate::bytecode::op::{Instruction, Slot};

/// Index of a function within its [`Module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FuncId(pub u32);

impl FuncId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FuncId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("unknown function {0}")]
    UnknownFunction(FuncId),

    #[error("{0} is already defined")]
    AlreadyDefined(FuncId),

    #[error("module holds more functions than a function id can address")]
    TooManyFunctions,
}

/// One function of a module: its signature and, once defined, its code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    name: Option<String>,
    arg_count: Slot,
    num_locals: Slot,
    code: Option<Box<[Instruction]>>,
}

impl FunctionDef {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn arg_count(&self) -> Slot {
        self.arg_count
    }

    pub fn num_locals(&self) -> Slot {
        self.num_locals
    }

    /// The body. A declared but undefined function has no instructions.
    pub fn code(&self) -> &[Instruction] {
        self.code.as_deref().unwrap_or(&[])
    }

    pub fn is_defined(&self) -> bool {
        self.code.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    functions: Vec<FunctionDef>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// A module holding one anonymous function with id `FuncId(0)`.
    pub fn single(code: Vec<Instruction>, arg_count: Slot, num_locals: Slot) -> Self {
        Self {
            functions: vec![FunctionDef {
                name: None,
                arg_count,
                num_locals,
                code: Some(code.into_boxed_slice()),
            }],
        }
    }

    pub(crate) fn from_definitions(functions: Vec<FunctionDef>) -> Self {
        Self { functions }
    }

    pub(crate) fn into_definitions(self) -> Vec<FunctionDef> {
        self.functions
    }

    pub fn definitions(&self) -> &[FunctionDef] {
        &self.functions
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn get(&self, id: FuncId) -> Option<&FunctionDef> {
        self.functions.get(id.index())
    }

    pub fn ids(&self) -> impl Iterator<Item = FuncId> + '_ {
        // `push` keeps every index representable as a `u32`.
        (0..self.functions.len()).map(|i| FuncId(i as u32))
    }

    /// The most recently declared function called `name`.
    pub fn lookup(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .rposition(|def| def.name() == Some(name))
            .map(|i| FuncId(i as u32))
    }

    fn push(&mut self, def: FunctionDef) -> Result<FuncId, BuildError> {
        let id = u32::try_from(self.functions.len()).map_err(|_| BuildError::TooManyFunctions)?;
        self.functions.push(def);
        Ok(FuncId(id))
    }

    /// Declare a function without a body. The name shadows any earlier
    /// function of the same name for [`lookup`](Self::lookup).
    pub fn declare(&mut self, name: impl Into<String>, arg_count: Slot) -> Result<FuncId, BuildError> {
        self.push(FunctionDef {
            name: Some(name.into()),
            arg_count,
            num_locals: 0,
            code: None,
        })
    }

    /// Give a declared function its body.
    pub fn define(
        &mut self,
        id: FuncId,
        code: Vec<Instruction>,
        num_locals: Slot,
    ) -> Result<(), BuildError> {
        let def = self
            .functions
            .get_mut(id.index())
            .ok_or(BuildError::UnknownFunction(id))?;
        if def.code.is_some() {
            return Err(BuildError::AlreadyDefined(id));
        }
        def.code = Some(code.into_boxed_slice());
        def.num_locals = num_locals;
        Ok(())
    }

    /// Add an anonymous, already defined function.
    pub fn add(
        &mut self,
        code: Vec<Instruction>,
        arg_count: Slot,
        num_locals: Slot,
    ) -> Result<FuncId, BuildError> {
        self.push(FunctionDef {
            name: None,
            arg_count,
            num_locals,
            code: Some(code.into_boxed_slice()),
        })
    }

    /// Rebind `id` to `name`. It then shadows earlier functions of that name.
    pub(crate) fn rename(&mut self, id: FuncId, name: impl Into<String>) -> Result<(), BuildError> {
        let def = self
            .functions
            .get_mut(id.index())
            .ok_or(BuildError::UnknownFunction(id))?;
        def.name = Some(name.into());
        Ok(())
    }

    /// Drop the body of `id`, returning it to the declared state.
    pub(crate) fn undefine(&mut self, id: FuncId) {
        if let Some(def) = self.functions.get_mut(id.index()) {
            def.code = None;
        }
    }

    /// Forget every function from index `len` on.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.functions.truncate(len);
    }

    /// `entry` followed by every function reachable from it through `Call`,
    /// each once, in breadth-first order.
    pub fn reachable(&self, entry: FuncId) -> Result<Vec<FuncId>, BuildError> {
        self.get(entry).ok_or(BuildError::UnknownFunction(entry))?;

        let mut seen = vec![false; self.functions.len()];
        let mut order = Vec::new();
        let mut queue = VecDeque::from([entry]);

        while let Some(id) = queue.pop_front() {
            let Some(def) = self.get(id) else {
                return Err(BuildError::UnknownFunction(id));
            };
            if std::mem::replace(&mut seen[id.index()], true) {
                continue;
            }
            order.push(id);

            for op in def.code() {
                if let Instruction::Call { function, .. } = op {
                    match seen.get(function.index()) {
                        None => return Err(BuildError::UnknownFunction(*function)),
                        Some(false) => queue.push_back(*function),
                        Some(true) => {}
                    }
                }
            }
        }

        Ok(order)
    }

    /// Copy `function` and everything it calls into this module, renumbering
    /// call targets. Returns the new id of `function`.
    pub fn import(&mut self, function: &Function) -> Result<FuncId, BuildError> {
        let source = function.module();
        let order = source.reachable(function.id())?;

        let base = self.functions.len();
        let mut renumber = HashMap::with_capacity(order.len());
        for (i, &old) in order.iter().enumerate() {
            let new = u32::try_from(base + i).map_err(|_| BuildError::TooManyFunctions)?;
            renumber.insert(old, FuncId(new));
        }

        for &old in &order {
            let def = source.get(old).ok_or(BuildError::UnknownFunction(old))?;
            let code = match &def.code {
                Some(code) => {
                    let mut ops = Vec::with_capacity(code.len());
                    for op in code.iter() {
                        ops.push(match op {
                            Instruction::Call {
                                dest,
                                function,
                                args,
                            } => Instruction::Call {
                                dest: *dest,
                                function: *renumber
                                    .get(function)
                                    .ok_or(BuildError::UnknownFunction(*function))?,
                                args: args.clone(),
                            },
                            other => other.clone(),
                        });
                    }
                    Some(ops.into_boxed_slice())
                }
                None => None,
            };
            self.functions.push(FunctionDef {
                name: def.name.clone(),
                arg_count: def.arg_count,
                num_locals: def.num_locals,
                code,
            });
        }

        renumber
            .get(&function.id())
            .copied()
            .ok_or(BuildError::UnknownFunction(function.id()))
    }

    /// Freeze the module and return a handle to `id`.
    pub fn into_function(self, id: FuncId) -> Option<Function> {
        Function::from_module(std::sync::Arc::new(self), id)
    }
}

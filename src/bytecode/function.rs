use std::sync::Arc;

use crate::bytecode::module::{FuncId, FunctionDef, Module};
use crate::bytecode::op::{Instruction, Slot};

/// Handle to one function of a frozen [`Module`].
///
/// Cloning is cheap: clones share the module. Two handles are equal when they
/// name the same function of the same module. Functions may be shared
/// read-only between interpreters.
#[derive(Clone)]
pub struct Function {
    module: Arc<Module>,
    id: FuncId,
}

impl Function {
    /// A function that calls nothing, alone in its own module.
    pub fn new(code: Vec<Instruction>, arg_count: Slot, num_locals: Slot) -> Self {
        Self {
            module: Arc::new(Module::single(code, arg_count, num_locals)),
            id: FuncId(0),
        }
    }

    /// Handle to `id`, or `None` if the module has no such function.
    pub fn from_module(module: Arc<Module>, id: FuncId) -> Option<Self> {
        module.get(id)?;
        Some(Self { module, id })
    }

    fn def(&self) -> &FunctionDef {
        // Checked by every constructor; modules behind an `Arc` never shrink.
        &self.module.definitions()[self.id.index()]
    }

    pub fn id(&self) -> FuncId {
        self.id
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn name(&self) -> Option<&str> {
        self.def().name()
    }

    /// Another function of the same module.
    pub fn callee(&self, id: FuncId) -> Option<Function> {
        Function::from_module(Arc::clone(&self.module), id)
    }

    pub fn code(&self) -> &[Instruction] {
        self.def().code()
    }

    pub fn is_defined(&self) -> bool {
        self.def().is_defined()
    }

    pub fn instruction(&self, pc: usize) -> Option<&Instruction> {
        self.code().get(pc)
    }

    pub fn len(&self) -> usize {
        self.code().len()
    }

    pub fn is_empty(&self) -> bool {
        self.code().is_empty()
    }

    /// Number of parameters. Slots `0..arg_count` are filled by the caller
    /// and are read-only.
    pub fn arg_count(&self) -> Slot {
        self.def().arg_count()
    }

    /// Number of assignable locals, numbered from `arg_count`.
    pub fn num_locals(&self) -> Slot {
        self.def().num_locals()
    }

    /// Size of the slot window pushed for each call.
    pub fn frame_size(&self) -> usize {
        usize::from(self.arg_count()) + usize::from(self.num_locals())
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.module, &other.module) && self.id == other.id
    }
}

impl Eq for Function {}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("len", &self.len())
            .field("arg_count", &self.arg_count())
            .field("num_locals", &self.num_locals())
            .finish()
    }
}

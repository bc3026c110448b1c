//! Embedding context: globals, host callbacks, limits and named functions.
//!
//! Nothing here is process-wide. Each [`Engine`] is an ordinary value, and
//! the interpreters it creates borrow from it for the duration of a run.
//!
//! Functions live in one [`Module`] owned by the engine. A definition may
//! call any function already declared, itself included. Handles returned by
//! the engine keep the module as it was when they were made.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::bytecode::dsl::{Assembler, DslError};
use crate::bytecode::image::{self, ImageError};
use crate::bytecode::module::BuildError;
use crate::bytecode::verify::{VerifyError, check_function, verify_all};
use crate::bytecode::{FuncId, Function, Module, Slot};
use crate::lang::value::Value;
use crate::runtime::host::{ExecutionContext, Globals, HostError, HostRegistry};
use crate::runtime::runtime_error::RuntimeError;
use crate::runtime::vm::{Interpreter, InterpreterConfig};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("assembly error at {0}")]
    Dsl(#[from] DslError),

    #[error("verification error: {0}")]
    Verify(#[from] VerifyError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("undefined function '{0}'")]
    UndefinedFunction(String),
}

#[derive(Debug, Default)]
pub struct Engine {
    globals: Globals,
    host: HostRegistry,
    config: InterpreterConfig,
    module: Arc<Module>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    // Globals

    /// Set a global, returning the value it replaces.
    pub fn set_global(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.globals.insert(name.into(), value)
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).copied()
    }

    pub fn remove_global(&mut self, name: &str) -> Option<Value> {
        self.globals.remove(name)
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    // Host callbacks

    pub fn register_callback<F>(&mut self, name: impl Into<String>, callback: F) -> Result<Value, EngineError>
    where
        F: Fn(&ExecutionContext<'_>) -> Value + 'static,
    {
        Ok(self.host.register(name, callback)?)
    }

    pub fn host(&self) -> &HostRegistry {
        &self.host
    }

    // Functions

    /// Bind `name` without a body so that later definitions can call it.
    /// Use this for mutual recursion; [`define_function`](Self::define_function)
    /// with the same name and parameter count fills it in.
    pub fn declare_function(&mut self, name: impl Into<String>, arg_count: Slot) -> Result<FuncId, EngineError> {
        let module = Arc::make_mut(&mut self.module);
        Ok(module.declare(name, arg_count)?)
    }

    /// Assemble `dsl`, verify the result and register it under `name`.
    ///
    /// Calls in `dsl` resolve against functions declared earlier and against
    /// `name` itself; `e<name>` literals resolve against the registered
    /// callbacks. Callees that are declared but not yet defined are checked
    /// when the function runs. On error nothing is registered.
    pub fn define_function(
        &mut self,
        name: impl Into<String>,
        dsl: &str,
        arg_count: Slot,
        num_locals: Slot,
    ) -> Result<Function, EngineError> {
        let name = name.into();
        let module = Arc::make_mut(&mut self.module);
        let mark = module.len();

        let pending = module.lookup(&name).filter(|&id| {
            module
                .get(id)
                .is_some_and(|def| !def.is_defined() && def.arg_count() == arg_count)
        });
        let id = match pending {
            Some(id) => id,
            None => module.declare(name.as_str(), arg_count)?,
        };

        if let Err(e) = define_body(module, &self.host, id, dsl, num_locals) {
            if id.index() >= mark {
                module.truncate(mark);
            } else {
                module.undefine(id);
            }
            return Err(e);
        }

        debug!(%name, %id, "define");
        self.handle(id)
    }

    /// Verify an already built function and register a copy of it, with
    /// everything it calls, under `name`. A later definition shadows an
    /// earlier one; existing call sites keep the function they were built
    /// against.
    pub fn define(&mut self, name: impl Into<String>, function: Function) -> Result<Function, EngineError> {
        verify_all(&function)?;
        let name = name.into();
        let module = Arc::make_mut(&mut self.module);
        let id = module.import(&function)?;
        module.rename(id, name.as_str())?;

        debug!(%name, %id, len = function.len(), "define");
        self.handle(id)
    }

    pub fn function(&self, name: &str) -> Option<Function> {
        self.lookup(name).ok()
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    /// Encode the function named `name` as a bytecode image.
    pub fn save_image(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        let function = self.lookup(name)?;
        Ok(image::encode(&function)?)
    }

    /// Decode an image and register its entry function under `name`.
    pub fn load_image(&mut self, name: impl Into<String>, bytes: &[u8]) -> Result<Function, EngineError> {
        let function = image::decode(bytes)?;
        self.define(name, function)
    }

    // Execution

    /// Run the function named `name`.
    pub fn run(&self, name: &str, args: &[Value]) -> Result<Value, EngineError> {
        let function = self.lookup(name)?;
        self.run_function(&function, args)
    }

    /// Verify and run `function` against this engine's globals and callbacks.
    pub fn run_function(&self, function: &Function, args: &[Value]) -> Result<Value, EngineError> {
        verify_all(function)?;
        Ok(self.interpreter().interpret(function, args)?)
    }

    /// A fresh interpreter wired to this engine's state.
    pub fn interpreter(&self) -> Interpreter<'_> {
        Interpreter::with_config(self.config.clone())
            .with_host(&self.host)
            .with_globals(&self.globals)
    }

    fn handle(&self, id: FuncId) -> Result<Function, EngineError> {
        Function::from_module(Arc::clone(&self.module), id)
            .ok_or(EngineError::Build(BuildError::UnknownFunction(id)))
    }

    fn lookup(&self, name: &str) -> Result<Function, EngineError> {
        self.module
            .lookup(name)
            .and_then(|id| Function::from_module(Arc::clone(&self.module), id))
            .ok_or_else(|| EngineError::UndefinedFunction(name.to_string()))
    }
}

fn define_body(
    module: &mut Module,
    host: &HostRegistry,
    id: FuncId,
    dsl: &str,
    num_locals: Slot,
) -> Result<(), EngineError> {
    let code = Assembler::new()
        .with_functions(module)
        .with_callbacks(host)
        .assemble(dsl)?;
    module.define(id, code, num_locals)?;
    check_function(module, id)?;
    Ok(())
}

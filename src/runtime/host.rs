//! Host-native callbacks.
//!
//! A callback is registered with a [`HostRegistry`], which hands back a
//! `Tagged(NativeCallback, id)` value. Bytecode invokes it by placing that
//! value in a slot and executing `Execute`.

use std::collections::HashMap;

use thiserror::Error;

use crate::lang::value::Value;
use crate::runtime::runtime_error::RuntimeError;

pub type CallbackId = u32;

/// Most callbacks a registry can hold: one per representable id.
pub const MAX_CALLBACKS: usize = CallbackId::MAX as usize + 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("callback registry is full ({0} callbacks)")]
    RegistryFull(usize),
}

/// Global variables visible to callbacks, owned by an
/// [`Engine`](crate::runtime::engine::Engine).
pub type Globals = HashMap<String, Value>;

/// What a callback sees of the interpreter during one invocation.
///
/// The argument slice borrows interpreter state and cannot outlive the call.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    args: &'a [Value],
    globals: Option<&'a Globals>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(args: &'a [Value], globals: Option<&'a Globals>) -> Self {
        Self { args, globals }
    }

    pub fn args(&self) -> &'a [Value] {
        self.args
    }

    pub fn arg(&self, index: usize) -> Option<Value> {
        self.args.get(index).copied()
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.and_then(|g| g.get(name)).copied()
    }
}

pub type Callback = Box<dyn Fn(&ExecutionContext<'_>) -> Value>;

pub struct HostRegistry {
    callbacks: Vec<(String, Callback)>,
    limit: usize,
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self {
            callbacks: Vec::new(),
            limit: MAX_CALLBACKS,
        }
    }
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that refuses callbacks past `limit`, capped at
    /// [`MAX_CALLBACKS`].
    pub fn with_limit(limit: usize) -> Self {
        Self {
            callbacks: Vec::new(),
            limit: limit.min(MAX_CALLBACKS),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Register `callback` under `name` and return the value that refers to
    /// it. Re-registering a name shadows the earlier callback for
    /// [`lookup`](Self::lookup); values already handed out keep working.
    pub fn register<F>(&mut self, name: impl Into<String>, callback: F) -> Result<Value, HostError>
    where
        F: Fn(&ExecutionContext<'_>) -> Value + 'static,
    {
        let len = self.callbacks.len();
        if len >= self.limit {
            return Err(HostError::RegistryFull(len));
        }
        let id = CallbackId::try_from(len).map_err(|_| HostError::RegistryFull(len))?;
        self.callbacks.push((name.into(), Box::new(callback)));
        Ok(Value::native_callback(id))
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let index = self.callbacks.iter().rposition(|(n, _)| n == name)?;
        CallbackId::try_from(index).ok().map(Value::native_callback)
    }

    pub fn get(&self, id: CallbackId) -> Option<&Callback> {
        self.callbacks.get(id as usize).map(|(_, callback)| callback)
    }

    pub fn name(&self, id: CallbackId) -> Option<&str> {
        self.callbacks.get(id as usize).map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn invoke(
        &self,
        id: CallbackId,
        context: &ExecutionContext<'_>,
    ) -> Result<Value, RuntimeError> {
        let (_, callback) = self
            .callbacks
            .get(id as usize)
            .ok_or(RuntimeError::UnknownCallback(u64::from(id)))?;
        Ok(callback(context))
    }
}

impl std::fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.callbacks.iter().map(|(name, _)| name))
            .finish()
    }
}

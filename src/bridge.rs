//! Handle-based surface for embedding layers.
//!
//! Scripting bridges cannot hold a [`Future`] directly; they hold a number.
//! [`AsyncBridge`] issues futures over an `Executor<Value>`, hands out their
//! ids as `f64` slot values, and resolves those numbers back into futures on
//! every call. Each operation is synchronous; only [`AsyncBridge::wait`]
//! blocks.

use crate::cancel::CancellationToken;
use crate::error::{Error, Result, TaskError};
use crate::executor::Executor;
use crate::future::{Future, FutureId, FutureState};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Numeric future handle as seen by an embedding language.
pub type Handle = f64;

// largest integer an f64 represents exactly
const MAX_HANDLE: f64 = 9_007_199_254_740_992.0;

/// Function registered under a name and run on a worker by [`AsyncBridge::call`].
pub type AsyncMethod =
    Arc<dyn Fn(&CancellationToken, &[Value]) -> std::result::Result<Value, TaskError> + Send + Sync>;

/// Dynamically typed task result.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Num(n) => write!(f, "{}", n),
            Value::Str(s) => f.write_str(s),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Num(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Num(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Num(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Num(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Convert a future id into the number handed to the embedding layer.
pub fn to_handle(id: FutureId) -> Handle {
    id.as_u64() as f64
}

/// Parse a handle. Negative, fractional, non-finite and out-of-range
/// numbers can never name a future.
pub fn parse_handle(handle: Handle) -> Result<FutureId> {
    if handle.is_finite() && handle >= 0.0 && handle.fract() == 0.0 && handle <= MAX_HANDLE {
        Ok(FutureId::from(handle as u64))
    } else {
        Err(Error::unknown_handle(handle))
    }
}

pub struct AsyncBridge<'a> {
    executor: &'a Executor<Value>,
    methods: RwLock<HashMap<String, AsyncMethod>>,
}

impl<'a> AsyncBridge<'a> {
    pub fn new(executor: &'a Executor<Value>) -> Self {
        Self {
            executor,
            methods: RwLock::new(HashMap::new()),
        }
    }

    pub fn executor(&self) -> &'a Executor<Value> {
        self.executor
    }

    pub fn submit<F>(&self, task: F) -> Handle
    where
        F: FnOnce(&CancellationToken) -> std::result::Result<Value, TaskError> + Send + 'static,
    {
        to_handle(self.executor.submit(task).id())
    }

    pub fn future(&self, handle: Handle) -> Result<Future<Value>> {
        let id = parse_handle(handle)?;
        self.executor
            .get_future(id)
            .ok_or_else(|| Error::unknown_handle(id))
    }

    pub fn is_ready(&self, handle: Handle) -> Result<bool> {
        Ok(self.future(handle)?.is_ready())
    }

    /// Block until the future is terminal (`await` on the script side).
    pub fn wait(&self, handle: Handle) -> Result<Value> {
        self.future(handle)?.wait()
    }

    pub fn get(&self, handle: Handle) -> Result<Value> {
        self.future(handle)?.get()
    }

    pub fn cancel(&self, handle: Handle) -> Result<()> {
        self.future(handle)?.cancel();
        Ok(())
    }

    pub fn state(&self, handle: Handle) -> Result<FutureState> {
        Ok(self.future(handle)?.state())
    }

    /// Forget the handle. Idempotent; unknown handles are ignored.
    pub fn cleanup(&self, handle: Handle) {
        if let Ok(id) = parse_handle(handle) {
            self.executor.remove_future(id);
        }
    }

    /// Register `method` under `name`, replacing any previous registration.
    pub fn register_async_method<F>(&self, name: impl Into<String>, method: F)
    where
        F: Fn(&CancellationToken, &[Value]) -> std::result::Result<Value, TaskError>
            + Send
            + Sync
            + 'static,
    {
        self.methods.write().insert(name.into(), Arc::new(method));
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.read().contains_key(name)
    }

    /// Run a registered method on a worker and return its handle.
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Handle> {
        let method = self
            .methods
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownMethod(name.to_string()))?;

        Ok(self.submit(move |token| method(token, &args)))
    }
}

impl fmt::Debug for AsyncBridge<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncBridge")
            .field("executor", &self.executor)
            .field("methods", &self.methods.read().len())
            .finish()
    }
}

//! Spawn / `WaitResult` and the external-value wrapper.
//!
//! Each spawn runs its body on a fresh `std::thread` and joins it over a
//! `crossbeam-channel` (see `DESIGN.md`), with a `Context`/`Scope` pair
//! threaded per routine instead of a bare environment.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver};

use crate::context::Context;
use crate::error::Error;
use crate::value::{ExternalValue, Value};

static NEXT_ROUTINE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutineId(pub u64);

impl RoutineId {
    pub fn next() -> Self {
        RoutineId(NEXT_ROUTINE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Wraps `value` as an external value owned by `owner` unless it is
/// already "simple" (primitives pass through unwrapped). `context`
/// is `owner`'s capability environment, carried along so a later
/// operation on the wrapper forwards its permission check to the
/// producing routine rather than the observer's.
pub fn wrap_for_export(value: Value, owner: RoutineId, context: Arc<Context>) -> Value {
    if value.is_simple() {
        value
    } else {
        Value::External(std::sync::Arc::new(ExternalValue {
            owner,
            owner_context: context,
            value: Box::new(value),
        }))
    }
}

/// Transparently unwraps an external value when it is being handed back
/// to the routine that produced it.
pub fn unwrap_if_owned(value: Value, current: RoutineId) -> Value {
    match value {
        Value::External(ext) if ext.owner == current => (*ext.value).clone(),
        other => other,
    }
}

pub struct RoutineHandle {
    pub id: RoutineId,
    receiver: Receiver<Result<Value, Error>>,
    cached: Mutex<Option<Result<Value, Error>>>,
}

impl RoutineHandle {
    /// The sole suspension point a script can name. Blocks until the
    /// routine's thread finishes, then caches the outcome so
    /// repeated calls are idempotent.
    pub fn wait_result(&self) -> Result<Value, Error> {
        let mut cached = self.cached.lock().unwrap();
        if let Some(r) = &*cached {
            return r.clone();
        }
        tracing::debug!(routine = self.id.0, "joining routine");
        let result = self
            .receiver
            .recv()
            .unwrap_or_else(|_| Err(Error::custom(None, "routine terminated without a result")));
        *cached = Some(result.clone());
        result
    }
}

/// Spawns `body` on a new OS thread, returning a handle whose
/// `wait_result` joins it. `body` is expected to already have its `Context`
/// and `Scope` bound by the caller (see `eval.rs`'s spawn-expression
/// handling); its return value is wrapped as external, tagged with
/// `context` (the routine's own derived context), before being handed to
/// the parent.
pub fn spawn<F>(context: Arc<Context>, body: F) -> std::sync::Arc<RoutineHandle>
where
    F: FnOnce() -> Result<Value, Error> + Send + 'static,
{
    let id = RoutineId::next();
    tracing::debug!(routine = id.0, "spawning routine");
    let (tx, rx) = bounded(1);
    std::thread::spawn(move || {
        let result = body().map(|v| wrap_for_export(v, id, context));
        let _ = tx.send(result);
    });
    std::sync::Arc::new(RoutineHandle {
        id,
        receiver: rx,
        cached: Mutex::new(None),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_context() -> Arc<Context> {
        Context::new(vec![], vec![], vec![])
    }

    #[test]
    fn simple_return_value_is_not_wrapped() {
        let handle = spawn(empty_context(), || Ok(Value::Integer(42)));
        let result = handle.wait_result().unwrap();
        assert!(matches!(result, Value::Integer(42)));
    }

    #[test]
    fn non_simple_return_value_is_wrapped_external() {
        let handle = spawn(empty_context(), || Ok(Value::new_list(vec![Value::Integer(1)])));
        let result = handle.wait_result().unwrap();
        assert!(matches!(result, Value::External(_)));
    }

    #[test]
    fn wait_result_is_idempotent() {
        let handle = spawn(empty_context(), || Ok(Value::Integer(7)));
        let first = handle.wait_result().unwrap();
        let second = handle.wait_result().unwrap();
        assert!(first.structural_eq(&second));
    }

    #[test]
    fn unwrap_if_owned_strips_wrapper_for_the_owning_routine() {
        let owner = RoutineId::next();
        let wrapped = wrap_for_export(Value::new_list(vec![Value::Integer(1)]), owner, empty_context());
        let unwrapped = unwrap_if_owned(wrapped, owner);
        assert!(matches!(unwrapped, Value::List(_)));
    }
}

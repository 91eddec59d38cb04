//! Local variable scope: the `$x` frame stack threaded by the evaluator.
//! Distinct from [`crate::context::Context`], which carries capabilities
//! rather than bindings.
//!
//! A parent-linked binding map (`bindings: Mutex<HashMap<...>>, parent:
//! Option<Arc<Scope>>`), using `Mutex`/`Arc` rather than `RefCell`/`Rc` so
//! a captured closure's scope can be sent to a spawned routine's OS thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::value::Value;

#[derive(Debug)]
pub struct Scope {
    bindings: Mutex<HashMap<String, Value>>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    pub fn new() -> Arc<Self> {
        Arc::new(Scope {
            bindings: Mutex::new(HashMap::new()),
            parent: None,
        })
    }

    pub fn with_parent(parent: Arc<Scope>) -> Arc<Self> {
        Arc::new(Scope {
            bindings: Mutex::new(HashMap::new()),
            parent: Some(parent),
        })
    }

    /// Defines `name` in the *nearest* frame (this one), shadowing any
    /// binding of the same name in an enclosing frame.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.bindings.lock().unwrap().insert(name.into(), value);
    }

    /// Resolves `name`, walking up the parent chain. `None` means the
    /// local variable was never assigned in any enclosing frame — a check
    /// error should have already ruled this out for reachable code.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.bindings.lock().unwrap().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Updates the nearest frame that already defines `name`. Returns
    /// `false` if no such frame exists (caller should treat this as a
    /// fresh `define` in the innermost frame, or as undefined-variable
    /// error depending on call site).
    pub fn set(&self, name: &str, value: Value) -> bool {
        {
            let mut b = self.bindings.lock().unwrap();
            if b.contains_key(name) {
                b.insert(name.to_string(), value);
                return true;
            }
        }
        match &self.parent {
            Some(p) => p.set(name, value),
            None => false,
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.bindings.lock().unwrap().contains_key(name) || self.parent.as_ref().is_some_and(|p| p.is_defined(name))
    }

    /// Removes `name` from the nearest frame that defines it, restoring
    /// the pipeline's `$` to "undefined" after a pipeline statement that
    /// found no prior binding to restore.
    pub fn remove(&self, name: &str) {
        self.bindings.lock().unwrap().remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_sees_parent_binding() {
        let parent = Scope::new();
        parent.define("x", Value::Integer(1));
        let child = Scope::with_parent(parent);
        assert!(matches!(child.get("x"), Some(Value::Integer(1))));
    }

    #[test]
    fn child_define_shadows_without_mutating_parent() {
        let parent = Scope::new();
        parent.define("x", Value::Integer(1));
        let child = Scope::with_parent(parent.clone());
        child.define("x", Value::Integer(2));
        assert!(matches!(child.get("x"), Some(Value::Integer(2))));
        assert!(matches!(parent.get("x"), Some(Value::Integer(1))));
    }

    #[test]
    fn set_updates_enclosing_frame_in_place() {
        let parent = Scope::new();
        parent.define("x", Value::Integer(1));
        let child = Scope::with_parent(parent.clone());
        assert!(child.set("x", Value::Integer(9)));
        assert!(matches!(parent.get("x"), Some(Value::Integer(9))));
    }

    #[test]
    fn set_on_unknown_name_fails() {
        let s = Scope::new();
        assert!(!s.set("missing", Value::Nil));
    }
}

//! The module-level global scope: constants, function declarations, and
//! `$$x` variables.
//!
//! Split from the local `$x` frame stack (kept in `scope.rs`) since
//! globals have no parent chain and carry a third table: a set of names
//! that are permanently immutable once declared `const` — global
//! constants are immutable for the program's lifetime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::value::{Function, Value};

/// Returned by [`GlobalScope::set_var`] so the caller (the evaluator) can
/// turn a write to a constant into a `Permission` error rather than a
/// plain runtime one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalWrite {
    Ok,
    Constant,
}

pub struct GlobalScope {
    vars: Mutex<HashMap<String, Value>>,
    constants: Mutex<HashMap<String, Value>>,
    functions: Mutex<HashMap<String, Arc<Function>>>,
}

impl GlobalScope {
    pub fn new() -> Arc<Self> {
        Arc::new(GlobalScope {
            vars: Mutex::new(HashMap::new()),
            constants: Mutex::new(HashMap::new()),
            functions: Mutex::new(HashMap::new()),
        })
    }

    /// Declares a `const` binding. Redeclaration is a checker-level error,
    /// not re-validated here.
    pub fn define_const(&self, name: impl Into<String>, value: Value) {
        self.constants.lock().unwrap().insert(name.into(), value);
    }

    pub fn define_function(&self, name: impl Into<String>, func: Arc<Function>) {
        self.functions.lock().unwrap().insert(name.into(), func);
    }

    pub fn get_function(&self, name: &str) -> Option<Arc<Function>> {
        self.functions.lock().unwrap().get(name).cloned()
    }

    pub fn is_const(&self, name: &str) -> bool {
        self.constants.lock().unwrap().contains_key(name)
    }

    /// Resolves `$$name`: constants shadow plain vars of the same name
    /// (the checker rejects a function/global-var name collision, but
    /// constants and vars share the lookup path here for simplicity).
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.constants.lock().unwrap().get(name) {
            return Some(v.clone());
        }
        self.vars.lock().unwrap().get(name).cloned()
    }

    /// Writes `$$name = value`. A constant name always reports
    /// `GlobalWrite::Constant` regardless of whatever `GlobalVar(Update)`
    /// permission the caller has already checked — even though Update is
    /// granted, a constant stays immutable.
    pub fn set_var(&self, name: &str, value: Value) -> GlobalWrite {
        if self.is_const(name) {
            return GlobalWrite::Constant;
        }
        self.vars.lock().unwrap().insert(name.to_string(), value);
        GlobalWrite::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_write_is_rejected_even_when_undefined_elsewhere() {
        let g = GlobalScope::new();
        g.define_const("A", Value::Integer(1));
        assert_eq!(g.set_var("A", Value::Integer(2)), GlobalWrite::Constant);
        assert!(matches!(g.get("A"), Some(Value::Integer(1))));
    }

    #[test]
    fn var_write_then_read_roundtrips() {
        let g = GlobalScope::new();
        assert_eq!(g.set_var("count", Value::Integer(1)), GlobalWrite::Ok);
        assert!(matches!(g.get("count"), Some(Value::Integer(1))));
    }
}

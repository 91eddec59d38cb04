//! Runtime values.
//!
//! A single `Value` sum type with a `Display` impl. Containers are
//! `Arc<Mutex<_>>` rather than `Rc<RefCell<_>>` so a `Value` is
//! `Send + Sync` and can cross a routine boundary over `crossbeam-channel`;
//! object maps use `indexmap::IndexMap` to preserve insertion order for
//! iteration while keeping unordered equality.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use crate::ast::Node;
use crate::context::Context;
use crate::pattern::Pattern;
use crate::routine::{RoutineHandle, RoutineId};
use crate::scope::Scope;

/// Reserved key under which an object's implicit-key count is stored.
pub const IMPLICIT_KEY_LEN_KEY: &str = "__implicit_key_len__";

/// Cap on an object key's length in bytes, enforced at parse time.
pub const MAX_OBJECT_KEY_BYTE_LEN: usize = 256;

pub type SharedList = Arc<Mutex<Vec<Value>>>;
pub type SharedObject = Arc<Mutex<IndexMap<String, Value>>>;

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Arc<Vec<Node>>,
    pub captured: Arc<Scope>,
    /// The capability context in effect where this closure was declared
    /// (closure: AST + captured locals + defining context). Calls run
    /// under this, not the caller's context, so a
    /// capability a function was handed at definition time cannot be
    /// widened by whoever ends up calling it.
    pub defining_context: Arc<Context>,
}

#[derive(Debug, Clone)]
pub struct RangeValue {
    pub start: Option<Box<Value>>,
    pub end: Option<Box<Value>>,
    pub exclusive: bool,
}

/// A value produced by a routine other than the one currently observing
/// it. Operations on it must be forwarded to `owner`'s context:
/// `owner_context` is that routine's capability environment, captured at
/// spawn time, so a call made through an external value is checked
/// against the producing routine's grants rather than the observer's.
#[derive(Debug, Clone)]
pub struct ExternalValue {
    pub owner: RoutineId,
    pub owner_context: Arc<Context>,
    pub value: Box<Value>,
}

#[derive(Debug, Clone)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Nil,
    Str(String),
    Path(PathBuf),
    PathPattern(Arc<Pattern>),
    Url(String),
    UrlPattern(Arc<Pattern>),
    Host(String),
    HostPattern(Arc<Pattern>),
    Quantity(f64, String),
    ByteRate(f64),
    EventRate(f64),
    List(SharedList),
    Object(SharedObject),
    KeyList(Vec<String>),
    Range(Box<RangeValue>),
    Function(Arc<Function>),
    /// A callable registered from the embedding environment, referenced by
    /// its registered name; resolved against the active `HostRegistry` at
    /// call time.
    HostFunction(Arc<str>),
    RoutineHandle(Arc<RoutineHandle>),
    RoutineGroup(Arc<Mutex<Vec<Arc<RoutineHandle>>>>),
    External(Arc<ExternalValue>),
    HostAliasRef(String),
    PatternMatcher(Arc<Pattern>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Nil => "nil",
            Value::Str(_) => "string",
            Value::Path(_) => "path",
            Value::PathPattern(_) => "path-pattern",
            Value::Url(_) => "url",
            Value::UrlPattern(_) => "url-pattern",
            Value::Host(_) => "host",
            Value::HostPattern(_) => "host-pattern",
            Value::Quantity(..) => "quantity",
            Value::ByteRate(_) => "byte-rate",
            Value::EventRate(_) => "event-rate",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::KeyList(_) => "key-list",
            Value::Range(_) => "range",
            Value::Function(_) => "function",
            Value::HostFunction(_) => "host-function",
            Value::RoutineHandle(_) => "routine",
            Value::RoutineGroup(_) => "routine-group",
            Value::External(_) => "external-value",
            Value::HostAliasRef(_) => "host-alias",
            Value::PatternMatcher(_) => "pattern",
        }
    }

    /// "Simple" values are the ones that pass through a routine boundary
    /// without being wrapped as external: not a primitive, lists and
    /// objects are not simple.
    pub fn is_simple(&self) -> bool {
        matches!(
            self,
            Value::Integer(_)
                | Value::Float(_)
                | Value::Bool(_)
                | Value::Nil
                | Value::Str(_)
                | Value::Path(_)
                | Value::Url(_)
                | Value::Host(_)
                | Value::Quantity(..)
                | Value::ByteRate(_)
                | Value::EventRate(_)
                | Value::KeyList(_)
        )
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Nil => false,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.lock().unwrap().is_empty(),
            Value::Object(o) => !o.lock().unwrap().is_empty(),
            _ => true,
        }
    }

    pub fn new_list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(Mutex::new(items)))
    }

    pub fn new_object(entries: IndexMap<String, Value>) -> Value {
        Value::Object(Arc::new(Mutex::new(entries)))
    }

    /// Structural equality. Lists/objects compare element-wise (object
    /// equality is unordered); self-referential containers are guarded
    /// with a visited-pointer set.
    pub fn structural_eq(&self, other: &Value) -> bool {
        let mut visited = Vec::new();
        structural_eq_inner(self, other, &mut visited)
    }
}

fn ptr_pair_seen(visited: &[(usize, usize)], a: usize, b: usize) -> bool {
    visited.iter().any(|&(x, y)| x == a && y == b)
}

fn structural_eq_inner(a: &Value, b: &Value, visited: &mut Vec<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Integer(x), Value::Float(y)) | (Value::Float(y), Value::Integer(x)) => {
            *x as f64 == *y
        }
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Nil, Value::Nil) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Path(x), Value::Path(y)) => x == y,
        (Value::Url(x), Value::Url(y)) => x == y,
        (Value::Host(x), Value::Host(y)) => x == y,
        (Value::UrlPattern(x), Value::UrlPattern(y)) => std::sync::Arc::ptr_eq(x, y),
        (Value::HostPattern(x), Value::HostPattern(y)) => std::sync::Arc::ptr_eq(x, y),
        (Value::PathPattern(x), Value::PathPattern(y)) => std::sync::Arc::ptr_eq(x, y),
        (Value::Quantity(v1, u1), Value::Quantity(v2, u2)) => v1 == v2 && u1 == u2,
        (Value::ByteRate(x), Value::ByteRate(y)) => x == y,
        (Value::EventRate(x), Value::EventRate(y)) => x == y,
        (Value::KeyList(x), Value::KeyList(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            let xp = Arc::as_ptr(x) as usize;
            let yp = Arc::as_ptr(y) as usize;
            if ptr_pair_seen(visited, xp, yp) {
                return true;
            }
            visited.push((xp, yp));
            let xg = x.lock().unwrap();
            let yg = y.lock().unwrap();
            xg.len() == yg.len()
                && xg
                    .iter()
                    .zip(yg.iter())
                    .all(|(i, j)| structural_eq_inner(i, j, visited))
        }
        (Value::Object(x), Value::Object(y)) => {
            let xp = Arc::as_ptr(x) as usize;
            let yp = Arc::as_ptr(y) as usize;
            if ptr_pair_seen(visited, xp, yp) {
                return true;
            }
            visited.push((xp, yp));
            let xg = x.lock().unwrap();
            let yg = y.lock().unwrap();
            xg.len() == yg.len()
                && xg.iter().all(|(k, v)| {
                    yg.get(k)
                        .map(|v2| structural_eq_inner(v, v2, visited))
                        .unwrap_or(false)
                })
        }
        (Value::External(x), _) => structural_eq_inner(&x.value, b, visited),
        (_, Value::External(y)) => structural_eq_inner(a, &y.value, visited),
        _ => false,
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(fl) => write!(f, "{fl}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Nil => write!(f, "nil"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Path(p) => write!(f, "{}", p.display()),
            Value::PathPattern(_) => write!(f, "<path-pattern>"),
            Value::Url(u) => write!(f, "{u}"),
            Value::UrlPattern(_) => write!(f, "<url-pattern>"),
            Value::Host(h) => write!(f, "{h}"),
            Value::HostPattern(_) => write!(f, "<host-pattern>"),
            Value::Quantity(v, u) => write!(f, "{v}{u}"),
            Value::ByteRate(b) => write!(f, "{b}B/s"),
            Value::EventRate(e) => write!(f, "{e}/s"),
            Value::List(items) => {
                let items = items.lock().unwrap();
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Object(obj) => {
                let obj = obj.lock().unwrap();
                write!(f, "{{")?;
                for (i, (k, v)) in obj.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::KeyList(keys) => write!(f, ".{{{}}}", keys.join(", ")),
            Value::Range(r) => {
                let op = if r.exclusive { "..<" } else { ".." };
                match (&r.start, &r.end) {
                    (Some(s), Some(e)) => write!(f, "{s}{op}{e}"),
                    (None, Some(e)) => write!(f, "{op}{e}"),
                    (Some(s), None) => write!(f, "{s}{op}"),
                    (None, None) => write!(f, "{op}"),
                }
            }
            Value::Function(fun) => write!(f, "<function {}>", fun.name.as_deref().unwrap_or("anonymous")),
            Value::HostFunction(name) => write!(f, "<host-function {name}>"),
            Value::RoutineHandle(_) => write!(f, "<routine>"),
            Value::RoutineGroup(_) => write!(f, "<routine-group>"),
            Value::External(ext) => write!(f, "{}", ext.value),
            Value::HostAliasRef(name) => write!(f, "@{name}"),
            Value::PatternMatcher(_) => write!(f, "<pattern>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_empty_list_is_false() {
        assert!(!Value::new_list(vec![]).truthy());
    }

    #[test]
    fn structural_eq_across_external_wrapper() {
        let inner = Value::Integer(5);
        let wrapped = Value::External(Arc::new(ExternalValue {
            owner: RoutineId(1),
            owner_context: Context::new(vec![], vec![], vec![]),
            value: Box::new(Value::Integer(5)),
        }));
        assert!(inner.structural_eq(&wrapped));
    }

    #[test]
    fn self_referential_list_equality_terminates() {
        let list = Arc::new(Mutex::new(vec![Value::Integer(1)]));
        let self_ref = Value::List(list.clone());
        list.lock().unwrap().push(self_ref.clone());
        // Comparing the cyclic value against itself must terminate and
        // report equal.
        assert!(self_ref.structural_eq(&self_ref));
    }

    #[test]
    fn integer_and_float_compare_numerically() {
        assert!(Value::Integer(2).structural_eq(&Value::Float(2.0)));
    }
}

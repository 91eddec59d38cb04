//! Host-function registration and the calling convention: a host function
//! receives either `(Context, args)` or, if declared `contextless`, bare
//! `args` plus a `Contextless-call` permission check performed by the
//! caller before dispatch.
//!
//! A per-category `register(&mut Environment)` function populates a
//! name-keyed table, driven by the `#[host_fn]` proc macro (see
//! `permitscript-macros`). Every host function in this crate shares one
//! signature (`HostFn`) so the macro's emitted
//! `registry.register(HostEntry { func: #fn_name, .. })` type-checks
//! whether or not the function reads the context.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::context::Context;
use crate::error::{Error, RuntimeErrorKind};
use crate::value::Value;

/// Everything a host function needs for one invocation. `context` is
/// always present at the Rust level — whether a permission must be
/// checked before the call depends on `HostEntry::contextless`, not on
/// whether this struct carries a context.
pub struct HostCall<'a> {
    pub context: &'a Arc<Context>,
    pub args: &'a [Value],
    /// For method-style calls (`$x.upper()`), the receiver value.
    pub receiver: Option<&'a Value>,
}

impl<'a> HostCall<'a> {
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn require_arg(&self, fn_name: &str, index: usize) -> Result<&Value, Error> {
        self.arg(index).ok_or_else(|| {
            Error::arity_mismatch(None, fn_name, format!("at least {}", index + 1), self.args.len())
        })
    }

    pub fn require_string(&self, fn_name: &str, index: usize) -> Result<&str, Error> {
        match self.require_arg(fn_name, index)? {
            Value::Str(s) => Ok(s.as_str()),
            other => Err(Error::type_mismatch(None, fn_name, "string", other.type_name())),
        }
    }

    pub fn require_path(&self, fn_name: &str, index: usize) -> Result<&std::path::Path, Error> {
        match self.require_arg(fn_name, index)? {
            Value::Path(p) => Ok(p.as_path()),
            other => Err(Error::type_mismatch(None, fn_name, "path", other.type_name())),
        }
    }

    pub fn require_integer(&self, fn_name: &str, index: usize) -> Result<i64, Error> {
        match self.require_arg(fn_name, index)? {
            Value::Integer(i) => Ok(*i),
            other => Err(Error::type_mismatch(None, fn_name, "integer", other.type_name())),
        }
    }

    /// Arguments from `index` onward, for a variadic last parameter: a
    /// host function's final parameter may absorb any remaining
    /// positional arguments.
    pub fn variadic_from(&self, index: usize) -> &[Value] {
        if index >= self.args.len() {
            &[]
        } else {
            &self.args[index..]
        }
    }
}

pub type HostFn = fn(&HostCall) -> Result<Value, Error>;

#[derive(Clone)]
pub struct HostEntry {
    pub name: String,
    pub contextless: bool,
    pub receiver: Option<String>,
    pub description: String,
    pub func: HostFn,
}

#[derive(Clone, Default)]
pub struct HostRegistry {
    entries: IndexMap<String, HostEntry>,
}

impl HostRegistry {
    pub fn new() -> Self {
        HostRegistry { entries: IndexMap::new() }
    }

    pub fn register(&mut self, entry: HostEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&HostEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostEntry> {
        self.entries.values()
    }

    /// Invokes a registered host function by name, converting a missing
    /// registration into a `Runtime::Custom` error — unknown host calls
    /// are a runtime, not a check-time, failure since imported modules
    /// may register functions the checker never sees.
    pub fn call(&self, name: &str, call: &HostCall) -> Result<Value, Error> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| Error::runtime(None, RuntimeErrorKind::Custom(format!("unknown host function: {name}"))))?;
        (entry.func)(call)
    }

    /// Markdown rendering for `--describe-host-fns`, grouped by name, used
    /// with `termimad` in `main.rs`.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        for entry in self.entries.values() {
            out.push_str(&format!("## {}\n\n", entry.name));
            if entry.contextless {
                out.push_str("_contextless_\n\n");
            }
            if let Some(r) = &entry.receiver {
                out.push_str(&format!("receiver: `{r}`\n\n"));
            }
            if !entry.description.is_empty() {
                out.push_str(&entry.description);
                out.push_str("\n\n");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{Entity, Kind, Permission};

    fn noop(_call: &HostCall) -> Result<Value, Error> {
        Ok(Value::Nil)
    }

    #[test]
    fn register_then_call_by_name() {
        let mut registry = HostRegistry::new();
        registry.register(HostEntry {
            name: "noop".to_string(),
            contextless: true,
            receiver: None,
            description: "does nothing".to_string(),
            func: noop,
        });
        let ctx = Context::new(vec![], vec![], vec![]);
        let call = HostCall { context: &ctx, args: &[], receiver: None };
        let result = registry.call("noop", &call).unwrap();
        assert!(matches!(result, Value::Nil));
    }

    #[test]
    fn calling_unregistered_name_is_a_runtime_error() {
        let registry = HostRegistry::new();
        let ctx = Context::new(vec![], vec![], vec![]);
        let call = HostCall { context: &ctx, args: &[], receiver: None };
        assert!(registry.call("missing", &call).is_err());
    }

    #[test]
    fn require_string_reports_type_mismatch() {
        let ctx = Context::new(
            vec![Permission::Filesystem { kind: Kind::Read, entity: Entity::path("/") }],
            vec![],
            vec![],
        );
        let args = vec![Value::Integer(1)];
        let call = HostCall { context: &ctx, args: &args, receiver: None };
        assert!(call.require_string("fs.read", 0).is_err());
    }
}

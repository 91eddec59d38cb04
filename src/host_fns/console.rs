//! `print`, `println`, `eprintln`: console output callables, called bare
//! and unqualified by any category prefix.
//!
//! Space-joined arguments rendered through `Value`'s own `Display`. These
//! are gated behind a `Contextless-call` permission rather than being
//! unconditionally available — a script must
//! `require { use: { contextless: { name: "print" } } }` (or `println`)
//! before it can write to the process's stdout/stderr.

use permitscript_macros::host_fn;

use crate::error::Error;
use crate::host::{HostCall, HostRegistry};
use crate::value::Value;

fn join_args(call: &HostCall) -> String {
    call.args.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
}

/// Writes its arguments to stdout, space-separated, without a trailing
/// newline. Returns nil.
#[host_fn(name = "print", contextless)]
pub fn print(call: &HostCall) -> Result<Value, Error> {
    print!("{}", join_args(call));
    Ok(Value::Nil)
}

/// Writes its arguments to stdout, space-separated, followed by a newline.
/// Returns nil.
#[host_fn(name = "println", contextless)]
pub fn println(call: &HostCall) -> Result<Value, Error> {
    println!("{}", join_args(call));
    Ok(Value::Nil)
}

/// Writes its arguments to stderr, space-separated, followed by a newline.
/// Returns nil.
#[host_fn(name = "eprintln", contextless)]
pub fn eprintln(call: &HostCall) -> Result<Value, Error> {
    eprintln!("{}", join_args(call));
    Ok(Value::Nil)
}

pub fn register(registry: &mut HostRegistry) {
    register_print(registry);
    register_println(registry);
    register_eprintln(registry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn print_joins_args_with_spaces_and_returns_nil() {
        let ctx = Context::new(vec![], vec![], vec![]);
        let args = vec![Value::Str("a".to_string()), Value::Integer(1)];
        let call = HostCall { context: &ctx, args: &args, receiver: None };
        assert!(matches!(print(&call), Ok(Value::Nil)));
    }

    #[test]
    fn registered_entries_are_contextless() {
        let mut registry = HostRegistry::new();
        register(&mut registry);
        assert!(registry.get("print").unwrap().contextless);
        assert!(registry.get("println").unwrap().contextless);
        assert!(registry.get("eprintln").unwrap().contextless);
    }
}

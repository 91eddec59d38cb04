//! End-to-end coverage of the `limits` clause in a `require` block: a
//! named total-cap limiter is exhausted exactly once its declared budget
//! is spent, through a host function that consumes it on every call.

use std::sync::Arc;

use permitscript::context::Context;
use permitscript::error::Result;
use permitscript::eval::Evaluator;
use permitscript::globals::GlobalScope;
use permitscript::host::{HostCall, HostEntry, HostRegistry};
use permitscript::value::Value;

fn run(source: &str) -> Result<Value> {
    let module = permitscript::parse_and_check(source)?;
    let ctx = Context::new(vec![], vec![], vec![]);
    let globals = GlobalScope::new();
    let ev = Evaluator::new(Arc::new(spend_registry()));
    ev.eval_module(&module, ctx, globals)
}

/// A contextless host function that takes one token from a limiter
/// named "quota" on every call, the same pattern `fs.read`/`fs.write`
/// use against their own byte-rate limiters.
fn spend_registry() -> HostRegistry {
    let mut registry = HostRegistry::new();
    registry.register(HostEntry {
        name: "spend".to_string(),
        contextless: true,
        receiver: None,
        description: String::new(),
        func: |call: &HostCall| {
            call.context.take("quota", 1.0)?;
            Ok(Value::Nil)
        },
    });
    registry
}

#[test]
fn a_limiter_with_no_declared_limitation_never_blocks() {
    let v = run(
        "require { use: { contextless: { name: \"spend\" } } }\n\
         spend()\n\
         spend()\n\
         return true",
    )
    .unwrap();
    assert!(matches!(v, Value::Bool(true)));
}

#[test]
fn a_total_cap_limiter_is_exhausted_after_its_budget_is_spent() {
    let err = run(
        "require { use: { contextless: { name: \"spend\" } }, limits: { quota: 1 } }\n\
         spend()\n\
         spend()\n\
         return true",
    )
    .unwrap_err();
    assert!(!err.is_permission());
}

#[test]
fn a_total_cap_limiter_allows_calls_within_its_budget() {
    let v = run(
        "require { use: { contextless: { name: \"spend\" } }, limits: { quota: 2 } }\n\
         spend()\n\
         spend()\n\
         return true",
    )
    .unwrap();
    assert!(matches!(v, Value::Bool(true)));
}

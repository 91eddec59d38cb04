//! End-to-end coverage of `sr` (spawn) and `WaitResult`, the routine
//! primitives threaded through a capability-bearing child context.

use std::sync::Arc;

use permitscript::context::Context;
use permitscript::error::Result;
use permitscript::eval::Evaluator;
use permitscript::globals::GlobalScope;
use permitscript::host::{HostCall, HostEntry, HostRegistry};
use permitscript::value::Value;

fn run(source: &str) -> Result<Value> {
    run_with_registry(source, HostRegistry::new())
}

fn run_with_registry(source: &str, registry: HostRegistry) -> Result<Value> {
    let module = permitscript::parse_and_check(source)?;
    let ctx = Context::new(vec![], vec![], vec![]);
    let globals = GlobalScope::new();
    let ev = Evaluator::new(Arc::new(registry));
    ev.eval_module(&module, ctx, globals)
}

fn priv_op_registry() -> HostRegistry {
    let mut registry = HostRegistry::new();
    registry.register(HostEntry {
        name: "priv_op".to_string(),
        contextless: true,
        receiver: None,
        description: String::new(),
        func: |_call: &HostCall| Ok(Value::Integer(1)),
    });
    registry
}

#[test]
fn spawning_a_routine_without_the_create_permission_is_denied() {
    let err = run("$h = sr nil nil { return 1 }\nreturn $h.WaitResult()").unwrap_err();
    assert!(err.is_permission());
}

#[test]
fn embedded_module_body_runs_and_its_result_is_joined() {
    let v = run(
        "require { use: { routines: true } }\n\
         $h = sr nil nil { return 1 }\n\
         return $h.WaitResult()",
    )
    .unwrap();
    assert!(matches!(v, Value::Integer(1)));
}

#[test]
fn a_call_body_spawn_inherits_the_parents_full_grant_snapshot() {
    // Unlike an embedded module (which only gets what its own `require`
    // names, intersected against the parent), a bare-call spawn body
    // derives from the parent's entire current grant set.
    let v = run_with_registry(
        "require { use: { routines: true } }\n\
         require { use: { contextless: { name: \"priv_op\" } } }\n\
         $h = sr nil nil priv_op()\n\
         return $h.WaitResult()",
        priv_op_registry(),
    )
    .unwrap();
    assert!(matches!(v, Value::Integer(1)));
}

#[test]
fn named_group_collects_every_handle_spawned_under_it() {
    let v = run(
        "require { use: { routines: true } }\n\
         sr g nil { return 1 }\n\
         sr g nil { return 2 }\n\
         $total = 0\n\
         for v in $g.WaitResult() { $total = ($total + $v) }\n\
         return $total",
    )
    .unwrap();
    assert!(matches!(v, Value::Integer(3)));
}

#[test]
fn an_embedded_modules_own_require_cannot_exceed_the_parents_grants() {
    // The embedded module grants itself a contextless-call permission the
    // parent context never had, so `Context::derive` intersects it away
    // to nothing: the routine's own `require` block names it, but the
    // call is still denied.
    let err = run_with_registry(
        "require { use: { routines: true } }\n\
         $h = sr nil nil { require { use: { contextless: { name: \"priv_op\" } } } return priv_op() }\n\
         return $h.WaitResult()",
        priv_op_registry(),
    )
    .unwrap_err();
    assert!(err.is_permission());
}

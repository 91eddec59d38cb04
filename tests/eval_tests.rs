//! End-to-end coverage exercising the full parse → check → evaluate
//! pipeline against a registered host function set, the way an embedder
//! actually drives this crate.

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

#[test]
fn module_level_function_is_hoisted_and_callable() {
    let v = run("fn add(a, b) { return $a + $b }\nreturn add(2, 3)").unwrap();
    assert!(matches!(v, Value::Integer(5)));
}

#[test]
fn recursive_call_respects_the_stack_permission_ceiling() {
    let err = run("fn rec(n) { return rec($n) }\nrequire { use: { stack: 3 } }\nreturn rec(1)").unwrap_err();
    assert!(err.is_permission());
}

#[test]
fn recursive_call_without_a_stack_permission_uses_the_default_ceiling() {
    // No `require` grants a `Permission::Stack`, so the evaluator's
    // built-in default ceiling still stops unbounded recursion.
    let err = run("fn rec(n) { return rec($n) }\nreturn rec(1)").unwrap_err();
    assert!(err.is_permission());
}

fn noop_registry() -> HostRegistry {
    let mut registry = HostRegistry::new();
    registry.register(HostEntry {
        name: "noop".to_string(),
        contextless: true,
        receiver: None,
        description: String::new(),
        func: |_call: &HostCall| Ok(Value::Nil),
    });
    registry
}

#[test]
fn contextless_host_call_is_denied_without_a_matching_permission() {
    let err = run_with_registry("noop()", noop_registry()).unwrap_err();
    assert!(err.is_permission());
}

#[test]
fn contextless_host_call_succeeds_once_the_permission_is_granted() {
    let v = run_with_registry(
        "require { use: { contextless: { name: \"noop\" } } }\nreturn noop()",
        noop_registry(),
    )
    .unwrap();
    assert!(matches!(v, Value::Nil));
}

#[test]
fn for_loop_over_an_object_visits_every_key() {
    let v = run(
        "$total = 0\n\
         $obj = {a: 1, b: 2, c: 3}\n\
         for k, val in $obj { $total = ($total + $val) }\n\
         return $total",
    )
    .unwrap();
    assert!(matches!(v, Value::Integer(6)));
}

#[test]
fn if_else_picks_the_matching_branch() {
    let v = run("$x = 5\nif ($x > 3) { return \"big\" } else { return \"small\" }").unwrap();
    assert!(matches!(v, Value::Str(ref s) if s == "big"));
}

#[test]
fn multi_assign_destructures_a_list_positionally() {
    let v = run("assign $a $b = [1, 2]\nreturn ($a + $b)").unwrap();
    assert!(matches!(v, Value::Integer(3)));
}

#[test]
fn import_without_a_configured_fetcher_fails() {
    let err = run(r#"import mod "https://example.com/mod.ps" "deadbeef" {} allow {}"#).unwrap_err();
    assert!(!err.is_permission());
}

#[test]
fn drop_permissions_is_irreversible_within_one_module() {
    let err = run(
        "require { read: { globals: \"A\" } }\n\
         const ( A = 1 )\n\
         drop { read: { globals: \"A\" } }\n\
         return $$A",
    )
    .unwrap_err();
    assert!(err.is_permission());
}

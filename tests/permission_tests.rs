//! End-to-end coverage of the permission inclusion preorder and
//! irreversible `drop`, driven through actual `require`/`drop` script
//! syntax rather than constructing `Permission` values directly.

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
    let ev = Evaluator::new(Arc::new(check_fs_registry()));
    ev.eval_module(&module, ctx, globals)
}

/// Reports whether the calling context currently holds a read permission
/// on the path it's given, without touching any real filesystem.
fn check_fs_registry() -> HostRegistry {
    use permitscript::permission::{Entity, Kind, Permission};
    let mut registry = HostRegistry::new();
    registry.register(HostEntry {
        name: "check_fs".to_string(),
        contextless: true,
        receiver: None,
        description: String::new(),
        func: |call: &HostCall| {
            let path = call.require_path("check_fs", 0)?;
            let perm = Permission::Filesystem { kind: Kind::Read, entity: Entity::path(&path.to_string_lossy()) };
            Ok(Value::Bool(call.context.has(&perm)))
        },
    });
    registry
}

#[test]
fn a_prefix_grant_covers_a_child_path() {
    let v = run(
        "require { use: { contextless: { name: \"check_fs\" } }, read: { fs: /var/log/... } }\n\
         return check_fs(/var/log/app.log)",
    )
    .unwrap();
    assert!(matches!(v, Value::Bool(true)));
}

#[test]
fn a_prefix_grant_does_not_cover_a_sibling_path() {
    let v = run(
        "require { use: { contextless: { name: \"check_fs\" } }, read: { fs: /var/log/... } }\n\
         return check_fs(/etc/passwd)",
    )
    .unwrap();
    assert!(matches!(v, Value::Bool(false)));
}

#[test]
fn an_exact_grant_does_not_cover_a_different_exact_path() {
    let v = run(
        "require { use: { contextless: { name: \"check_fs\" } }, read: { fs: /var/log/app.log } }\n\
         return check_fs(/var/log/other.log)",
    )
    .unwrap();
    assert!(matches!(v, Value::Bool(false)));
}

#[test]
fn dropping_a_permission_makes_a_later_require_of_the_same_grant_ineffective() {
    // `drop` adds the permission to the forbidden set, which always wins
    // over the granted set regardless of how many times it's re-required
    // afterward within the same context.
    let err = run(
        "require { use: { contextless: { name: \"check_fs\" } }, read: { fs: /var/log/... } }\n\
         drop { read: { fs: /var/log/... } }\n\
         require { read: { fs: /var/log/... } }\n\
         return check_fs(/var/log/app.log)",
    );
    // check_fs itself never errors (it only reports a bool), so this
    // exercises the forbidden-always-wins rule through its return value
    // rather than through a permission error.
    assert!(matches!(err.unwrap(), Value::Bool(false)));
}

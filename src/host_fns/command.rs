//! `command.run`: the subprocess host function gated by
//! `Permission::Command`'s name-plus-subcommand-prefix rule.
//!
//! Built on `sandbox.rs`'s own `run_command`, whose doc comment already
//! names this module as the place its one permission check happens — the
//! sandbox only enforces `SandboxConfig::command.enabled`.

use permitscript_macros::host_fn;

use crate::error::Error;
use crate::host::{HostCall, HostRegistry};
use crate::permission::{Kind, Permission};
use crate::value::Value;

/// Runs `name` with `subcommands` as its leading positional arguments,
/// followed by the rest of `args`, and returns an object with `stdout`,
/// `stderr`, and `status` fields.
///
/// Requires `use.commands.<name>: [<subcommands>...]` for a subcommand
/// list that is a prefix of (or equal to) the one actually invoked — an
/// empty granted list only covers invoking `name` with no subcommand at
/// all.
#[host_fn(name = "command.run")]
pub fn command_run(call: &HostCall) -> Result<Value, Error> {
    let name = call.require_string("command.run", 0)?.to_string();
    let rest = call.variadic_from(1);
    let mut subcommands = Vec::new();
    for v in rest {
        match v {
            Value::Str(s) => subcommands.push(s.clone()),
            other => return Err(Error::type_mismatch(None, "command.run", "string", other.type_name())),
        }
    }

    let perm = Permission::Command { kind: Kind::Use, name: name.clone(), subcommands: subcommands.clone() };
    if !call.context.has(&perm) {
        return Err(Error::permission(None, format!("command {name}"), format!("{perm:?}")));
    }

    let (stdout, stderr, status) = sandbox().run_command(&name, &subcommands)?;
    let mut out = indexmap::IndexMap::new();
    out.insert("stdout".to_string(), Value::Str(stdout));
    out.insert("stderr".to_string(), Value::Str(stderr));
    out.insert("status".to_string(), Value::Integer(status as i64));
    Ok(Value::new_object(out))
}

fn sandbox() -> &'static crate::sandbox::Sandbox {
    super::sandbox()
}

pub fn register(registry: &mut HostRegistry) {
    register_command_run(registry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn run_without_permission_is_denied() {
        let ctx = Context::new(vec![], vec![], vec![]);
        let args = vec![Value::Str("git".to_string()), Value::Str("status".to_string())];
        let call = HostCall { context: &ctx, args: &args, receiver: None };
        assert!(command_run(&call).unwrap_err().is_permission());
    }

    #[test]
    fn non_string_subcommand_is_a_type_error() {
        let ctx = Context::new(
            vec![Permission::Command { kind: Kind::Use, name: "git".to_string(), subcommands: vec![] }],
            vec![],
            vec![],
        );
        let args = vec![Value::Str("git".to_string()), Value::Integer(1)];
        let call = HostCall { context: &ctx, args: &args, receiver: None };
        assert!(command_run(&call).is_err());
    }
}

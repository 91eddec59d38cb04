//! `fs.read`, `fs.write`, `fs.exists`, `fs.size`, `fs.list`: the filesystem
//! host functions gated by the filesystem permission category.
//!
//! Named with the dotted `fs.*` names used by the permission category;
//! each checks a `Permission::Filesystem` grant (and takes from a
//! matching byte-rate `Limitation`, when one is declared) before calling
//! into `sandbox.rs`.

use std::path::Path;

use permitscript_macros::host_fn;

use crate::error::Error;
use crate::host::{HostCall, HostRegistry};
use crate::permission::{Entity, Kind, Permission};
use crate::value::Value;

fn require_fs(call: &HostCall, kind: Kind, path: &Path) -> Result<(), Error> {
    let perm = Permission::Filesystem { kind, entity: Entity::path(&path.to_string_lossy()) };
    if call.context.has(&perm) {
        Ok(())
    } else {
        Err(Error::permission(None, format!("fs {:?} {}", kind, path.display()), format!("{perm:?}")))
    }
}

/// Reads a file's contents as a UTF-8 string.
#[host_fn(name = "fs.read")]
pub fn fs_read(call: &HostCall) -> Result<Value, Error> {
    let path = call.require_path("fs.read", 0)?;
    require_fs(call, Kind::Read, path)?;
    let bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if bytes > 0 {
        call.context.take("fs.read", bytes as f64)?;
    }
    sandbox().read_file(path).map(Value::Str).map_err(Into::into)
}

/// Writes a string to a file, creating it if it doesn't exist.
#[host_fn(name = "fs.write")]
pub fn fs_write(call: &HostCall) -> Result<Value, Error> {
    let path = call.require_path("fs.write", 0)?;
    let contents = call.require_string("fs.write", 1)?;
    require_fs(call, Kind::Update, path)?;
    call.context.take("fs.write", contents.len() as f64)?;
    sandbox().write_file(path, contents).map(|_| Value::Bool(true)).map_err(Into::into)
}

/// Reports whether a file exists and is reachable under the sandbox root.
#[host_fn(name = "fs.exists")]
pub fn fs_exists(call: &HostCall) -> Result<Value, Error> {
    let path = call.require_path("fs.exists", 0)?;
    require_fs(call, Kind::Read, path)?;
    Ok(Value::Bool(sandbox().file_exists(path)))
}

/// Returns a file's size in bytes.
#[host_fn(name = "fs.size")]
pub fn fs_size(call: &HostCall) -> Result<Value, Error> {
    let path = call.require_path("fs.size", 0)?;
    require_fs(call, Kind::Read, path)?;
    sandbox().file_size(path).map(|n| Value::Integer(n as i64)).map_err(Into::into)
}

/// Lists the entries of a directory.
#[host_fn(name = "fs.list")]
pub fn fs_list(call: &HostCall) -> Result<Value, Error> {
    let path = call.require_path("fs.list", 0)?;
    require_fs(call, Kind::Read, path)?;
    let names = sandbox().list_files(path)?;
    Ok(Value::new_list(names.into_iter().map(Value::Str).collect()))
}

fn sandbox() -> &'static crate::sandbox::Sandbox {
    super::sandbox()
}

pub fn register(registry: &mut HostRegistry) {
    register_fs_read(registry);
    register_fs_write(registry);
    register_fs_exists(registry);
    register_fs_size(registry);
    register_fs_list(registry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn read_without_permission_is_denied() {
        let ctx = Context::new(vec![], vec![], vec![]);
        let args = vec![Value::Path("/tmp/whatever.txt".into())];
        let call = HostCall { context: &ctx, args: &args, receiver: None };
        assert!(fs_read(&call).unwrap_err().is_permission());
    }
}

//! `http.get`, `http.post`, `http.put`, `http.delete`, `http.patch`,
//! `http.head`: the HTTP host functions gated by the HTTP permission
//! category, one per method verb.
//!
//! Built on `sandbox.rs`'s `http_request` (itself a thin `ureq` wrapper)
//! and on the filesystem module's shape in this crate — a `require_*`
//! permission check ahead of the sandbox call, a byte-rate limiter `take`
//! on the request/response bodies.

use indexmap::IndexMap;

use permitscript_macros::host_fn;

use crate::error::Error;
use crate::host::{HostCall, HostRegistry};
use crate::permission::{Entity, Kind, Permission};
use crate::value::Value;

fn require_http(call: &HostCall, kind: Kind, url: &str) -> Result<(), Error> {
    let perm = Permission::Http { kind, entity: Entity::url(url) };
    if call.context.has(&perm) {
        Ok(())
    } else {
        Err(Error::permission(None, format!("http {kind:?} {url}"), format!("{perm:?}")))
    }
}

fn headers_from(value: Option<&Value>) -> Result<Vec<(String, String)>, Error> {
    let Some(value) = value else { return Ok(Vec::new()) };
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Object(obj) => {
            let obj = obj.lock().unwrap();
            obj.iter()
                .filter(|(k, _)| k.as_str() != crate::value::IMPLICIT_KEY_LEN_KEY)
                .map(|(k, v)| match v {
                    Value::Str(s) => Ok((k.clone(), s.clone())),
                    other => Err(Error::type_mismatch(None, "http headers", "string", other.type_name())),
                })
                .collect()
        }
        other => Err(Error::type_mismatch(None, "http headers", "object", other.type_name())),
    }
}

fn require_url_arg(call: &HostCall, fn_name: &str, index: usize) -> Result<String, Error> {
    match call.require_arg(fn_name, index)? {
        Value::Url(s) | Value::Str(s) => Ok(s.clone()),
        other => Err(Error::type_mismatch(None, fn_name, "url", other.type_name())),
    }
}

fn request(call: &HostCall, method: &str, kind: Kind, body_arg: Option<usize>) -> Result<Value, Error> {
    let url = require_url_arg(call, method, 0)?;
    require_http(call, kind, &url)?;
    let headers = headers_from(call.arg(1))?;
    let body = match body_arg {
        Some(idx) => match call.arg(idx) {
            Some(Value::Str(s)) => Some(s.clone()),
            Some(Value::Nil) | None => None,
            Some(other) => return Err(Error::type_mismatch(None, method, "string", other.type_name())),
        },
        None => None,
    };
    if let Some(b) = &body {
        call.context.take(method, b.len() as f64)?;
    }
    let response = super::sandbox().http_request(&url, method, &headers, body.as_deref(), None)?;
    call.context.take(method, response.body.len() as f64)?;

    let mut out = IndexMap::new();
    out.insert("status".to_string(), Value::Integer(response.status as i64));
    out.insert("body".to_string(), Value::Str(response.body));
    let mut header_obj = IndexMap::new();
    for (k, v) in response.headers {
        header_obj.insert(k, Value::Str(v));
    }
    out.insert("headers".to_string(), Value::new_object(header_obj));
    Ok(Value::new_object(out))
}

/// Issues an HTTP GET, returning an object with `status`, `body`, and
/// `headers` fields. The second, optional argument is an object of
/// request headers.
#[host_fn(name = "http.get")]
pub fn http_get(call: &HostCall) -> Result<Value, Error> {
    request(call, "GET", Kind::Read, None)
}

/// Issues an HTTP POST with the string body in argument position 2.
#[host_fn(name = "http.post")]
pub fn http_post(call: &HostCall) -> Result<Value, Error> {
    request(call, "POST", Kind::Update, Some(2))
}

/// Issues an HTTP PUT with the string body in argument position 2.
#[host_fn(name = "http.put")]
pub fn http_put(call: &HostCall) -> Result<Value, Error> {
    request(call, "PUT", Kind::Update, Some(2))
}

/// Issues an HTTP PATCH with the string body in argument position 2.
#[host_fn(name = "http.patch")]
pub fn http_patch(call: &HostCall) -> Result<Value, Error> {
    request(call, "PATCH", Kind::Update, Some(2))
}

/// Issues an HTTP DELETE.
#[host_fn(name = "http.delete")]
pub fn http_delete(call: &HostCall) -> Result<Value, Error> {
    request(call, "DELETE", Kind::Update, None)
}

/// Issues an HTTP HEAD, returning headers without a body.
#[host_fn(name = "http.head")]
pub fn http_head(call: &HostCall) -> Result<Value, Error> {
    request(call, "HEAD", Kind::Read, None)
}

pub fn register(registry: &mut HostRegistry) {
    register_http_get(registry);
    register_http_post(registry);
    register_http_put(registry);
    register_http_patch(registry);
    register_http_delete(registry);
    register_http_head(registry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn get_without_permission_is_denied() {
        let ctx = Context::new(vec![], vec![], vec![]);
        let args = vec![Value::Str("https://example.com/widgets".to_string())];
        let call = HostCall { context: &ctx, args: &args, receiver: None };
        assert!(http_get(&call).unwrap_err().is_permission());
    }

    #[test]
    fn headers_must_be_a_string_valued_object() {
        let ctx = Context::new(
            vec![Permission::Http { kind: Kind::Read, entity: Entity::url("https://example.com/widgets") }],
            vec![],
            vec![],
        );
        let mut bad_headers = IndexMap::new();
        bad_headers.insert("x".to_string(), Value::Integer(1));
        let args = vec![Value::Str("https://example.com/widgets".to_string()), Value::new_object(bad_headers)];
        let call = HostCall { context: &ctx, args: &args, receiver: None };
        assert!(http_get(&call).is_err());
    }
}

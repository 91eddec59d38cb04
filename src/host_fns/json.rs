//! `json.parse`, `json.stringify`: the JSON bridge, plus the
//! `value_to_json`/`json_to_value` converters other host functions (and a
//! future embedder) can call directly without going through the script
//! layer at all.
//!
//! Grounded on `serde_json::Value`'s own shape, which maps onto this
//! crate's `Value` almost structurally: object keys become `IndexMap`
//! entries (order preserved), array elements become a `List`, and
//! JSON's `null` becomes `Value::Nil`. Numbers that fit an `i64` stay
//! `Value::Integer`; everything else becomes `Value::Float`. There is no
//! JSON representation for permitscript's richer value kinds (paths, URLs,
//! rates, functions, routine handles) — stringifying one of those is a
//! runtime error rather than a silent lossy encoding.

use indexmap::IndexMap;
use serde_json::Value as Json;

use permitscript_macros::host_fn;

use crate::error::{Error, RuntimeErrorKind};
use crate::host::{HostCall, HostRegistry};
use crate::value::Value;

/// Converts a script value into JSON. Fails on value kinds JSON has no
/// representation for.
pub fn value_to_json(value: &Value) -> Result<Json, Error> {
    Ok(match value {
        Value::Nil => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(i) => Json::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::Str(s) => Json::String(s.clone()),
        Value::List(items) => {
            let items = items.lock().unwrap();
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                out.push(value_to_json(item)?);
            }
            Json::Array(out)
        }
        Value::Object(obj) => {
            let obj = obj.lock().unwrap();
            let mut out = serde_json::Map::with_capacity(obj.len());
            for (k, v) in obj.iter() {
                if k == crate::value::IMPLICIT_KEY_LEN_KEY {
                    continue;
                }
                out.insert(k.clone(), value_to_json(v)?);
            }
            Json::Object(out)
        }
        other => {
            return Err(Error::runtime(
                None,
                RuntimeErrorKind::Custom(format!("{} has no JSON representation", other.type_name())),
            ))
        }
    })
}

/// Converts a parsed JSON document into a script value.
pub fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Nil,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => Value::new_list(items.iter().map(json_to_value).collect()),
        Json::Object(entries) => {
            let mut out = IndexMap::with_capacity(entries.len());
            for (k, v) in entries {
                out.insert(k.clone(), json_to_value(v));
            }
            Value::new_object(out)
        }
    }
}

/// Parses a JSON-encoded string into a script value.
#[host_fn(name = "json.parse")]
pub fn json_parse(call: &HostCall) -> Result<Value, Error> {
    let text = call.require_string("json.parse", 0)?;
    let parsed: Json = serde_json::from_str(text)
        .map_err(|e| Error::runtime(None, RuntimeErrorKind::Custom(format!("invalid JSON: {e}"))))?;
    Ok(json_to_value(&parsed))
}

/// Encodes a script value as a JSON string.
#[host_fn(name = "json.stringify")]
pub fn json_stringify(call: &HostCall) -> Result<Value, Error> {
    let value = call.require_arg("json.stringify", 0)?;
    let json = value_to_json(value)?;
    Ok(Value::Str(json.to_string()))
}

pub fn register(registry: &mut HostRegistry) {
    register_json_parse(registry);
    register_json_stringify(registry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn parse_then_stringify_round_trips_object_order() {
        let ctx = Context::new(vec![], vec![], vec![]);
        let args = vec![Value::Str(r#"{"b": 1, "a": 2}"#.to_string())];
        let call = HostCall { context: &ctx, args: &args, receiver: None };
        let parsed = json_parse(&call).unwrap();
        let args2 = vec![parsed];
        let call2 = HostCall { context: &ctx, args: &args2, receiver: None };
        let text = json_stringify(&call2).unwrap();
        assert!(matches!(text, Value::Str(s) if s == r#"{"b":1,"a":2}"#));
    }

    #[test]
    fn stringify_rejects_unrepresentable_values() {
        let ctx = Context::new(vec![], vec![], vec![]);
        let args = vec![Value::Path("/tmp".into())];
        let call = HostCall { context: &ctx, args: &args, receiver: None };
        assert!(json_stringify(&call).is_err());
    }
}

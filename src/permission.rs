//! Typed capability values and the inclusion preorder between them.
//!
//! The pattern-subsumption piece of the inclusion rule is reused from
//! [`crate::pattern::classify`].

use crate::error::Error;
use crate::limiter::{LimitKind, Limitation};
use crate::pattern::{classify, EntityClass, Pattern};
use crate::value::{Value, IMPLICIT_KEY_LEN_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Read,
    Update,
    Create,
    Use,
    Consume,
    Provide,
}

/// A filesystem path, HTTP URL, or HTTP host, each possibly a pattern
/// (prefix, via a terminal `...`, or a host glob containing `*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Path(EntityClass),
    Url(EntityClass),
    Host(EntityClass),
}

impl Entity {
    pub fn path(text: &str) -> Self {
        Entity::Path(classify(text))
    }

    pub fn url(text: &str) -> Self {
        Entity::Url(classify(text))
    }

    pub fn host(text: &str) -> Self {
        Entity::Host(classify(text))
    }

    /// Does `self` (as granted) cover `other` (as requested)?
    fn covers(&self, other: &Entity) -> bool {
        match (self, other) {
            (Entity::Path(a), Entity::Path(b)) => class_covers(a, b, false),
            (Entity::Url(a), Entity::Url(b)) => class_covers(a, b, false),
            (Entity::Host(a), Entity::Host(b)) => class_covers(a, b, true),
            _ => false,
        }
    }
}

fn class_covers(granted: &EntityClass, requested: &EntityClass, host_style: bool) -> bool {
    match (granted, requested) {
        (EntityClass::Exact(a), EntityClass::Exact(b)) => a == b,
        (EntityClass::Prefix(a), EntityClass::Exact(b)) => b.starts_with(a.as_str()),
        (EntityClass::Prefix(a), EntityClass::Prefix(b)) => b.starts_with(a.as_str()),
        (EntityClass::Glob(a), EntityClass::Exact(b)) if host_style => host_glob_matches(a, b),
        (EntityClass::Glob(a), EntityClass::Glob(b)) if host_style => a == b,
        _ => false,
    }
}

fn host_glob_matches(pattern: &str, candidate: &str) -> bool {
    let pat: Vec<&str> = pattern.split('.').collect();
    let cand: Vec<&str> = candidate.split('.').collect();
    pat.len() == cand.len()
        && pat.iter().zip(cand.iter()).all(|(p, c)| *p == "*" || p == c)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    Filesystem { kind: Kind, entity: Entity },
    Http { kind: Kind, entity: Entity },
    GlobalVar { kind: Kind, name: String },
    Routine { kind: Kind },
    Command { kind: Kind, name: String, subcommands: Vec<String> },
    Stack { kind: Kind, max: u64 },
    ContextlessCall { kind: Kind, name: String, receiver: Option<String> },
}

impl Permission {
    pub fn kind(&self) -> Kind {
        match self {
            Permission::Filesystem { kind, .. }
            | Permission::Http { kind, .. }
            | Permission::GlobalVar { kind, .. }
            | Permission::Routine { kind }
            | Permission::Command { kind, .. }
            | Permission::Stack { kind, .. }
            | Permission::ContextlessCall { kind, .. } => *kind,
        }
    }

    /// Does `self` (as granted) authorize every effect `other` authorizes?
    pub fn includes(&self, other: &Permission) -> bool {
        if self.kind() != other.kind() {
            return false;
        }
        match (self, other) {
            (Permission::Filesystem { entity: a, .. }, Permission::Filesystem { entity: b, .. }) => {
                a.covers(b)
            }
            (Permission::Http { entity: a, .. }, Permission::Http { entity: b, .. }) => a.covers(b),
            (Permission::GlobalVar { name: a, .. }, Permission::GlobalVar { name: b, .. }) => {
                a == "*" || a == b
            }
            (Permission::Routine { .. }, Permission::Routine { .. }) => true,
            (
                Permission::Command { name: n1, subcommands: a, .. },
                Permission::Command { name: n2, subcommands: b, .. },
            ) => n1 == n2 && a.starts_with(b.as_slice()),
            (Permission::Stack { max: a, .. }, Permission::Stack { max: b, .. }) => a >= b,
            (
                Permission::ContextlessCall { name: n1, receiver: r1, .. },
                Permission::ContextlessCall { name: n2, receiver: r2, .. },
            ) => n1 == n2 && r1 == r2,
            _ => false,
        }
    }
}

fn kind_from_str(s: &str) -> Option<Kind> {
    match s {
        "read" => Some(Kind::Read),
        "update" => Some(Kind::Update),
        "create" => Some(Kind::Create),
        "use" => Some(Kind::Use),
        "consume" => Some(Kind::Consume),
        "provide" => Some(Kind::Provide),
        _ => None,
    }
}

fn object_entries(v: &Value, where_: &str) -> Result<Vec<(String, Value)>, Error> {
    match v {
        Value::Object(o) => Ok(o
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.as_str() != IMPLICIT_KEY_LEN_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()),
        other => Err(Error::custom(
            None,
            format!("{where_} must be an object, got {}", other.type_name()),
        )),
    }
}

fn each_leaf(v: &Value, mut f: impl FnMut(&Value) -> Result<(), Error>) -> Result<(), Error> {
    match v {
        Value::List(items) => {
            for item in items.lock().unwrap().iter() {
                f(item)?;
            }
            Ok(())
        }
        other => f(other),
    }
}

fn fs_entity(v: &Value) -> Result<Entity, Error> {
    match v {
        Value::Path(p) => Ok(Entity::path(&p.to_string_lossy())),
        Value::Str(s) => Ok(Entity::path(s)),
        Value::PathPattern(pat) => match pat.as_ref() {
            Pattern::Path { text, prefix: true } => Ok(Entity::Path(EntityClass::Prefix(text.clone()))),
            Pattern::Path { text, prefix: false } => Ok(Entity::path(text)),
            _ => Err(Error::custom(None, "expected a path or path-pattern value")),
        },
        other => Err(Error::custom(
            None,
            format!("expected a path or path-pattern value, got {}", other.type_name()),
        )),
    }
}

fn http_entity(v: &Value) -> Result<Entity, Error> {
    match v {
        Value::Url(s) | Value::Str(s) => Ok(Entity::url(s)),
        Value::Host(h) => Ok(Entity::host(h)),
        Value::UrlPattern(pat) => match pat.as_ref() {
            Pattern::Url { text, prefix: true } => Ok(Entity::Url(EntityClass::Prefix(text.clone()))),
            Pattern::Url { text, prefix: false } => Ok(Entity::url(text)),
            _ => Err(Error::custom(None, "expected a URL or URL pattern value")),
        },
        Value::HostPattern(pat) => match pat.as_ref() {
            Pattern::Host { text } => Ok(Entity::Host(classify(text))),
            _ => Err(Error::custom(None, "expected a host or host-pattern value")),
        },
        other => Err(Error::custom(
            None,
            format!("expected a URL, host, or pattern value, got {}", other.type_name()),
        )),
    }
}

/// Interprets a category leaf (the value under e.g. `read: { fs: <leaf> }`)
/// into zero or more permissions of `kind` for resource category `cat` —
/// the `require { ... }` object materializes into concrete permissions.
fn parse_category(kind: Kind, cat: &str, leaf: &Value) -> Result<Vec<Permission>, Error> {
    let mut out = Vec::new();
    match cat {
        "fs" => each_leaf(leaf, |v| {
            out.push(Permission::Filesystem { kind, entity: fs_entity(v)? });
            Ok(())
        })?,
        "http" => each_leaf(leaf, |v| {
            out.push(Permission::Http { kind, entity: http_entity(v)? });
            Ok(())
        })?,
        "globals" => each_leaf(leaf, |v| {
            let name = match v {
                Value::Str(s) => s.clone(),
                other => return Err(Error::custom(None, format!("expected a string global name, got {}", other.type_name()))),
            };
            out.push(Permission::GlobalVar { kind, name });
            Ok(())
        })?,
        "routines" => {
            if leaf.truthy() {
                out.push(Permission::Routine { kind });
            }
        }
        "stack" => {
            let max = match leaf {
                Value::Integer(i) => *i as u64,
                other => return Err(Error::custom(None, format!("expected an integer stack depth, got {}", other.type_name()))),
            };
            out.push(Permission::Stack { kind, max });
        }
        "commands" => {
            for (name, chain) in object_entries(leaf, "require.use.commands")? {
                let subcommands = match &chain {
                    Value::List(items) => items
                        .lock()
                        .unwrap()
                        .iter()
                        .map(|v| match v {
                            Value::Str(s) => Ok(s.clone()),
                            other => Err(Error::custom(None, format!("expected a string subcommand, got {}", other.type_name()))),
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    Value::Str(s) => vec![s.clone()],
                    other => return Err(Error::custom(None, format!("expected a subcommand list, got {}", other.type_name()))),
                };
                out.push(Permission::Command { kind, name, subcommands });
            }
        }
        "contextless" => each_leaf(leaf, |v| {
            let entries = object_entries(v, "require.use.contextless entry")?;
            let mut name = None;
            let mut receiver = None;
            for (k, val) in entries {
                match (k.as_str(), val) {
                    ("name", Value::Str(s)) => name = Some(s),
                    ("receiver", Value::Str(s)) => receiver = Some(s),
                    ("receiver", Value::Nil) => {}
                    _ => {}
                }
            }
            let name = name.ok_or_else(|| Error::custom(None, "contextless entry is missing a `name`"))?;
            out.push(Permission::ContextlessCall { kind, name, receiver });
            Ok(())
        })?,
        other => {
            return Err(Error::custom(None, format!("unknown require category: {other}")));
        }
    }
    Ok(out)
}

fn limit_kind_from_value(v: &Value) -> Result<LimitKind, Error> {
    match v {
        Value::ByteRate(r) => Ok(LimitKind::ByteRate(*r)),
        Value::EventRate(r) => Ok(LimitKind::EventRate(*r)),
        Value::Integer(i) => Ok(LimitKind::TotalCap(*i as u64)),
        other => Err(Error::custom(
            None,
            format!("expected a byte-rate, event-rate, or integer cap, got {}", other.type_name()),
        )),
    }
}

/// Interprets an evaluated `require { ... }` object literal into the
/// permissions it grants and the limiters it declares. The top-level
/// keys are permission kinds (`read`/`update`/`create`/`use`/`consume`/
/// `provide`), each mapping to an object keyed by resource category
/// (`fs`/`http`/`globals`/`routines`/`commands`/`stack`/`contextless`); the
/// sibling key `limits` maps limiter names to a rate or total-cap value.
pub fn parse_requirement(value: &Value) -> Result<(Vec<Permission>, Vec<Limitation>), Error> {
    let mut perms = Vec::new();
    let mut limiters = Vec::new();
    for (key, val) in object_entries(value, "require block")? {
        if key == "limits" {
            for (name, limit_val) in object_entries(&val, "require.limits")? {
                limiters.push(Limitation::new(name, limit_kind_from_value(&limit_val)?));
            }
            continue;
        }
        let kind = kind_from_str(&key)
            .ok_or_else(|| Error::custom(None, format!("unknown require key: {key}")))?;
        for (cat, leaf) in object_entries(&val, &format!("require.{key}"))? {
            perms.extend(parse_category(kind, &cat, &leaf)?);
        }
    }
    Ok((perms, limiters))
}

/// Interprets a single permission-shaped object (one `kind` key, one
/// category) used by `drop <permission-expr>` — dropped permissions are
/// expressed the same way a `require` block expresses grants.
pub fn parse_permission_expr(value: &Value) -> Result<Vec<Permission>, Error> {
    let (perms, _) = parse_requirement(value)?;
    Ok(perms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use indexmap::IndexMap;

    fn obj(entries: Vec<(&str, Value)>) -> Value {
        let mut m = IndexMap::new();
        for (k, v) in entries {
            m.insert(k.to_string(), v);
        }
        Value::new_object(m)
    }

    #[test]
    fn parses_read_fs_permission() {
        let req = obj(vec![(
            "read",
            obj(vec![("fs", Value::Path("/data/a.txt".into()))]),
        )]);
        let (perms, limits) = parse_requirement(&req).unwrap();
        assert!(limits.is_empty());
        assert_eq!(
            perms,
            vec![Permission::Filesystem { kind: Kind::Read, entity: Entity::path("/data/a.txt") }]
        );
    }

    #[test]
    fn parses_global_wildcard_update() {
        let req = obj(vec![(
            "update",
            obj(vec![("globals", Value::Str("*".to_string()))]),
        )]);
        let (perms, _) = parse_requirement(&req).unwrap();
        assert_eq!(perms, vec![Permission::GlobalVar { kind: Kind::Update, name: "*".to_string() }]);
    }

    #[test]
    fn parses_limits_section() {
        let req = obj(vec![("limits", obj(vec![("fs/read", Value::ByteRate(1000.0))]))]);
        let (perms, limits) = parse_requirement(&req).unwrap();
        assert!(perms.is_empty());
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].name, "fs/read");
    }

    #[test]
    fn rejects_non_object_requirement() {
        assert!(parse_requirement(&Value::Integer(1)).is_err());
    }

    #[test]
    fn exact_filesystem_permission_self_includes() {
        let p = Permission::Filesystem {
            kind: Kind::Read,
            entity: Entity::path("/etc/hosts"),
        };
        assert!(p.includes(&p));
    }

    #[test]
    fn prefix_filesystem_permission_covers_child_path() {
        let granted = Permission::Filesystem {
            kind: Kind::Read,
            entity: Entity::path("/var/log/..."),
        };
        let requested = Permission::Filesystem {
            kind: Kind::Read,
            entity: Entity::path("/var/log/app.log"),
        };
        assert!(granted.includes(&requested));
    }

    #[test]
    fn different_kind_never_included() {
        let granted = Permission::Filesystem {
            kind: Kind::Read,
            entity: Entity::path("/var/log/..."),
        };
        let requested = Permission::Filesystem {
            kind: Kind::Update,
            entity: Entity::path("/var/log/app.log"),
        };
        assert!(!granted.includes(&requested));
    }

    #[test]
    fn global_star_covers_any_name() {
        let granted = Permission::GlobalVar {
            kind: Kind::Update,
            name: "*".to_string(),
        };
        let requested = Permission::GlobalVar {
            kind: Kind::Update,
            name: "A".to_string(),
        };
        assert!(granted.includes(&requested));
    }

    #[test]
    fn command_subcommand_prefix_rule() {
        let granted = Permission::Command {
            kind: Kind::Use,
            name: "git".to_string(),
            subcommands: vec!["commit".to_string(), "amend".to_string()],
        };
        let requested = Permission::Command {
            kind: Kind::Use,
            name: "git".to_string(),
            subcommands: vec!["commit".to_string()],
        };
        assert!(granted.includes(&requested));
        let requested_deeper = Permission::Command {
            kind: Kind::Use,
            name: "git".to_string(),
            subcommands: vec!["commit".to_string(), "amend".to_string(), "x".to_string()],
        };
        assert!(!granted.includes(&requested_deeper));
    }

    #[test]
    fn empty_subcommand_grant_covers_only_empty() {
        let granted = Permission::Command {
            kind: Kind::Use,
            name: "git".to_string(),
            subcommands: vec![],
        };
        let requested = Permission::Command {
            kind: Kind::Use,
            name: "git".to_string(),
            subcommands: vec!["commit".to_string()],
        };
        assert!(!granted.includes(&requested));
    }

    #[test]
    fn stack_depth_covers_shallower_request() {
        let granted = Permission::Stack { kind: Kind::Use, max: 100 };
        let requested = Permission::Stack { kind: Kind::Use, max: 50 };
        assert!(granted.includes(&requested));
        assert!(!requested.includes(&granted));
    }

    #[test]
    fn contextless_call_requires_exact_receiver_match() {
        let granted = Permission::ContextlessCall {
            kind: Kind::Use,
            name: "format".to_string(),
            receiver: Some("String".to_string()),
        };
        let requested = Permission::ContextlessCall {
            kind: Kind::Use,
            name: "format".to_string(),
            receiver: None,
        };
        assert!(!granted.includes(&requested));
    }
}

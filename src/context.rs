//! The per-execution capability environment.
//!
//! A parent-linked struct built with interior mutability (`Mutex`,
//! matching the crate-wide `Send + Sync` requirement), holding grant/forbid
//! sets, a limiter table, and named alias/pattern registries rather than
//! variable bindings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::limiter::Limitation;
use crate::permission::Permission;
use crate::pattern::Pattern;
use crate::value::Value;

pub struct Context {
    parent: Option<Arc<Context>>,
    granted: Mutex<Vec<Permission>>,
    forbidden: Mutex<Vec<Permission>>,
    limiters: Mutex<HashMap<String, Arc<Limitation>>>,
    host_aliases: Mutex<HashMap<String, Value>>,
    patterns: Mutex<HashMap<String, Arc<Pattern>>>,
}

impl Context {
    pub fn new(granted: Vec<Permission>, forbidden: Vec<Permission>, limits: Vec<Limitation>) -> Arc<Self> {
        let mut table = HashMap::new();
        for l in limits {
            table.insert(l.name.clone(), Arc::new(l));
        }
        Arc::new(Context {
            parent: None,
            granted: Mutex::new(granted),
            forbidden: Mutex::new(forbidden),
            limiters: Mutex::new(table),
            host_aliases: Mutex::new(HashMap::new()),
            patterns: Mutex::new(HashMap::new()),
        })
    }

    /// Creates a child context whose grants are the intersection of
    /// `granted_subset` with `self`'s effective grants. Used for
    /// routine spawn and module import.
    pub fn derive(self: &Arc<Self>, granted_subset: Vec<Permission>) -> Arc<Context> {
        let allowed: Vec<Permission> = granted_subset
            .into_iter()
            .filter(|p| self.has(p))
            .collect();
        Arc::new(Context {
            parent: Some(self.clone()),
            granted: Mutex::new(allowed),
            forbidden: Mutex::new(Vec::new()),
            limiters: Mutex::new(HashMap::new()),
            host_aliases: Mutex::new(HashMap::new()),
            patterns: Mutex::new(HashMap::new()),
        })
    }

    /// Adds `permissions` to this context's own grant set. Used by the
    /// `require { ... }` statement, which augments the *current* context
    /// mid-module rather than deriving a child one.
    pub fn grant(&self, permissions: Vec<Permission>) {
        self.granted.lock().unwrap().extend(permissions);
    }

    /// Removes `permissions` from the grant set and adds them to the
    /// forbidden set. Irreversible for this context.
    pub fn drop_permissions(&self, permissions: Vec<Permission>) {
        let mut granted = self.granted.lock().unwrap();
        let mut forbidden = self.forbidden.lock().unwrap();
        for p in permissions {
            granted.retain(|g| g != &p);
            forbidden.push(p);
        }
    }

    /// Snapshot of this context's own granted set, used when deriving a
    /// child for a bare-call spawn — the parent's current grants.
    pub fn granted_snapshot(&self) -> Vec<Permission> {
        self.granted.lock().unwrap().clone()
    }

    /// True when the granted set includes `perm` and the forbidden set
    /// does not (forbidden always wins).
    pub fn has(&self, perm: &Permission) -> bool {
        let forbidden = self.forbidden.lock().unwrap();
        if forbidden.iter().any(|f| f.includes(perm)) {
            tracing::trace!(permission = ?perm, "permission check: forbidden");
            return false;
        }
        let granted = self.granted.lock().unwrap();
        let allowed = granted.iter().any(|g| g.includes(perm));
        tracing::trace!(permission = ?perm, allowed, "permission check");
        allowed
    }

    /// Finds or lazily allocates the named limiter, then consumes
    /// `amount` from it. A limiter name with no declared limitation is
    /// effectively unbounded and always succeeds — only names the script
    /// declared under `limits` in its `require` block populate this
    /// table.
    pub fn take(&self, name: &str, amount: f64) -> Result<(), Error> {
        let limiter = {
            let table = self.limiters.lock().unwrap();
            table.get(name).cloned()
        };
        match limiter {
            Some(l) => {
                let result = l.take(amount);
                if result.is_err() {
                    tracing::warn!(limiter = name, amount, "limiter exhausted");
                } else {
                    tracing::debug!(limiter = name, amount, "limiter take");
                }
                result
            }
            None => Ok(()),
        }
    }

    pub fn define_limiter(&self, limiter: Limitation) {
        self.limiters
            .lock()
            .unwrap()
            .insert(limiter.name.clone(), Arc::new(limiter));
    }

    pub fn register_alias(&self, name: impl Into<String>, value: Value) {
        self.host_aliases.lock().unwrap().insert(name.into(), value);
    }

    pub fn lookup_alias(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.host_aliases.lock().unwrap().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup_alias(name))
    }

    pub fn register_pattern(&self, name: impl Into<String>, pattern: Arc<Pattern>) {
        self.patterns.lock().unwrap().insert(name.into(), pattern);
    }

    pub fn lookup_pattern(&self, name: &str) -> Option<Arc<Pattern>> {
        if let Some(p) = self.patterns.lock().unwrap().get(name) {
            return Some(p.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup_pattern(name))
    }

    /// The largest call-depth bound granted anywhere in this context's
    /// chain, if any `Permission::Stack` was granted. The evaluator
    /// uses this as a recursion ceiling; a context with no such grant gets
    /// the evaluator's own built-in default instead of being treated as
    /// unbounded.
    pub fn stack_limit(&self) -> Option<u64> {
        let own = self
            .granted
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| match p {
                Permission::Stack { max, .. } => Some(*max),
                _ => None,
            })
            .max();
        match (own, self.parent.as_ref().and_then(|p| p.stack_limit())) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{Entity, Kind};

    fn fs_read(path: &str) -> Permission {
        Permission::Filesystem {
            kind: Kind::Read,
            entity: Entity::path(path),
        }
    }

    #[test]
    fn has_true_when_granted_and_not_forbidden() {
        let ctx = Context::new(vec![fs_read("/data/...")], vec![], vec![]);
        assert!(ctx.has(&fs_read("/data/a.txt")));
    }

    #[test]
    fn forbidden_always_wins() {
        let ctx = Context::new(vec![fs_read("/data/...")], vec![fs_read("/data/secret.txt")], vec![]);
        assert!(!ctx.has(&fs_read("/data/secret.txt")));
        assert!(ctx.has(&fs_read("/data/public.txt")));
    }

    #[test]
    fn grant_augments_the_current_context() {
        let ctx = Context::new(vec![], vec![], vec![]);
        assert!(!ctx.has(&fs_read("/data/a.txt")));
        ctx.grant(vec![fs_read("/data/...")]);
        assert!(ctx.has(&fs_read("/data/a.txt")));
    }

    #[test]
    fn derive_intersects_with_parent_grants() {
        let parent = Context::new(vec![fs_read("/data/...")], vec![], vec![]);
        let child = parent.derive(vec![fs_read("/data/a.txt"), fs_read("/etc/passwd")]);
        assert!(child.has(&fs_read("/data/a.txt")));
        assert!(!child.has(&fs_read("/etc/passwd")));
    }

    #[test]
    fn drop_is_irreversible_for_this_context() {
        let ctx = Context::new(vec![fs_read("/data/...")], vec![], vec![]);
        ctx.drop_permissions(vec![fs_read("/data/...")]);
        assert!(!ctx.has(&fs_read("/data/a.txt")));
    }
}

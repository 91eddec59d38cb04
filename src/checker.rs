//! The structural checker: every rule that must be rejected before a
//! single statement runs, rather than surfacing as a runtime error
//! partway through evaluation.
//!
//! Validates a whole module up front before any evaluation decision
//! consults it, the same way a policy document gets validated before any
//! enforcement decision reads it — applied here to an AST instead. This
//! crate keeps checking as its own phase, separate from evaluation, so a
//! caller can `check` a parsed module without running any of it.

use std::collections::{HashMap, HashSet};

use crate::ast::{InterpPart, Node, NodeKind, ObjectEntry, ObjectPatternEntry, SpawnBody};
use crate::error::Error;
use crate::value::{IMPLICIT_KEY_LEN_KEY, MAX_OBJECT_KEY_BYTE_LEN};

/// Runs every structural rule against a parsed module. `check`
/// is idempotent and side-effect free: it never evaluates anything, only
/// walks the tree.
pub fn check(module: &Node) -> Result<(), Error> {
    tracing::debug!("checking module");
    let stmts = match &module.kind {
        NodeKind::Module(stmts) | NodeKind::EmbeddedModule(stmts) => stmts,
        _ => return Err(Error::check(module.span, "expected a module at the top level")),
    };
    check_object_keys(module)?;
    check_switch_case_literals(module)?;
    check_spawn_call_shape(module)?;
    check_module_decls(stmts)?;
    check_break_continue(module, 0)?;
    check_local_order(stmts, &mut HashSet::new())?;
    Ok(())
}

/// Every child a node holds, used by the checks that don't need to track
/// state across the traversal (object-key validation, switch-case
/// literal-ness, spawn-call shape).
fn children(node: &Node) -> Vec<&Node> {
    use NodeKind::*;
    match &node.kind {
        Integer(_) | Float(_) | Str(_) | Bool(_) | Nil | AbsolutePath(_) | RelativePath(_)
        | PathPattern { .. } | Url(_) | HttpHost(_) | HttpHostPattern(_) | UrlPattern { .. }
        | Quantity { .. } | Rate { .. } | LocalVar(_) | GlobalVar(_) | Identifier(_)
        | IdentifierMember(_) | KeyList(_) | HostAliasRef(_) | PatternIdentifier(_)
        | Break | Continue => vec![],
        Member { target, .. } => vec![target.as_ref()],
        Index { target, index } => vec![target.as_ref(), index.as_ref()],
        Slice { target, start, end } => {
            let mut v = vec![target.as_ref()];
            if let Some(s) = start { v.push(s.as_ref()); }
            if let Some(e) = end { v.push(e.as_ref()); }
            v
        }
        List(items) | ListPattern(items) => items.iter().collect(),
        Object(entries) => entries.iter().map(|e: &ObjectEntry| &e.value).collect(),
        ObjectPattern(entries) => entries.iter().map(|e: &ObjectPatternEntry| &e.pattern).collect(),
        BinaryOp { lhs, rhs, .. } => vec![lhs.as_ref(), rhs.as_ref()],
        Range { start, end, .. } => {
            let mut v = vec![];
            if let Some(s) = start { v.push(s.as_ref()); }
            if let Some(e) = end { v.push(e.as_ref()); }
            v
        }
        PathInterp(parts) => interp_holes(parts),
        UrlInterp { base, query } => {
            let mut v = interp_holes(base);
            for (_, parts) in query { v.extend(interp_holes(parts)); }
            v
        }
        FunctionExpr { body, .. } => body.iter().collect(),
        Call { callee, args, .. } => {
            let mut v = vec![callee.as_ref()];
            v.extend(args.iter());
            v
        }
        Spawn { globals, body, .. } => {
            let mut v = vec![];
            if let Some(g) = globals { v.push(g.as_ref()); }
            match body {
                SpawnBody::Call(c) => v.push(c.as_ref()),
                SpawnBody::EmbeddedModule(stmts) => v.extend(stmts.iter()),
            }
            v
        }
        Lazy(inner) | BoolConvert(inner) => vec![inner.as_ref()],
        Pipeline(stages) | PipelineStmt(stages) => stages.iter().collect(),
        PatternUnion(alts) => alts.iter().collect(),
        PatternPiece(elems) => elems.iter().map(|e| &e.pattern).collect(),
        Assign { target, value } => vec![target.as_ref(), value.as_ref()],
        MultiAssign { targets, value } => {
            let mut v: Vec<&Node> = targets.iter().collect();
            v.push(value.as_ref());
            v
        }
        If { cond, then_branch, else_branch } => {
            let mut v = vec![cond.as_ref()];
            v.extend(then_branch.iter());
            if let Some(e) = else_branch { v.extend(e.iter()); }
            v
        }
        For { iterable, body, .. } => {
            let mut v = vec![iterable.as_ref()];
            v.extend(body.iter());
            v
        }
        Switch { subject, cases } => {
            let mut v = vec![subject.as_ref()];
            for (vals, body) in cases {
                v.extend(vals.iter());
                v.extend(body.iter());
            }
            v
        }
        Match { subject, cases } => {
            let mut v = vec![subject.as_ref()];
            for (pat, body) in cases {
                v.push(pat);
                v.extend(body.iter());
            }
            v
        }
        Return(value) => value.iter().map(|b| b.as_ref()).collect(),
        FunctionDecl { body, .. } => body.iter().collect(),
        GlobalConst(bindings) => bindings.iter().map(|(_, v)| v).collect(),
        Requirement(obj) => vec![obj.as_ref()],
        PermissionDrop(exprs) => exprs.iter().collect(),
        Import { url, args, allow, .. } => vec![url.as_ref(), args.as_ref(), allow.as_ref()],
        Module(stmts) | EmbeddedModule(stmts) => stmts.iter().collect(),
    }
}

fn interp_holes(parts: &[InterpPart]) -> Vec<&Node> {
    parts
        .iter()
        .filter_map(|p| match p {
            InterpPart::Hole(n) => Some(n),
            InterpPart::Literal(_) => None,
        })
        .collect()
}

fn walk(node: &Node, f: &mut impl FnMut(&Node) -> Result<(), Error>) -> Result<(), Error> {
    f(node)?;
    for c in children(node) {
        walk(c, f)?;
    }
    Ok(())
}

// --- Object/object-pattern key rules ---

fn check_object_keys(module: &Node) -> Result<(), Error> {
    walk(module, &mut |n| match &n.kind {
        NodeKind::Object(entries) => check_object_entry_keys(entries, n),
        NodeKind::ObjectPattern(entries) => check_object_pattern_keys(entries, n),
        _ => Ok(()),
    })
}

fn check_object_entry_keys(entries: &[ObjectEntry], node: &Node) -> Result<(), Error> {
    let mut explicit = HashSet::new();
    let mut implicit_count = 0usize;
    for e in entries {
        if e.keys.is_empty() {
            implicit_count += 1;
            continue;
        }
        for k in &e.keys {
            if k.len() > MAX_OBJECT_KEY_BYTE_LEN {
                return Err(Error::check(
                    node.span,
                    format!("object key '{k}' exceeds {MAX_OBJECT_KEY_BYTE_LEN} bytes"),
                ));
            }
            if !explicit.insert(k.clone()) {
                return Err(Error::check(node.span, format!("duplicate object key: {k}")));
            }
        }
    }
    if implicit_count > 0 && explicit.contains(IMPLICIT_KEY_LEN_KEY) {
        return Err(Error::check(
            node.span,
            format!("object key collides with the reserved '{IMPLICIT_KEY_LEN_KEY}' key"),
        ));
    }
    for i in 0..implicit_count {
        let dense = i.to_string();
        if explicit.contains(&dense) {
            return Err(Error::check(
                node.span,
                format!("implicit key '{dense}' collides with an explicit key"),
            ));
        }
    }
    Ok(())
}

fn check_object_pattern_keys(entries: &[ObjectPatternEntry], node: &Node) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for e in entries {
        for k in &e.keys {
            if !seen.insert(k.clone()) {
                return Err(Error::check(node.span, format!("duplicate object-pattern key: {k}")));
            }
        }
    }
    Ok(())
}

// --- Switch case values must be literals ---

fn check_switch_case_literals(module: &Node) -> Result<(), Error> {
    walk(module, &mut |n| {
        if let NodeKind::Switch { cases, .. } = &n.kind {
            for (values, _) in cases {
                for v in values {
                    if !v.kind.is_literal() {
                        return Err(Error::check(v.span, "switch case values must be literals"));
                    }
                }
            }
        }
        Ok(())
    })
}

// --- A spawn's call position must actually be a call (tightening the
// parser's more permissive postfix-expression parse) ---

fn check_spawn_call_shape(module: &Node) -> Result<(), Error> {
    walk(module, &mut |n| {
        if let NodeKind::Spawn { body: SpawnBody::Call(callee_call), .. } = &n.kind {
            if !matches!(callee_call.kind, NodeKind::Call { .. }) {
                return Err(Error::check(
                    callee_call.span,
                    "a spawn expression's body must be a call or an embedded module",
                ));
            }
        }
        Ok(())
    })
}

// --- Function/global declaration placement, redeclaration, and
// name-collision rules ---

/// Checks one module's (or embedded module's) own statement list: no
/// function name or global constant name is declared twice, a function
/// name never collides with a global constant name, and neither kind of
/// declaration appears anywhere but this list — a nested nested nested
/// embedded module gets a fresh, independently-checked namespace.
fn check_module_decls(stmts: &[Node]) -> Result<(), Error> {
    let mut functions: HashMap<String, crate::span::Span> = HashMap::new();
    let mut globals: HashMap<String, crate::span::Span> = HashMap::new();
    for s in stmts {
        match &s.kind {
            NodeKind::FunctionDecl { name, .. } => {
                if functions.insert(name.clone(), s.span).is_some() {
                    return Err(Error::check(s.span, format!("function '{name}' declared more than once")));
                }
            }
            NodeKind::GlobalConst(bindings) => {
                for (name, _) in bindings {
                    if globals.insert(name.clone(), s.span).is_some() {
                        return Err(Error::check(
                            s.span,
                            format!("global constant '{name}' declared more than once"),
                        ));
                    }
                }
            }
            _ => {}
        }
    }
    for (name, span) in &functions {
        if globals.contains_key(name) {
            return Err(Error::check(
                *span,
                format!("function '{name}' collides with a global constant of the same name"),
            ));
        }
    }
    for s in stmts {
        match &s.kind {
            // The top-level declaration itself is fine; only decls
            // reachable *through* it (a nested `fn` inside this one's
            // body, say) are a placement error.
            NodeKind::FunctionDecl { body, .. } => {
                for c in body {
                    forbid_nested_decls(c)?;
                }
            }
            NodeKind::GlobalConst(bindings) => {
                for (_, v) in bindings {
                    forbid_nested_decls(v)?;
                }
            }
            _ => forbid_nested_decls(s)?,
        }
    }
    Ok(())
}

/// A `FunctionDecl`/`GlobalConst` reachable from here (other than through a
/// fresh embedded module, which gets its own `check_module_decls` call) is
/// a placement error.
fn forbid_nested_decls(node: &Node) -> Result<(), Error> {
    match &node.kind {
        NodeKind::FunctionDecl { name, .. } => {
            return Err(Error::check(
                node.span,
                format!("function '{name}' is declared outside module level"),
            ));
        }
        NodeKind::GlobalConst(_) => {
            return Err(Error::check(node.span, "global constants may only be declared at module level"));
        }
        NodeKind::Spawn { body: SpawnBody::EmbeddedModule(inner), globals, .. } => {
            if let Some(g) = globals {
                forbid_nested_decls(g)?;
            }
            check_module_decls(inner)?;
            return Ok(());
        }
        _ => {}
    }
    for c in children(node) {
        forbid_nested_decls(c)?;
    }
    Ok(())
}

// --- `break`/`continue` must be lexically enclosed by a `for` within the
// same module/function body ---

fn check_break_continue(node: &Node, for_depth: usize) -> Result<(), Error> {
    match &node.kind {
        NodeKind::Break | NodeKind::Continue => {
            if for_depth == 0 {
                return Err(Error::check(node.span, "break/continue must be inside a for loop"));
            }
            return Ok(());
        }
        NodeKind::For { iterable, body, .. } => {
            check_break_continue(iterable, for_depth)?;
            for s in body {
                check_break_continue(s, for_depth + 1)?;
            }
            return Ok(());
        }
        NodeKind::FunctionDecl { body, .. } | NodeKind::FunctionExpr { body, .. } => {
            for s in body {
                check_break_continue(s, 0)?;
            }
            return Ok(());
        }
        NodeKind::Spawn { globals, body, .. } => {
            if let Some(g) = globals {
                check_break_continue(g, for_depth)?;
            }
            match body {
                SpawnBody::Call(c) => check_break_continue(c, for_depth)?,
                SpawnBody::EmbeddedModule(inner) => {
                    for s in inner {
                        check_break_continue(s, 0)?;
                    }
                }
            }
            return Ok(());
        }
        _ => {}
    }
    for c in children(node) {
        check_break_continue(c, for_depth)?;
    }
    Ok(())
}

// --- Local variables must be assigned in scope before being read ---
//
// A block-scoped approximation: a name assigned inside an `if`/`for`/
// `switch`/`match` branch is known for the rest of that branch but does
// not leak to sibling branches or past the block, matching the runtime
// `Scope::define` semantics in `eval.rs`. Function bodies are checked
// independently (their own params only) since a closure's access to its
// defining scope's locals is a runtime capture, not a lexical one this
// static pass can soundly verify.

fn check_local_order(stmts: &[Node], known: &mut HashSet<String>) -> Result<(), Error> {
    for s in stmts {
        check_stmt_local_order(s, known)?;
    }
    Ok(())
}

fn check_stmt_local_order(node: &Node, known: &mut HashSet<String>) -> Result<(), Error> {
    match &node.kind {
        NodeKind::Assign { target, value } => {
            check_expr_local_order(value, known)?;
            match &target.kind {
                NodeKind::LocalVar(name) => {
                    known.insert(name.clone());
                }
                _ => check_expr_local_order(target, known)?,
            }
        }
        NodeKind::MultiAssign { targets, value } => {
            check_expr_local_order(value, known)?;
            for t in targets {
                match &t.kind {
                    NodeKind::LocalVar(name) => {
                        known.insert(name.clone());
                    }
                    _ => check_expr_local_order(t, known)?,
                }
            }
        }
        NodeKind::If { cond, then_branch, else_branch } => {
            check_expr_local_order(cond, known)?;
            let mut then_known = known.clone();
            check_local_order(then_branch, &mut then_known)?;
            if let Some(eb) = else_branch {
                let mut else_known = known.clone();
                check_local_order(eb, &mut else_known)?;
            }
        }
        NodeKind::For { key, value, iterable, body } => {
            check_expr_local_order(iterable, known)?;
            let mut body_known = known.clone();
            body_known.insert(value.clone());
            if let Some(k) = key {
                body_known.insert(k.clone());
            }
            check_local_order(body, &mut body_known)?;
        }
        NodeKind::Switch { subject, cases } => {
            check_expr_local_order(subject, known)?;
            for (values, body) in cases {
                for v in values {
                    check_expr_local_order(v, known)?;
                }
                let mut case_known = known.clone();
                check_local_order(body, &mut case_known)?;
            }
        }
        NodeKind::Match { subject, cases } => {
            check_expr_local_order(subject, known)?;
            for (pattern, body) in cases {
                check_expr_local_order(pattern, known)?;
                let mut case_known = known.clone();
                check_local_order(body, &mut case_known)?;
            }
        }
        NodeKind::Return(value) => {
            if let Some(v) = value {
                check_expr_local_order(v, known)?;
            }
        }
        NodeKind::PipelineStmt(stages) => {
            for s in stages {
                check_expr_local_order(s, known)?;
            }
        }
        NodeKind::Requirement(obj) => check_expr_local_order(obj, known)?,
        NodeKind::PermissionDrop(exprs) => {
            for e in exprs {
                check_expr_local_order(e, known)?;
            }
        }
        NodeKind::Import { url, args, allow, .. } => {
            check_expr_local_order(url, known)?;
            check_expr_local_order(args, known)?;
            check_expr_local_order(allow, known)?;
        }
        NodeKind::FunctionDecl { params, body, .. } => {
            let mut local_known: HashSet<String> = params.iter().cloned().collect();
            check_local_order(body, &mut local_known)?;
        }
        NodeKind::GlobalConst(bindings) => {
            for (_, v) in bindings {
                check_expr_local_order(v, known)?;
            }
        }
        NodeKind::Break | NodeKind::Continue => {}
        _ => check_expr_local_order(node, known)?,
    }
    Ok(())
}

fn check_expr_local_order(node: &Node, known: &HashSet<String>) -> Result<(), Error> {
    match &node.kind {
        NodeKind::LocalVar(name) => {
            if !known.contains(name) {
                return Err(Error::check(
                    node.span,
                    format!("local variable '${name}' read before being assigned"),
                ));
            }
        }
        NodeKind::FunctionExpr { .. } => {
            // Deferred execution under its own captured scope; not checked
            // here (see module doc comment above).
        }
        NodeKind::Spawn { globals, body, .. } => {
            if let Some(g) = globals {
                check_expr_local_order(g, known)?;
            }
            match body {
                SpawnBody::Call(c) => check_expr_local_order(c, known)?,
                SpawnBody::EmbeddedModule(stmts) => check_local_order(stmts, &mut HashSet::new())?,
            }
        }
        _ => {
            for c in children(node) {
                check_expr_local_order(c, known)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn check_src(src: &str) -> Result<(), Error> {
        check(&parse(src).unwrap())
    }

    #[test]
    fn duplicate_explicit_object_key_is_rejected() {
        let err = check_src("$x = {a: 1, a: 2}").unwrap_err();
        assert!(matches!(err, Error::Check { .. }));
    }

    #[test]
    fn distinct_object_keys_are_accepted() {
        assert!(check_src("$x = {a: 1, b: 2}").is_ok());
    }

    #[test]
    fn switch_with_non_literal_case_is_rejected() {
        let err = check_src("$x = 1 switch $x { $x { return 1 } }").unwrap_err();
        assert!(matches!(err, Error::Check { .. }));
    }

    #[test]
    fn break_outside_for_is_rejected() {
        assert!(check_src("break").is_err());
    }

    #[test]
    fn break_inside_for_is_accepted() {
        assert!(check_src("for i in 0..3 { break }").is_ok());
    }

    #[test]
    fn local_read_before_assignment_is_rejected() {
        let err = check_src("return $a").unwrap_err();
        assert!(matches!(err, Error::Check { .. }));
    }

    #[test]
    fn local_assigned_before_read_is_accepted() {
        assert!(check_src("$a = 1 return $a").is_ok());
    }

    #[test]
    fn function_redeclaration_is_rejected() {
        assert!(check_src("fn f() { return 1 } fn f() { return 2 }").is_err());
    }

    #[test]
    fn function_name_colliding_with_global_is_rejected() {
        assert!(check_src("const (f = 1) fn f() { return 2 }").is_err());
    }
}

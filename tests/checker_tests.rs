//! Structural-validation rules exercised through full source text rather
//! than constructed AST nodes, covering checker rules the inline
//! `#[cfg(test)]` module in `checker.rs` doesn't already reach.

#[test]
fn const_redeclaration_in_the_same_binding_group_is_rejected() {
    assert!(permitscript::parse_and_check("const (A = 1 A = 2)").is_err());
}

#[test]
fn a_const_nested_inside_a_function_body_is_rejected() {
    assert!(permitscript::parse_and_check("fn f() { const (A = 1) return 1 }").is_err());
}

#[test]
fn a_spawn_bodys_bare_expression_that_is_not_a_call_is_rejected() {
    assert!(permitscript::parse_and_check("$h = sr nil nil (1 + 1)").is_err());
}

#[test]
fn a_spawn_bodys_bare_call_is_accepted() {
    assert!(permitscript::parse_and_check("fn f() { return 1 } $h = sr nil nil f()").is_ok());
}

#[test]
fn an_embedded_spawn_module_is_checked_with_its_own_independent_declaration_namespace() {
    // Two different embedded modules may each declare a function named
    // `f` without colliding, since each embedded module gets its own
    // declaration namespace (distinct from the enclosing module's).
    assert!(permitscript::parse_and_check(
        "sr nil nil { fn f() { return 1 } return f() }\n\
         sr nil nil { fn f() { return 2 } return f() }"
    )
    .is_ok());
}

#[test]
fn duplicate_object_pattern_key_is_rejected() {
    let source = "match 1 { %{a: %x, a: %y} { return 1 } }";
    assert!(permitscript::parse_and_check(source).is_err());
}

#[test]
fn continue_outside_a_for_loop_is_rejected() {
    assert!(permitscript::parse_and_check("continue").is_err());
}

#[test]
fn a_break_nested_inside_a_match_inside_a_for_loop_is_accepted() {
    assert!(permitscript::parse_and_check("for i in 0..3 { match $i { %n { break } } }").is_ok());
}

#[test]
fn reading_a_global_before_any_const_declares_it_is_still_a_checker_pass() {
    // Declaration-order checking (`check_local_order`) only governs local
    // `$x` bindings; `$$x` globals are resolved at eval time against the
    // global scope regardless of textual position.
    assert!(permitscript::parse_and_check("return $$undeclared").is_ok());
}

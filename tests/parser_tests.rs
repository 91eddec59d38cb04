//! Grammar productions exercised through the public `parse_and_check` API,
//! focused on corners the parser's own inline `#[cfg(test)]` module doesn't
//! already reach: object literals, host/URL literals, host aliases, key
//! lists, lazy expressions, pattern unions, and `require`/`import` shape.

#[test]
fn object_literal_with_single_key_parses() {
    assert!(permitscript::parse_and_check("const x = {a: 1, b: 2}").is_ok());
}

#[test]
fn object_literal_multi_key_alias_shares_one_value() {
    assert!(permitscript::parse_and_check("const x = {a, b: 1}").is_ok());
}

#[test]
fn object_literal_implicit_key_entry_parses() {
    assert!(permitscript::parse_and_check("const x = {: 1}").is_ok());
}

#[test]
fn object_literal_missing_colon_is_a_parse_error() {
    assert!(permitscript::parse_and_check("const x = {a}").is_err());
}

#[test]
fn object_key_exceeding_max_byte_length_is_rejected() {
    let key = "k".repeat(300);
    let source = format!("const x = {{{key}: 1}}");
    assert!(permitscript::parse_and_check(&source).is_err());
}

#[test]
fn key_list_literal_parses() {
    assert!(permitscript::parse_and_check("const x = .{a, b, c}").is_ok());
}

#[test]
fn bare_http_host_literal_parses() {
    assert!(permitscript::parse_and_check("const x = https://example.com").is_ok());
}

#[test]
fn wildcard_http_host_pattern_parses() {
    assert!(permitscript::parse_and_check("const x = https://*.example.com").is_ok());
}

#[test]
fn full_url_literal_parses() {
    assert!(permitscript::parse_and_check("const x = https://example.com/a/b").is_ok());
}

#[test]
fn url_with_double_dot_component_is_rejected() {
    assert!(permitscript::parse_and_check("const x = https://example.com/a/../b").is_err());
}

#[test]
fn url_with_terminal_ellipsis_is_a_prefix_pattern() {
    assert!(permitscript::parse_and_check("const x = https://example.com/logs/...").is_ok());
}

#[test]
fn host_alias_reference_parses() {
    assert!(permitscript::parse_and_check("const x = @upstream").is_ok());
}

#[test]
fn lazy_expression_parses() {
    assert!(permitscript::parse_and_check("const x = @(1 + 1)").is_ok());
}

#[test]
fn pattern_union_of_two_names_parses() {
    let source = "match 1 { %a|%b { return 1 } }";
    assert!(permitscript::parse_and_check(source).is_ok());
}

#[test]
fn pattern_union_missing_leading_percent_on_second_alternative_is_rejected() {
    let source = "match 1 { %a|b { return 1 } }";
    assert!(permitscript::parse_and_check(source).is_err());
}

#[test]
fn require_block_with_permission_categories_parses() {
    let source = "require { allow: {fs: [/tmp/...]} }";
    assert!(permitscript::parse_and_check(source).is_ok());
}

#[test]
fn drop_statement_with_multiple_comma_separated_permissions_parses() {
    let source = "require { allow: {fs: [/tmp/...], http: [https://example.com]} }\n\
                  drop /tmp/..., https://example.com";
    assert!(permitscript::parse_and_check(source).is_ok());
}

#[test]
fn import_statement_shape_parses() {
    let source = "import m https://example.com/m.ps \"deadbeef\" {} allow {}";
    assert!(permitscript::parse_and_check(source).is_ok());
}

#[test]
fn import_statement_missing_allow_keyword_is_rejected() {
    let source = "import m https://example.com/m.ps \"deadbeef\" {}";
    assert!(permitscript::parse_and_check(source).is_err());
}

#[test]
fn multi_assign_to_two_targets_parses() {
    assert!(permitscript::parse_and_check("$a $b = 1").is_ok());
}

#[test]
fn for_loop_with_key_and_value_bindings_parses() {
    assert!(permitscript::parse_and_check("for k, v in {a: 1} { break }").is_ok());
}

#[test]
fn range_expression_parses() {
    assert!(permitscript::parse_and_check("const x = 0..3").is_ok());
}

//! Embeddable scripting runtime for permissioned automation: scripts
//! declare the filesystem, HTTP, subprocess, and routine capabilities they
//! need up front in a `require` block, and this runtime mechanically
//! enforces that nothing beyond the grant ever executes.
//!
//! The pipeline an embedder drives is [`parse`] → [`check`] → build a root
//! [`Context`] → [`Evaluator::eval_module`]. Host callables are registered
//! into a [`HostRegistry`] ahead of evaluation, typically via
//! [`host_fns::default_registry`].

pub mod ast;
pub mod checker;
pub mod config;
pub mod context;
pub mod error;
pub mod eval;
pub mod globals;
pub mod highlighter;
pub mod host;
pub mod host_fns;
pub mod import;
pub mod limiter;
pub mod parser;
pub mod pattern;
pub mod permission;
pub mod routine;
pub mod sandbox;
pub mod scope;
pub mod span;
pub mod value;

pub use ast::Node;
pub use context::Context;
pub use error::{Error, Result, RuntimeErrorKind};
pub use eval::Evaluator;
pub use globals::GlobalScope;
pub use host::HostRegistry;
pub use value::Value;

/// Parses `source` into a checked AST, running the structural checks in
/// [`checker::check`] before handing it back. This is the entry point an
/// embedder (or [`import::ModuleFetcher`] consumer) should use rather than
/// calling `parser::parse` and `checker::check` separately, since a module
/// that parses but fails checking must never reach the evaluator.
pub fn parse_and_check(source: &str) -> Result<Node> {
    let module = parser::parse(source)?;
    checker::check(&module)?;
    Ok(module)
}

/// Installs a `tracing-subscriber` env-filter subscriber as the global
/// default, if one isn't already installed. Safe to call from both the
/// CLI driver and embedders that want the same `debug!`/`warn!` spans
/// this crate emits around parsing, checking, permission checks, limiter
/// takes, routine spawn/join, and import fetch without hand-rolling their
/// own `tracing-subscriber` setup.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_check_rejects_a_switch_case_that_is_not_a_literal() {
        let source = "switch 1 { (1 + 1) { return 1 } }";
        assert!(parse_and_check(source).is_err());
    }

    #[test]
    fn parse_and_check_accepts_a_trivial_module() {
        let source = "const x = 1";
        assert!(parse_and_check(source).is_ok());
    }
}

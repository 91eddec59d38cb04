//! Built-in host functions: the filesystem, HTTP, subprocess, console, and
//! JSON bridge callables registered into a fresh [`HostRegistry`].
//!
//! A shared sandbox handle plus one `register(&mut Environment)` function
//! per category, all called in sequence from the embedder's startup path.
//! Since routines here are real OS threads rather than a single-threaded
//! interpreter loop, the handle lives in a process-wide `OnceLock` rather
//! than a `thread_local!` — one sandbox, free functions read it, visible
//! from every routine's thread rather than just the one that set it.

mod command;
mod console;
mod filesystem;
mod http;
mod json;

use std::sync::{Arc, OnceLock};

use crate::host::HostRegistry;
use crate::sandbox::Sandbox;

static SANDBOX: OnceLock<Arc<Sandbox>> = OnceLock::new();

/// Installs the process-wide sandbox handle every I/O host function reads.
/// Must be called once, before any script runs; `default_registry` does
/// this for the common case of one sandbox shared by the whole process.
pub fn install_sandbox(sandbox: Arc<Sandbox>) {
    let _ = SANDBOX.set(sandbox);
}

fn sandbox() -> &'static Sandbox {
    SANDBOX.get().expect("permitscript sandbox not installed before evaluation started").as_ref()
}

/// Builds the registry an embedder hands to [`crate::eval::Evaluator::new`],
/// installing `sandbox` as the process-wide handle every filesystem/HTTP/
/// command host function reads, split across this crate's category
/// modules (no database category: see `DESIGN.md`).
pub fn default_registry(sandbox: Arc<Sandbox>) -> HostRegistry {
    install_sandbox(sandbox);
    let mut registry = HostRegistry::new();
    filesystem::register(&mut registry);
    http::register(&mut registry);
    command::register(&mut registry);
    console::register(&mut registry);
    json::register(&mut registry);
    registry
}

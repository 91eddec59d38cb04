//! Embedder-supplied ceiling configuration: the outer bounds a host
//! process places on a script before any `require` block is even read. A
//! script's own declared permissions are still checked against the root
//! `Context` built from a grant list; this module is what the CLI driver
//! (or any other embedder) uses to decide what that grant list, and the
//! sandbox/http backends behind it, are allowed to be in the first place.
//!
//! Shaped as ceilings (`FsConfig`/`NetConfig`) a fully-permissioned script
//! still cannot exceed, rather than a flat allowlist.

use std::path::PathBuf;
use std::time::Duration;

/// Filesystem ceiling: the sandbox roots a `Permission::Filesystem` is
/// ever allowed to resolve into, and a hard per-file size limit enforced
/// independent of any byte-rate limiter the script declares.
#[derive(Debug, Clone)]
pub struct FsConfig {
    pub roots: Vec<PathBuf>,
    pub max_file_size: u64,
}

impl Default for FsConfig {
    fn default() -> Self {
        FsConfig {
            roots: vec![PathBuf::from("/")],
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

/// Network ceiling: whether HTTP is reachable at all from this embedding,
/// and the transport-level timeout applied to every request regardless of
/// what the script's own limiters allow.
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub enabled: bool,
    pub timeout: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        NetConfig { enabled: true, timeout: Duration::from_secs(30) }
    }
}

/// Subprocess ceiling: whether `Permission::Command` can ever be granted,
/// independent of which commands a script's `require` block names.
#[derive(Debug, Clone)]
pub struct CommandConfig {
    pub enabled: bool,
}

impl Default for CommandConfig {
    fn default() -> Self {
        CommandConfig { enabled: false }
    }
}

/// The embedder-level ceiling a root `Context` is built under. A script
/// cannot be granted more than this even if its own `require` block asks
/// for it — `sandbox.rs` consults this directly rather than trusting the
/// `Context`'s grant set alone, so a bug in permission derivation cannot
/// widen what the process itself is willing to touch.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    pub fs: FsConfig,
    pub net: NetConfig,
    pub command: CommandConfig,
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fs_config_roots_at_filesystem_root() {
        let cfg = FsConfig::default();
        assert_eq!(cfg.roots, vec![PathBuf::from("/")]);
    }

    #[test]
    fn default_command_config_is_disabled() {
        assert!(!CommandConfig::default().enabled);
    }
}

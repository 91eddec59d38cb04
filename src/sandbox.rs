//! The filesystem/HTTP/subprocess backend that host functions call into
//! once a `Permission` check has already passed.
//!
//! Built on a `cap_std` capability-root approach (`Dir::open_ambient_dir`
//! once at startup, every access going through that handle rather than a
//! raw path) and a `ureq`-based `http_request`, keyed off
//! `Permission`/`config::SandboxConfig` rather than a flat
//! allowed-paths/allowed-addresses list: the permission check (did the
//! script declare and get granted this path?) happens in `host_fns.rs`
//! before `Sandbox` is ever called, so this module only enforces the
//! embedder's own ceiling (`SandboxConfig`) and does the actual I/O.
//! There's no database entity in permitscript's data model, so no
//! database backend either (see `DESIGN.md`).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use cap_std::fs::Dir;

use crate::config::SandboxConfig;
use crate::error::{Error, RuntimeErrorKind};

#[derive(Debug, Clone)]
pub enum SandboxError {
    PathNotAllowed(String),
    FileTooLarge(String),
    Io(String),
    NetworkDisabled,
    CommandsDisabled,
    UnsupportedMethod(String),
}

impl std::fmt::Display for SandboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxError::PathNotAllowed(p) => write!(f, "path not allowed: {p}"),
            SandboxError::FileTooLarge(p) => write!(f, "file too large: {p}"),
            SandboxError::Io(e) => write!(f, "io error: {e}"),
            SandboxError::NetworkDisabled => write!(f, "network access is disabled"),
            SandboxError::CommandsDisabled => write!(f, "subprocess execution is disabled"),
            SandboxError::UnsupportedMethod(m) => write!(f, "unsupported HTTP method: {m}"),
        }
    }
}

impl std::error::Error for SandboxError {}

impl From<SandboxError> for Error {
    fn from(e: SandboxError) -> Self {
        Error::runtime(None, RuntimeErrorKind::Custom(e.to_string()))
    }
}

fn rejects_traversal(path: &str) -> bool {
    path.split(['/', '\\']).any(|seg| seg == "..")
}

/// Strips the leading `/` from an already-permission-checked absolute path
/// so it can be resolved relative to the sandbox's `/`-rooted `Dir`.
fn relativize(path: &Path) -> std::path::PathBuf {
    match path.strip_prefix("/") {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => path.to_path_buf(),
    }
}

pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

pub struct Sandbox {
    root: Dir,
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let root = Dir::open_ambient_dir("/", cap_std::ambient_authority())
            .map_err(|e| SandboxError::Io(e.to_string()))?;
        Ok(Sandbox { root, config })
    }

    /// Embedder ceiling check, independent of whatever `Permission` the
    /// script itself was granted: even a script granted `/etc/...`
    /// read access cannot reach outside the roots the embedder configured.
    pub fn root_allowed(&self, path: &Path) -> bool {
        self.config.fs.roots.iter().any(|root| path.starts_with(root))
    }

    pub fn read_file(&self, path: &Path) -> Result<String, SandboxError> {
        if !self.root_allowed(path) {
            return Err(SandboxError::PathNotAllowed(path.display().to_string()));
        }
        let rel = relativize(path);
        let rel_str = rel.to_string_lossy();
        if rejects_traversal(&rel_str) {
            return Err(SandboxError::PathNotAllowed(path.display().to_string()));
        }
        match self.root.metadata(&rel) {
            Ok(meta) if meta.len() > self.config.fs.max_file_size => {
                return Err(SandboxError::FileTooLarge(path.display().to_string()));
            }
            _ => {}
        }
        self.root
            .read_to_string(&rel)
            .map_err(|e| SandboxError::Io(format!("cannot read {}: {e}", path.display())))
    }

    pub fn write_file(&self, path: &Path, contents: &str) -> Result<(), SandboxError> {
        if !self.root_allowed(path) {
            return Err(SandboxError::PathNotAllowed(path.display().to_string()));
        }
        let rel = relativize(path);
        let rel_str = rel.to_string_lossy();
        if rejects_traversal(&rel_str) {
            return Err(SandboxError::PathNotAllowed(path.display().to_string()));
        }
        if contents.len() as u64 > self.config.fs.max_file_size {
            return Err(SandboxError::FileTooLarge(path.display().to_string()));
        }
        self.root
            .write(&rel, contents)
            .map_err(|e| SandboxError::Io(format!("cannot write {}: {e}", path.display())))
    }

    pub fn file_exists(&self, path: &Path) -> bool {
        if !self.root_allowed(path) {
            return false;
        }
        let rel = relativize(path);
        self.root.metadata(&rel).is_ok()
    }

    pub fn file_size(&self, path: &Path) -> Result<u64, SandboxError> {
        if !self.root_allowed(path) {
            return Err(SandboxError::PathNotAllowed(path.display().to_string()));
        }
        let rel = relativize(path);
        self.root
            .metadata(&rel)
            .map(|m| m.len())
            .map_err(|e| SandboxError::Io(format!("cannot stat {}: {e}", path.display())))
    }

    pub fn list_files(&self, path: &Path) -> Result<Vec<String>, SandboxError> {
        if !self.root_allowed(path) {
            return Err(SandboxError::PathNotAllowed(path.display().to_string()));
        }
        let rel = relativize(path);
        let rel_str = rel.to_string_lossy();
        if rejects_traversal(&rel_str) {
            return Err(SandboxError::PathNotAllowed(path.display().to_string()));
        }
        let entries = self
            .root
            .read_dir(&rel)
            .map_err(|e| SandboxError::Io(format!("cannot list {}: {e}", path.display())))?;
        entries
            .map(|entry| {
                entry
                    .map_err(|e| SandboxError::Io(e.to_string()))
                    .and_then(|e| {
                        e.file_name()
                            .into_string()
                            .map_err(|_| SandboxError::Io("non-UTF-8 file name".to_string()))
                    })
            })
            .collect()
    }

    pub fn http_request(
        &self,
        url: &str,
        method: &str,
        headers: &[(String, String)],
        body: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, SandboxError> {
        if !self.config.net.enabled {
            return Err(SandboxError::NetworkDisabled);
        }
        let mut request = match method.to_uppercase().as_str() {
            "GET" => ureq::get(url),
            "POST" => ureq::post(url),
            "PUT" => ureq::put(url),
            "DELETE" => ureq::delete(url),
            "PATCH" => ureq::patch(url),
            "HEAD" => ureq::head(url),
            other => return Err(SandboxError::UnsupportedMethod(other.to_string())),
        };
        for (key, value) in headers {
            request = request.set(key, value);
        }
        request = request.timeout(timeout.unwrap_or(self.config.net.timeout));

        let response = if let Some(body) = body {
            request
                .send_string(body)
                .map_err(|e| SandboxError::Io(format!("HTTP {method} failed: {e}")))?
        } else {
            request
                .call()
                .map_err(|e| SandboxError::Io(format!("HTTP {method} failed: {e}")))?
        };

        let status = response.status();
        let headers_map = response
            .headers_names()
            .iter()
            .map(|name| {
                let value = response.header(name).unwrap_or("").to_string();
                (name.clone(), value)
            })
            .collect();
        let body = response
            .into_string()
            .map_err(|e| SandboxError::Io(format!("failed to read response body: {e}")))?;
        Ok(HttpResponse { status, headers: headers_map, body })
    }

    /// Runs `command` with `args`, capturing stdout. Gated purely by
    /// `SandboxConfig::command.enabled`; the `Permission::Command`
    /// subcommand-prefix check has already happened in `host_fns.rs`.
    pub fn run_command(&self, command: &str, args: &[String]) -> Result<(String, String, i32), SandboxError> {
        if !self.config.command.enabled {
            return Err(SandboxError::CommandsDisabled);
        }
        let output = std::process::Command::new(command)
            .args(args)
            .output()
            .map_err(|e| SandboxError::Io(format!("cannot run {command}: {e}")))?;
        Ok((
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
            output.status.code().unwrap_or(-1),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::path::PathBuf;

    fn sandbox_in(dir: &tempfile::TempDir) -> Sandbox {
        let mut cfg = SandboxConfig::default();
        cfg.fs.roots = vec![dir.path().to_path_buf()];
        Sandbox::new(cfg).unwrap()
    }

    #[test]
    #[serial]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&dir);
        let path = dir.path().join("hello.txt");
        sandbox.write_file(&path, "hi there").unwrap();
        assert_eq!(sandbox.read_file(&path).unwrap(), "hi there");
    }

    #[test]
    #[serial]
    fn traversal_segments_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&dir);
        let path = PathBuf::from("/tmp/../etc/passwd");
        assert!(matches!(sandbox.read_file(&path), Err(SandboxError::PathNotAllowed(_))));
    }

    #[test]
    #[serial]
    fn file_too_large_is_rejected_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SandboxConfig::default();
        cfg.fs.roots = vec![dir.path().to_path_buf()];
        cfg.fs.max_file_size = 4;
        let sandbox = Sandbox::new(cfg).unwrap();
        let path = dir.path().join("big.txt");
        assert!(matches!(sandbox.write_file(&path, "way too long"), Err(SandboxError::FileTooLarge(_))));
    }

    #[test]
    #[serial]
    fn list_files_reports_entries() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&dir);
        sandbox.write_file(&dir.path().join("a.txt"), "1").unwrap();
        sandbox.write_file(&dir.path().join("b.txt"), "2").unwrap();
        let mut names = sandbox.list_files(dir.path()).unwrap();
        names.sort();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    #[serial]
    fn commands_disabled_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_in(&dir);
        assert!(matches!(sandbox.run_command("echo", &[]), Err(SandboxError::CommandsDisabled)));
    }
}

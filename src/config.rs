//! Server configuration
//!
//! Built once at startup and shared by reference with every tool call.

use crate::interop::DEFAULT_TIMEOUT;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the CODESYS executable
pub const ENV_CODESYS_PATH: &str = "CODESYS_PATH";
/// Environment variable naming the CODESYS profile
pub const ENV_CODESYS_PROFILE: &str = "CODESYS_PROFILE";
/// Environment variable naming the workspace root for relative paths
pub const ENV_WORKSPACE: &str = "CODESYS_WORKSPACE";
/// Environment variable overriding the per-call timeout, in seconds
pub const ENV_TIMEOUT: &str = "CODESYS_TIMEOUT";
/// Environment variable naming the directory for temporary scripts
pub const ENV_SCRIPT_DIR: &str = "CODESYS_SCRIPT_DIR";

/// Configuration for the CODESYS MCP Server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the CODESYS executable (validated for existence per call)
    pub codesys_path: PathBuf,
    /// Profile passed as `--profile=<profile>`
    pub profile: String,
    /// Root for resolving relative project paths (default: current directory)
    pub workspace: Option<PathBuf>,
    /// Per-call time budget (default: 120s)
    pub timeout: Duration,
    /// Directory for temporary scripts (default: system temp directory)
    pub script_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            codesys_path: PathBuf::new(),
            profile: String::new(),
            workspace: None,
            timeout: DEFAULT_TIMEOUT,
            script_dir: None,
        }
    }
}

impl ServerConfig {
    /// Read configuration from `CODESYS_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let timeout = match get(ENV_TIMEOUT) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    tracing::warn!(value = %raw, "ignoring invalid {}", ENV_TIMEOUT);
                    DEFAULT_TIMEOUT
                }
            },
            None => DEFAULT_TIMEOUT,
        };

        Self {
            codesys_path: get(ENV_CODESYS_PATH).map(PathBuf::from).unwrap_or_default(),
            profile: get(ENV_CODESYS_PROFILE).unwrap_or_default(),
            workspace: get(ENV_WORKSPACE).map(PathBuf::from),
            timeout,
            script_dir: get(ENV_SCRIPT_DIR).map(PathBuf::from),
        }
    }

    /// Whether the configured executable is present on disk
    pub fn executable_ready(&self) -> bool {
        !self.codesys_path.as_os_str().is_empty() && self.codesys_path.exists()
    }

    /// Resolve a caller-supplied path against the workspace.
    ///
    /// Empty and absolute paths are returned unchanged; relative ones are
    /// joined onto the workspace (or the current directory) and normalized.
    pub fn resolve_path(&self, path: &str) -> String {
        if path.is_empty() || Path::new(path).is_absolute() {
            return path.to_string();
        }
        let base = match &self.workspace {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => current_dir().join(dir),
            None => current_dir(),
        };
        normalize(&base.join(path)).to_string_lossy().into_owned()
    }
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Lexically drop `.` and fold `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

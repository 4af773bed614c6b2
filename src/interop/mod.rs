//! CODESYS interop layer
//!
//! Synthesizes a script per action, runs CODESYS headlessly against it, and
//! decodes the marker protocol on stdout into a [`CallResult`].

mod decoder;
mod invoker;
mod script;

pub use decoder::{decode, CallResult};
pub use invoker::{
    command_args, dry_run_command, invoke, ProcessOutcome, DEFAULT_TIMEOUT, NOT_FOUND_EXIT_CODE,
};
pub use script::{synthesize, Action, ERROR_MARKER, SUCCESS_MARKER, UNKNOWN_ACTION_MESSAGE};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::TempPath;

/// Run `action` with the configured timeout.
pub async fn run_action(
    config: &ServerConfig,
    action: &str,
    params: &Map<String, Value>,
) -> CallResult {
    run_action_with_timeout(config, action, params, config.timeout).await
}

/// Run `action` bounded by `timeout`.
///
/// Always yields a result: failures to write the script or start the process
/// become a [`CallResult::Failure`].
pub async fn run_action_with_timeout(
    config: &ServerConfig,
    action: &str,
    params: &Map<String, Value>,
    timeout: Duration,
) -> CallResult {
    match execute(config, action, params, timeout).await {
        Ok(result) => {
            if let CallResult::Failure { message, exit_code, .. } = &result {
                tracing::warn!(action, ?exit_code, error = %message, "action failed");
            }
            result
        }
        Err(e) => {
            tracing::warn!(action, error = %e, "action could not be run");
            CallResult::from_error(&e)
        }
    }
}

async fn execute(
    config: &ServerConfig,
    action: &str,
    params: &Map<String, Value>,
    timeout: Duration,
) -> Result<CallResult> {
    let script = synthesize(action, params);
    // Removed when dropped, whichever way this function returns
    let script_path = write_script(&script, config.script_dir.as_deref())?;

    let outcome = invoke(&config.codesys_path, &config.profile, &script_path, timeout).await?;
    Ok(decode(&outcome))
}

/// Write `content` to a fresh, uniquely named `.py` file.
fn write_script(content: &str, dir: Option<&Path>) -> Result<TempPath> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("codesys-").suffix(".py");
    let mut file = match dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .map_err(Error::ScriptFile)?;

    file.write_all(content.as_bytes())
        .and_then(|_| file.flush())
        .map_err(Error::ScriptFile)?;

    Ok(file.into_temp_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_write_script_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script("print('hi')\n", Some(dir.path())).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("codesys-"));
        assert!(name.ends_with(".py"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "print('hi')\n");

        let kept = path.to_path_buf();
        drop(path);
        assert!(!kept.exists());
    }

    #[test]
    fn test_write_script_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_script("", Some(dir.path())).unwrap();
        let b = write_script("", Some(dir.path())).unwrap();
        assert_ne!(a.to_path_buf(), b.to_path_buf());
    }

    #[test]
    fn test_write_script_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = write_script("", Some(&missing)).unwrap_err();
        assert!(matches!(err, Error::ScriptFile(_)));
    }

    #[tokio::test]
    async fn test_run_action_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            codesys_path: dir.path().join("CODESYS.exe"),
            script_dir: Some(dir.path().to_path_buf()),
            ..ServerConfig::default()
        };

        let result = run_action(&config, "save_project", &Map::new()).await;
        match result {
            CallResult::Failure {
                message, exit_code, ..
            } => {
                assert_eq!(
                    message,
                    format!("{} not found", config.codesys_path.display())
                );
                assert_eq!(exit_code, Some(NOT_FOUND_EXIT_CODE));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_run_action_unwritable_script_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            script_dir: Some(dir.path().join("missing")),
            ..ServerConfig::default()
        };

        let result = run_action(&config, "save_project", &Map::new()).await;
        match result {
            CallResult::Failure {
                message, exit_code, ..
            } => {
                assert!(message.starts_with("Failed to write script file"));
                assert_eq!(exit_code, None);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}

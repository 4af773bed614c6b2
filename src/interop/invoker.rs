//! Headless CODESYS process invocation
//!
//! Runs `<exe> --profile=<profile> --noUI --runscript=<script>` as an argument
//! vector, bounded by a wall-clock timeout, and captures stdout/stderr as
//! complete text buffers. Output content is never interpreted here.

use crate::error::{Error, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

/// Default time budget for one CODESYS run
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Exit code reported when the executable is missing and nothing was spawned
pub const NOT_FOUND_EXIT_CODE: i32 = 127;

/// How long to wait for the output pipes to close once the process is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Raw result of one CODESYS run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code, or `None` when the process outlived its timeout
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Budget the run was bounded by
    pub timeout: Duration,
}

impl ProcessOutcome {
    /// Synthetic outcome for an executable that could not be found
    pub fn not_found(executable: &str, timeout: Duration) -> Self {
        Self {
            exit_code: Some(NOT_FOUND_EXIT_CODE),
            stdout: String::new(),
            stderr: Error::ExecutableNotFound {
                path: executable.to_string(),
            }
            .to_string(),
            timeout,
        }
    }
}

/// Arguments passed after the executable path
pub fn command_args(profile: &str, script_path: &Path) -> Vec<OsString> {
    let mut runscript = OsString::from("--runscript=");
    runscript.push(script_path);
    vec![
        OsString::from(format!("--profile={}", profile)),
        OsString::from("--noUI"),
        runscript,
    ]
}

/// Human-readable command line for diagnostics, with a placeholder script name.
///
/// Quoting is cosmetic only; [`invoke`] never goes through a shell.
pub fn dry_run_command(executable: &str, profile: &str) -> String {
    format!(
        "{} --profile=\"{}\" --noUI --runscript=\"TEMP.py\"",
        executable, profile
    )
}

/// Run CODESYS against `script_path` and wait at most `timeout`.
///
/// A missing executable is reported as a synthetic outcome with
/// [`NOT_FOUND_EXIT_CODE`]; a non-zero exit is a normal outcome. Only OS-level
/// failures to start or wait on the process are returned as errors.
pub async fn invoke(
    executable: &Path,
    profile: &str,
    script_path: &Path,
    timeout: Duration,
) -> Result<ProcessOutcome> {
    if executable.as_os_str().is_empty() {
        tracing::warn!("CODESYS executable path is not configured");
        return Ok(ProcessOutcome::not_found("executable", timeout));
    }
    if !executable.exists() {
        let shown = executable.display().to_string();
        tracing::warn!(executable = %shown, "CODESYS executable not found");
        return Ok(ProcessOutcome::not_found(&shown, timeout));
    }

    let executable = absolute(executable)?;
    let exe_dir = executable
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let search_path = prepend_search_path(&exe_dir).map_err(|source| Error::Spawn {
        path: executable.display().to_string(),
        source,
    })?;

    let mut command = Command::new(&executable);
    command
        .args(command_args(profile, script_path))
        .current_dir(&exe_dir)
        .env("PATH", search_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Child leads its own group so a timeout can take down anything it started
    #[cfg(unix)]
    command.process_group(0);

    tracing::debug!(
        executable = %executable.display(),
        profile,
        script = %script_path.display(),
        timeout_secs = timeout.as_secs_f64(),
        "spawning CODESYS"
    );

    let mut child = command.spawn().map_err(|source| Error::Spawn {
        path: executable.display().to_string(),
        source,
    })?;

    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let exit_code = {
        let reading = async {
            tokio::join!(
                drain_into(stdout_pipe, &mut stdout_buf),
                drain_into(stderr_pipe, &mut stderr_buf)
            )
        };
        tokio::pin!(reading);
        let mut reading_done = false;

        let waited = tokio::time::timeout(timeout, async {
            loop {
                tokio::select! {
                    status = child.wait() => break status,
                    _ = &mut reading, if !reading_done => reading_done = true,
                }
            }
        })
        .await;

        let exit_code = match waited {
            Ok(status) => Some(exit_code_of(status?)),
            Err(_) => {
                tracing::warn!(
                    executable = %executable.display(),
                    timeout_secs = timeout.as_secs_f64(),
                    "CODESYS run timed out, terminating"
                );
                terminate(&mut child).await;
                None
            }
        };

        // A helper that inherited the pipes can keep them open past exit
        if !reading_done && tokio::time::timeout(DRAIN_GRACE, &mut reading).await.is_err() {
            tracing::debug!("output pipes still open after process exit, keeping partial output");
        }
        exit_code
    };

    let stdout = String::from_utf8_lossy(&stdout_buf).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_buf).into_owned();

    tracing::debug!(
        ?exit_code,
        stdout_len = stdout.len(),
        stderr_len = stderr.len(),
        "CODESYS run finished"
    );

    Ok(ProcessOutcome {
        exit_code,
        stdout,
        stderr,
        timeout,
    })
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// `PATH` with `dir` placed in front of the inherited entries
fn prepend_search_path(dir: &Path) -> std::io::Result<OsString> {
    let mut entries = vec![dir.to_path_buf()];
    if let Some(existing) = std::env::var_os("PATH") {
        entries.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(entries)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
}

/// Append everything read from `pipe` to `buf`.
///
/// Bytes land in `buf` as each read completes, so cancelling this future
/// keeps what was received.
async fn drain_into<R: AsyncRead + Unpin>(pipe: Option<R>, buf: &mut Vec<u8>) {
    let Some(mut pipe) = pipe else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => {
                tracing::debug!(error = %e, "output pipe read failed");
                break;
            }
        }
    }
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // Safety: kill() is a plain syscall; a negative pid targets the group
            // created by process_group(0), whose id equals the child's pid.
            let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
            if rc != 0 {
                tracing::debug!(
                    pid,
                    error = %std::io::Error::last_os_error(),
                    "process group kill failed"
                );
            }
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "child kill failed");
    }
}

/// Exit code of a finished process; on Unix a signal death maps to 128 + signal
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

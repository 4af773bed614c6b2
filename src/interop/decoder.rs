//! Decoding of CODESYS stdout into a caller-facing result
//!
//! Scripts report through a two-line marker protocol on stdout:
//!
//! ```text
//! SCRIPT_SUCCESS            SCRIPT_ERROR
//! <single-line JSON>        <message>
//! ```
//!
//! Anything else the process prints is ignored when a marker is found and
//! passed through verbatim when none is.

use crate::error::Error;
use crate::interop::invoker::ProcessOutcome;
use crate::interop::script::{ERROR_MARKER, SUCCESS_MARKER};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use std::time::Duration;

/// Payload used when the success marker is the last line of output
const EMPTY_PAYLOAD: &str = "{}";

/// Normalized result of one action, as returned to MCP callers
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    Success {
        data: Value,
        exit_code: i32,
    },
    Failure {
        message: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

impl CallResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CallResult::Success { .. })
    }

    /// Failure for a run that never produced process output.
    ///
    /// Carries the sanitized [`Error::client_message`]; log the full error first.
    pub fn from_error(err: &Error) -> Self {
        CallResult::Failure {
            message: err.client_message(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Caller-facing JSON text
    pub fn to_json_string(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl Serialize for CallResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CallResult::Success { data, exit_code } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("success", &true)?;
                map.serialize_entry("data", data)?;
                map.serialize_entry("exit_code", exit_code)?;
                map.end()
            }
            CallResult::Failure {
                message,
                exit_code,
                stdout,
                stderr,
            } => {
                let mut map = serializer.serialize_map(Some(5))?;
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", message)?;
                map.serialize_entry("exit_code", exit_code)?;
                map.serialize_entry("stdout", stdout)?;
                map.serialize_entry("stderr", stderr)?;
                map.end()
            }
        }
    }
}

/// Markers found in one stdout buffer
#[derive(Debug, Default, PartialEq, Eq)]
struct Markers<'a> {
    /// `Some(line)` once the success marker was seen; `line` is what followed it
    success: Option<Option<&'a str>>,
    /// Same for the first error marker
    error: Option<Option<&'a str>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Scanning,
    SuccessPayload,
    ErrorMessage,
    Done,
}

fn scan_markers(stdout: &str) -> Markers<'_> {
    let mut markers = Markers::default();
    let mut state = ScanState::Scanning;

    for line in stdout.lines() {
        state = match state {
            ScanState::Scanning if line == SUCCESS_MARKER => {
                markers.success = Some(None);
                ScanState::SuccessPayload
            }
            ScanState::Scanning if line == ERROR_MARKER && markers.error.is_none() => {
                markers.error = Some(None);
                ScanState::ErrorMessage
            }
            ScanState::Scanning => ScanState::Scanning,
            ScanState::SuccessPayload => {
                markers.success = Some(Some(line));
                ScanState::Done
            }
            ScanState::ErrorMessage => {
                markers.error = Some(Some(line));
                ScanState::Scanning
            }
            ScanState::Done => break,
        };
    }

    markers
}

/// Seconds in `budget`, rounded up so sub-second budgets never print as 0
fn whole_secs(budget: Duration) -> u64 {
    budget.as_secs() + u64::from(budget.subsec_nanos() > 0)
}

/// Turn a process outcome into exactly one [`CallResult`].
pub fn decode(outcome: &ProcessOutcome) -> CallResult {
    let Some(exit_code) = outcome.exit_code else {
        return CallResult::Failure {
            message: format!("timeout after {}s", whole_secs(outcome.timeout)),
            exit_code: None,
            stdout: outcome.stdout.clone(),
            stderr: outcome.stderr.clone(),
        };
    };

    let markers = scan_markers(&outcome.stdout);

    if let Some(payload) = markers.success {
        let payload = payload.unwrap_or(EMPTY_PAYLOAD);
        let data = serde_json::from_str(payload).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "success payload is not JSON, passing through raw");
            serde_json::json!({ "raw": payload })
        });
        return CallResult::Success { data, exit_code };
    }

    let message = match markers.error {
        Some(Some(line)) => line.to_string(),
        _ if !outcome.stderr.is_empty() => outcome.stderr.clone(),
        _ => outcome.stdout.clone(),
    };

    CallResult::Failure {
        message,
        exit_code: Some(exit_code),
        stdout: outcome.stdout.clone(),
        stderr: outcome.stderr.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn outcome(exit_code: Option<i32>, stdout: &str, stderr: &str) -> ProcessOutcome {
        ProcessOutcome {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    #[test]
    fn test_success_payload() {
        let result = decode(&outcome(
            Some(0),
            "loading plugins\nSCRIPT_SUCCESS\n{\"action\": \"save_project\"}\n",
            "",
        ));
        assert_eq!(
            result,
            CallResult::Success {
                data: json!({"action": "save_project"}),
                exit_code: 0
            }
        );
    }

    #[test]
    fn test_crlf_output() {
        let result = decode(&outcome(Some(0), "SCRIPT_SUCCESS\r\n{\"a\":1}\r\n", ""));
        assert_eq!(
            result,
            CallResult::Success {
                data: json!({"a": 1}),
                exit_code: 0
            }
        );
    }

    #[test]
    fn test_marker_without_payload_line() {
        let result = decode(&outcome(Some(0), "SCRIPT_SUCCESS\n", ""));
        assert_eq!(
            result,
            CallResult::Success {
                data: json!({}),
                exit_code: 0
            }
        );
    }

    #[test]
    fn test_first_marker_wins() {
        let stdout = "SCRIPT_SUCCESS\n{\"n\":1}\nSCRIPT_SUCCESS\n{\"n\":2}\n";
        let result = decode(&outcome(Some(0), stdout, ""));
        assert_eq!(
            result,
            CallResult::Success {
                data: json!({"n": 1}),
                exit_code: 0
            }
        );
    }

    #[test]
    fn test_invalid_payload_passed_through_raw() {
        let result = decode(&outcome(Some(0), "SCRIPT_SUCCESS\nnot json {\n", ""));
        assert_eq!(
            result,
            CallResult::Success {
                data: json!({"raw": "not json {"}),
                exit_code: 0
            }
        );
    }

    #[test]
    fn test_marker_must_be_whole_line() {
        let result = decode(&outcome(Some(0), "echo SCRIPT_SUCCESS\n{}\n", ""));
        assert!(!result.is_success());
    }

    #[test]
    fn test_error_marker_message() {
        let result = decode(&outcome(Some(1), "SCRIPT_ERROR\nunknown action\n", ""));
        match result {
            CallResult::Failure {
                message,
                exit_code,
                stdout,
                ..
            } => {
                assert_eq!(message, "unknown action");
                assert_eq!(exit_code, Some(1));
                assert_eq!(stdout, "SCRIPT_ERROR\nunknown action\n");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_prefers_stderr() {
        let result = decode(&outcome(Some(2), "some output", "Traceback: boom"));
        assert_eq!(
            result,
            CallResult::Failure {
                message: "Traceback: boom".to_string(),
                exit_code: Some(2),
                stdout: "some output".to_string(),
                stderr: "Traceback: boom".to_string(),
            }
        );
    }

    #[test]
    fn test_failure_falls_back_to_stdout() {
        let result = decode(&outcome(Some(2), "license check failed", ""));
        match result {
            CallResult::Failure { message, .. } => assert_eq!(message, "license check failed"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_skips_marker_scan() {
        let mut timed_out = outcome(None, "SCRIPT_SUCCESS\n{}\n", "");
        timed_out.timeout = Duration::from_secs(5);
        let result = decode(&timed_out);
        match result {
            CallResult::Failure {
                message, exit_code, ..
            } => {
                assert_eq!(message, "timeout after 5s");
                assert_eq!(exit_code, None);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_message_rounds_up() {
        let mut timed_out = outcome(None, "", "");
        timed_out.timeout = Duration::from_millis(500);
        match decode(&timed_out) {
            CallResult::Failure { message, .. } => assert_eq!(message, "timeout after 1s"),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(whole_secs(Duration::from_secs(120)), 120);
        assert_eq!(whole_secs(Duration::from_millis(2001)), 3);
    }

    #[test]
    fn test_from_error_uses_client_message() {
        let err = Error::Spawn {
            path: "/opt/codesys/CODESYS.exe".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "EACCES"),
        };
        assert_eq!(
            CallResult::from_error(&err),
            CallResult::Failure {
                message: "Failed to start CODESYS".to_string(),
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
            }
        );
    }

    #[test]
    fn test_success_json_shape() {
        let result = CallResult::Success {
            data: json!({"deployed": true}),
            exit_code: 0,
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"success": true, "data": {"deployed": true}, "exit_code": 0})
        );
    }

    #[test]
    fn test_failure_json_shape() {
        let result = CallResult::Failure {
            message: "timeout after 120s".to_string(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "success": false,
                "error": "timeout after 120s",
                "exit_code": null,
                "stdout": "",
                "stderr": ""
            })
        );
    }

    #[test]
    fn test_scan_markers_states() {
        assert_eq!(scan_markers(""), Markers::default());
        assert_eq!(
            scan_markers("SCRIPT_ERROR"),
            Markers {
                success: None,
                error: Some(None)
            }
        );
        assert_eq!(
            scan_markers("SCRIPT_ERROR\nfirst\nSCRIPT_ERROR\nsecond\n"),
            Markers {
                success: None,
                error: Some(Some("first"))
            }
        );
    }
}

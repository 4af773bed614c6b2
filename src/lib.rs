//! CODESYS MCP Server Library
//!
//! This crate drives CODESYS headlessly over MCP. Each tool call:
//! - synthesizes a self-contained script for the requested action,
//! - runs `CODESYS --profile=<p> --noUI --runscript=<script>` with a timeout,
//! - decodes the `SCRIPT_SUCCESS`/`SCRIPT_ERROR` stdout markers into a
//!   `{success, data|error, exit_code}` result.

pub mod config;
pub mod error;
pub mod interop;
pub mod server;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use interop::{run_action, run_action_with_timeout, Action, CallResult, ProcessOutcome};
pub use server::{run_server, run_server_with_config, CodesysServer};

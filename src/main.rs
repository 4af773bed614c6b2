//! CODESYS MCP Server - Entry point
//!
//! Serves MCP over stdio. Configuration comes from `CODESYS_*` environment
//! variables; `--dry-run` prints the CODESYS command line and exits.

use codesys_mcp_server::interop::dry_run_command;
use codesys_mcp_server::{run_server_with_config, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codesys_mcp_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ServerConfig::from_env();

    if std::env::args().skip(1).any(|arg| arg == "--dry-run") {
        println!(
            "{}",
            dry_run_command(&config.codesys_path.display().to_string(), &config.profile)
        );
        return Ok(());
    }

    tracing::info!("Starting CODESYS MCP Server");

    run_server_with_config(config).await
}

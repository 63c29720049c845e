/// Relay: workflow execution engine
///
/// Main entry point for the Relay server. Initializes configuration and starts
/// the HTTP server with workflow execution capabilities.

use relay::{config::Config, server::start_server};

/// Application entry point
///
/// Initializes the server with configuration from the environment and starts listening for requests.
/// The server provides:
/// - Run triggering at /api/workflows/{id}/execute
/// - Execution inspection at /api/executions/{job_id}
/// - Definition and credential management at /api/workflows, /api/actions, /api/credentials
/// - Health check at /healthz
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (defaults to 0.0.0.0:3004 and a local SQLite database)
    let config = Config::default();

    // Start the server
    start_server(config).await?;

    Ok(())
}

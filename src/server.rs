/// Server setup and initialization
///
/// Wires together all components: storage, credential vault, dispatcher,
/// execution engine, and HTTP routes.
/// Provides the main application factory function for creating the Axum app.

use crate::{
    api::{create_execution_routes, create_workflow_routes, AppState},
    config::Config,
    runtime::{CredentialVault, ExecutionEngine, HttpDispatcher, NodeExecutor},
    workflow::{SqliteStore, WorkflowStore},
};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;

/// Build the router for an already-assembled application state
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Run triggering and execution inspection
        .merge(create_execution_routes())
        // Workflow, action definition and credential management
        .merge(create_workflow_routes())
        .with_state(state)
}

/// Assemble the application state around a store
///
/// Fails if the credential encryption key is missing or malformed.
pub fn create_state(config: &Config, store: Arc<dyn WorkflowStore>) -> Result<AppState> {
    tracing::info!("🔐 Initializing credential vault");
    let key = config
        .vault
        .key()
        .context("CREDENTIAL_ENCRYPTION_KEY must be set to 32 raw bytes or 64 hex characters")?;
    let vault = Arc::new(CredentialVault::new(key));

    tracing::info!(
        "🌍 Initializing HTTP dispatcher (timeout: {:?})",
        config.engine.dispatch_timeout()
    );
    let dispatcher = HttpDispatcher::new(config.engine.dispatch_timeout())
        .map_err(|e| anyhow::anyhow!("Failed to initialize HTTP dispatcher: {}", e))?;

    tracing::info!(
        "🚀 Initializing execution engine (max in flight: {})",
        config.engine.max_in_flight()
    );
    let executor = Arc::new(NodeExecutor::new(Arc::clone(&vault), Arc::new(dispatcher)));
    let engine = ExecutionEngine::new(Arc::clone(&store), executor, config.engine.clone());

    Ok(AppState { engine, store, vault })
}

/// Create the main Axum application with all routes
///
/// Opens (and if needed creates) the SQLite database, initializes the schema
/// and wires the engine into the HTTP routes.
pub async fn create_app(config: Config) -> Result<Router> {
    if let Some(dir) = database_dir(&config.database.url) {
        tracing::info!("📁 Ensuring data directory exists: {}", dir.display());
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;
    }

    tracing::info!("📋 Connecting to database: {}", config.database.url);
    let options = SqliteConnectOptions::from_str(&config.database.url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("Failed to open SQLite database")?;

    let store = SqliteStore::new(pool);
    store
        .init_schema()
        .await
        .context("Failed to initialize database schema")?;

    let state = create_state(&config, Arc::new(store))?;

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = build_router(state);

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
///
/// Creates the application and starts the Axum server on the configured address and port.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Relay server...");

    // Create the application
    let app = create_app(config.clone()).await?;

    // Bind to the configured address
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    // Start the server
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Parent directory of a file-backed SQLite URL
fn database_dir(url: &str) -> Option<&Path> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    Path::new(path).parent().filter(|p| !p.as_os_str().is_empty())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}

/// Configuration management for the Relay engine
///
/// Handles server configuration, database connection, engine limits and the
/// credential encryption key.

use crate::runtime::vault::{VaultError, VaultKey};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Execution engine limits
    pub engine: EngineConfig,
    /// Credential vault configuration
    pub vault: VaultConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL (default: "sqlite://data/relay.db")
    pub url: String,
}

/// Limits applied to every run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-request timeout of the dispatcher
    pub dispatch_timeout_ms: u64,
    /// Maximum number of nodes dispatched concurrently within one run
    pub max_in_flight: usize,
    /// Whole-run timeout; `None` means runs may take as long as they need
    pub run_timeout_ms: Option<u64>,
}

impl EngineConfig {
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_ms.map(Duration::from_millis)
    }

    /// Concurrency bound, never below one
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.max(1)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_ms: std::env::var("RELAY_DISPATCH_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30_000),
            max_in_flight: std::env::var("RELAY_MAX_IN_FLIGHT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8usize)
                .max(1),
            run_timeout_ms: std::env::var("RELAY_RUN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| run_timeout_ms_from_secs(&v)),
        }
    }
}

/// Run timeout in milliseconds from a seconds value, clamped on overflow
fn run_timeout_ms_from_secs(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().map(|secs| secs.saturating_mul(1000))
}

/// Credential vault configuration
///
/// The key is read from the environment and never serialized.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(skip)]
    pub encryption_key: Option<String>,
}

impl VaultConfig {
    /// Parse the configured key
    pub fn key(&self) -> Result<VaultKey, VaultError> {
        VaultKey::parse(self.encryption_key.as_deref().ok_or(VaultError::InvalidKey)?)
    }
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("RELAY_PORT")
                    .unwrap_or_else(|_| "3004".to_string())
                    .parse()
                    .unwrap_or(3004),
            },
            database: DatabaseConfig {
                url: std::env::var("RELAY_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/relay.db".to_string()),
            },
            engine: EngineConfig::default(),
            vault: VaultConfig {
                encryption_key: std::env::var("CREDENTIAL_ENCRYPTION_KEY").ok(),
            },
        }
    }
}

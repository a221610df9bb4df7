//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Proxy IPs/CIDR ranges whose X-Forwarded-For / X-Real-IP headers are
    /// trusted when resolving the requesting instance's address.
    /// Empty means forwarded headers are ignored. `["*"]` trusts everyone
    /// (development only).
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            trusted_proxies: Vec::new(),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single node, tests and small deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Busy timeout in seconds while waiting for the write lock.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL (optional if using individual fields).
        /// Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// Prefer CAIRN_METADATA__PASSWORD over storing it in a file.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(5)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => Err(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ),
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Tunables for the metadata/userdata upsert engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpsertConfig {
    /// Retries after the first failed attempt (0 = a single attempt).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound in milliseconds of the random sleep between attempts.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Deadline in milliseconds for one attempt's transaction.
    #[serde(default = "default_tx_timeout_ms")]
    pub tx_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_interval_ms() -> u64 {
    100
}

fn default_tx_timeout_ms() -> u64 {
    15_000
}

impl Default for UpsertConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_interval_ms: default_retry_interval_ms(),
            tx_timeout_ms: default_tx_timeout_ms(),
        }
    }
}

impl UpsertConfig {
    /// Backoff base interval.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Per-attempt transaction deadline.
    pub fn tx_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_timeout_ms)
    }

    /// Validate upsert configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.tx_timeout_ms == 0 {
            return Err("upsert.tx_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Upsert engine configuration.
    #[serde(default)]
    pub upsert: UpsertConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses SQLite metadata and a short retry interval.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            metadata: MetadataConfig::default(),
            upsert: UpsertConfig {
                max_retries: 2,
                retry_interval_ms: 5,
                tx_timeout_ms: default_tx_timeout_ms(),
            },
        }
    }

    /// Validate every section, returning the first error.
    pub fn validate(&self) -> Result<(), String> {
        self.metadata.validate()?;
        self.upsert.validate()
    }
}

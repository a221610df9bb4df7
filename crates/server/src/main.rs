//! cairn server binary.

use anyhow::{Context, Result};
use cairn_core::config::AppConfig;
use cairn_server::{AppState, create_router};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// cairn - instance metadata service
#[derive(Parser, Debug)]
#[command(name = "cairnd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "CAIRN_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Build the configuration from an optional TOML file plus `CAIRN_` env vars.
///
/// Every section has defaults (local SQLite, loopback bind), so neither
/// source is required.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(
            config_path = %path,
            "No config file found, using defaults and environment variables"
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("CAIRN_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;

    Ok(config)
}

async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Startup banner
    tracing::info!("cairn v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    // Register Prometheus metrics
    cairn_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    // Initialize metadata store (runs schema migrations)
    let metadata = cairn_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata store health check failed")?;
    tracing::info!("Metadata store initialized");

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    let state = AppState::new(config, metadata);
    let shutdown = state.shutdown.clone();
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);

    // Start server with ConnectInfo for client IP extraction
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::config::MetadataConfig;

    #[test]
    fn load_config_from_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "0.0.0.0:9000"
trusted_proxies = ["10.0.0.0/8"]

[metadata]
type = "sqlite"
path = "/var/lib/cairn/metadata.db"

[upsert]
max_retries = 3
retry_interval_ms = 50
"#,
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.trusted_proxies, vec!["10.0.0.0/8"]);
        assert!(matches!(config.metadata, MetadataConfig::Sqlite { .. }));
        assert_eq!(config.upsert.max_retries, 3);
        assert_eq!(config.upsert.retry_interval_ms, 50);
        assert_eq!(config.upsert.tx_timeout_ms, 15_000);
    }

    #[test]
    fn load_config_rejects_zero_timeout() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("server.toml");
        std::fs::write(&path, "[upsert]\ntx_timeout_ms = 0\n").unwrap();

        assert!(load_config(path.to_str().unwrap()).is_err());
    }
}

//! Application state shared across handlers.

use crate::client_ip::TrustedProxies;
use cairn_core::config::AppConfig;
use cairn_metadata::{MetadataStore, Upserter};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Upsert engine bound to `metadata`.
    pub upserter: Upserter,
    /// Peers allowed to supply the client address in forwarded headers.
    pub trusted_proxies: Arc<TrustedProxies>,
    /// Fires on shutdown; in-flight upserts stop retrying.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create a new application state.
    pub fn new(config: AppConfig, metadata: Arc<dyn MetadataStore>) -> Self {
        let upserter = Upserter::new(metadata.clone(), &config.upsert);
        let trusted_proxies = TrustedProxies::from_config(&config.server.trusted_proxies);

        tracing::info!(
            max_retries = config.upsert.max_retries,
            retry_interval_ms = config.upsert.retry_interval_ms,
            tx_timeout_ms = config.upsert.tx_timeout_ms,
            "Upsert engine configured"
        );

        Self {
            config: Arc::new(config),
            metadata,
            upserter,
            trusted_proxies: Arc::new(trusted_proxies),
            shutdown: CancellationToken::new(),
        }
    }
}

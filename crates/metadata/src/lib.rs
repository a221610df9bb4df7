//! Relational metadata store and upsert engine for cairn.
//!
//! This crate owns the persisted data model:
//! - Instance metadata documents and userdata blobs
//! - Instance address associations (each address has at most one owner)
//! - The transactional, retrying upsert that keeps both in step

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;
pub mod upsert;

pub use error::{MetadataError, MetadataResult};
pub use postgres::PostgresStore;
pub use store::{MetadataStore, SqliteStore};
pub use upsert::{ReconcileOutcome, TransactionError, UpsertError, Upserter};

use cairn_core::config::MetadataConfig;
use std::sync::Arc;

/// Open the configured backend and bring its schema up to date.
///
/// The engine only sees `Arc<dyn MetadataStore>`, so SQLite and PostgreSQL
/// are interchangeable from here on.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    let store: Arc<dyn MetadataStore> = match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            tracing::info!(path = %path.display(), "Opening SQLite metadata store");
            Arc::new(SqliteStore::new(path, *query_timeout_secs).await?)
        }
        MetadataConfig::Postgres { .. } => Arc::new(connect_postgres(config).await?),
    };
    Ok(store)
}

async fn connect_postgres(config: &MetadataConfig) -> MetadataResult<PostgresStore> {
    let MetadataConfig::Postgres {
        url,
        host,
        port,
        username,
        password,
        database,
        ssl_mode,
        max_connections,
        statement_timeout_ms,
    } = config
    else {
        return Err(MetadataError::Config(
            "expected a postgres metadata config".to_string(),
        ));
    };

    match (url, host, database) {
        (Some(url), _, _) => {
            tracing::info!(max_connections, "Opening PostgreSQL metadata store from URL");
            PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await
        }
        (None, Some(host), Some(database)) => {
            PostgresStore::from_params(
                host,
                port.unwrap_or(5432),
                username.as_deref(),
                password.as_deref(),
                database,
                *ssl_mode,
                *max_connections,
                *statement_timeout_ms,
            )
            .await
        }
        _ => Err(MetadataError::Config(
            "postgres config requires either 'url' or 'host' + 'database'".to_string(),
        )),
    }
}

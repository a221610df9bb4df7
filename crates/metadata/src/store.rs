//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{InstanceRepo, UpsertRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: InstanceRepo + UpsertRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
///
/// The pool holds a single connection, so upsert transactions are fully
/// serialised: a second writer waits for the pool until the first one
/// commits or rolls back. That is SQLite's stand-in for row locking.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let busy_timeout = Duration::from_secs(query_timeout_secs.unwrap_or(5));

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::info!(
            path = %path.display(),
            "SQLite metadata store ready (writes are serialised through one connection)"
        );

        Ok(store)
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::UpsertTx;
    use sqlx::Transaction;

    #[async_trait]
    impl InstanceRepo for SqliteStore {
        async fn get_metadata(
            &self,
            instance_id: &str,
        ) -> MetadataResult<Option<InstanceMetadataRow>> {
            let row = sqlx::query_as::<_, InstanceMetadataRow>(
                "SELECT id, metadata, created_at, updated_at FROM instance_metadata WHERE id = ?",
            )
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_userdata(
            &self,
            instance_id: &str,
        ) -> MetadataResult<Option<InstanceUserdataRow>> {
            let row = sqlx::query_as::<_, InstanceUserdataRow>(
                "SELECT id, userdata, created_at, updated_at FROM instance_userdata WHERE id = ?",
            )
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_metadata_by_address(
            &self,
            address: &str,
        ) -> MetadataResult<Option<InstanceMetadataRow>> {
            let row = sqlx::query_as::<_, InstanceMetadataRow>(
                r#"
                SELECT m.id, m.metadata, m.created_at, m.updated_at
                FROM instance_metadata m
                INNER JOIN instance_ip_addresses a ON a.instance_id = m.id
                WHERE lower(a.address) = lower(?)
                "#,
            )
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_userdata_by_address(
            &self,
            address: &str,
        ) -> MetadataResult<Option<InstanceUserdataRow>> {
            let row = sqlx::query_as::<_, InstanceUserdataRow>(
                r#"
                SELECT u.id, u.userdata, u.created_at, u.updated_at
                FROM instance_userdata u
                INNER JOIN instance_ip_addresses a ON a.instance_id = u.id
                WHERE lower(a.address) = lower(?)
                "#,
            )
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_addresses(
            &self,
            instance_id: &str,
        ) -> MetadataResult<Vec<InstanceIpAddressRow>> {
            let rows = sqlx::query_as::<_, InstanceIpAddressRow>(
                r#"
                SELECT id, instance_id, address, created_at, updated_at
                FROM instance_ip_addresses
                WHERE instance_id = ?
                ORDER BY address
                "#,
            )
            .bind(instance_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl UpsertRepo for SqliteStore {
        async fn begin_upsert(&self) -> MetadataResult<Box<dyn UpsertTx>> {
            let tx = self.pool.begin().await?;
            Ok(Box::new(SqliteUpsertTx { tx }))
        }
    }

    /// Upsert transaction on the single SQLite connection.
    ///
    /// SQLite has no `SELECT ... FOR UPDATE`; holding the pool's only
    /// connection gives the same exclusion.
    struct SqliteUpsertTx {
        tx: Transaction<'static, Sqlite>,
    }

    #[async_trait]
    impl UpsertTx for SqliteUpsertTx {
        async fn lock_instance_addresses(
            &mut self,
            instance_id: &str,
        ) -> MetadataResult<Vec<InstanceIpAddressRow>> {
            let rows = sqlx::query_as::<_, InstanceIpAddressRow>(
                r#"
                SELECT id, instance_id, address, created_at, updated_at
                FROM instance_ip_addresses
                WHERE instance_id = ?
                "#,
            )
            .bind(instance_id)
            .fetch_all(&mut *self.tx)
            .await?;
            Ok(rows)
        }

        async fn lock_conflicting_addresses(
            &mut self,
            instance_id: &str,
            addresses: &[String],
        ) -> MetadataResult<Vec<InstanceIpAddressRow>> {
            if addresses.is_empty() {
                return Ok(Vec::new());
            }

            // SQLite has a bound-parameter limit; batch large requests.
            const BATCH_SIZE: usize = 500;
            let mut rows = Vec::new();

            for batch in addresses.chunks(BATCH_SIZE) {
                let placeholders: Vec<&str> = batch.iter().map(|_| "lower(?)").collect();
                let query = format!(
                    r#"
                    SELECT id, instance_id, address, created_at, updated_at
                    FROM instance_ip_addresses
                    WHERE instance_id <> ? AND lower(address) IN ({})
                    "#,
                    placeholders.join(", ")
                );

                let mut query_builder =
                    sqlx::query_as::<_, InstanceIpAddressRow>(&query).bind(instance_id);
                for address in batch {
                    query_builder = query_builder.bind(address);
                }

                rows.extend(query_builder.fetch_all(&mut *self.tx).await?);
            }

            Ok(rows)
        }

        async fn delete_address(&mut self, row: &InstanceIpAddressRow) -> MetadataResult<()> {
            sqlx::query("DELETE FROM instance_ip_addresses WHERE id = ?")
                .bind(row.id)
                .execute(&mut *self.tx)
                .await?;
            Ok(())
        }

        async fn insert_address(&mut self, row: &InstanceIpAddressRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO instance_ip_addresses (id, instance_id, address, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.id)
            .bind(&row.instance_id)
            .bind(&row.address)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(MetadataError::from_db)?;
            Ok(())
        }

        async fn upsert_metadata(&mut self, row: &InstanceMetadataRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO instance_metadata (id, metadata, created_at, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&row.id)
            .bind(&row.metadata)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(MetadataError::from_db)?;
            Ok(())
        }

        async fn upsert_userdata(&mut self, row: &InstanceUserdataRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO instance_userdata (id, userdata, created_at, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    userdata = excluded.userdata,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&row.id)
            .bind(&row.userdata)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(MetadataError::from_db)?;
            Ok(())
        }

        async fn commit(self: Box<Self>) -> MetadataResult<()> {
            self.tx.commit().await?;
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> MetadataResult<()> {
            self.tx.rollback().await?;
            Ok(())
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Instance metadata documents (JSON text)
CREATE TABLE IF NOT EXISTS instance_metadata (
    id TEXT PRIMARY KEY,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Instance userdata blobs
CREATE TABLE IF NOT EXISTS instance_userdata (
    id TEXT PRIMARY KEY,
    userdata TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Lookup addresses; an address belongs to at most one instance
CREATE TABLE IF NOT EXISTS instance_ip_addresses (
    id BLOB PRIMARY KEY,
    instance_id TEXT NOT NULL,
    address TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_instance_ip_addresses_address
    ON instance_ip_addresses (lower(address));
CREATE INDEX IF NOT EXISTS idx_instance_ip_addresses_instance
    ON instance_ip_addresses (instance_id);
"#;

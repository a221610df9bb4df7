//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{InstanceRepo, UpsertRepo, UpsertTx};
use crate::store::MetadataStore;
use async_trait::async_trait;
use cairn_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres, Transaction};
use std::str::FromStr;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
///
/// Upserts take row locks with `SELECT ... FOR UPDATE`, so two writers
/// touching the same address rows are serialised by the database.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Never log the password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl InstanceRepo for PostgresStore {
    async fn get_metadata(&self, instance_id: &str) -> MetadataResult<Option<InstanceMetadataRow>> {
        let row = sqlx::query_as::<_, InstanceMetadataRow>(
            "SELECT id, metadata, created_at, updated_at FROM instance_metadata WHERE id = $1",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_userdata(&self, instance_id: &str) -> MetadataResult<Option<InstanceUserdataRow>> {
        let row = sqlx::query_as::<_, InstanceUserdataRow>(
            "SELECT id, userdata, created_at, updated_at FROM instance_userdata WHERE id = $1",
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
            WHERE lower(a.address) = lower($1)
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
            WHERE lower(a.address) = lower($1)
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_addresses(&self, instance_id: &str) -> MetadataResult<Vec<InstanceIpAddressRow>> {
        let rows = sqlx::query_as::<_, InstanceIpAddressRow>(
            r#"
            SELECT id, instance_id, address, created_at, updated_at
            FROM instance_ip_addresses
            WHERE instance_id = $1
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
impl UpsertRepo for PostgresStore {
    async fn begin_upsert(&self) -> MetadataResult<Box<dyn UpsertTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUpsertTx { tx }))
    }
}

/// Upsert transaction holding PostgreSQL row locks until commit/rollback.
struct PgUpsertTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UpsertTx for PgUpsertTx {
    async fn lock_instance_addresses(
        &mut self,
        instance_id: &str,
    ) -> MetadataResult<Vec<InstanceIpAddressRow>> {
        let rows = sqlx::query_as::<_, InstanceIpAddressRow>(
            r#"
            SELECT id, instance_id, address, created_at, updated_at
            FROM instance_ip_addresses
            WHERE instance_id = $1
            FOR UPDATE
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

        let lowered: Vec<String> = addresses.iter().map(|a| a.to_lowercase()).collect();

        let rows = sqlx::query_as::<_, InstanceIpAddressRow>(
            r#"
            SELECT id, instance_id, address, created_at, updated_at
            FROM instance_ip_addresses
            WHERE instance_id <> $1 AND lower(address) = ANY($2)
            FOR UPDATE
            "#,
        )
        .bind(instance_id)
        .bind(&lowered)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn delete_address(&mut self, row: &InstanceIpAddressRow) -> MetadataResult<()> {
        sqlx::query("DELETE FROM instance_ip_addresses WHERE id = $1")
            .bind(row.id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_address(&mut self, row: &InstanceIpAddressRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO instance_ip_addresses (id, instance_id, address, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
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
            VALUES ($1, $2, $3, $4)
            ON CONFLICT(id) DO UPDATE SET
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
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
            VALUES ($1, $2, $3, $4)
            ON CONFLICT(id) DO UPDATE SET
                userdata = EXCLUDED.userdata,
                updated_at = EXCLUDED.updated_at
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

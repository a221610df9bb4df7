//! Shared fixtures for metadata store tests.

#![allow(dead_code)]

pub mod mocks;

use async_trait::async_trait;
use cairn_core::{AddressSet, InstanceId};
use cairn_metadata::repos::UpsertTx;
use cairn_metadata::upsert::{MetadataUpserter, RecordUpserter, Reconciler, RetrySupervisor};
use cairn_metadata::{
    MetadataError, MetadataResult, MetadataStore, PostgresStore, SqliteStore, Upserter,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Stable prefix for Docker/container startup failures in Postgres test setup.
/// Tests use this marker to decide whether to skip due to unavailable Docker.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// SQLite store in a temporary directory, removed on drop.
pub struct TestMetadata {
    pub store: Arc<dyn MetadataStore>,
    _temp_dir: TempDir,
}

impl TestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = SqliteStore::new(temp_dir.path().join("test.db"), None).await?;

        Ok(Self {
            store: Arc::new(store),
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }
}

/// PostgreSQL store backed by a throwaway container.
pub struct PostgresTestMetadata {
    pub store: Arc<dyn MetadataStore>,
    _container: ContainerAsync<Postgres>,
}

impl PostgresTestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                MetadataError::Internal(format!(
                    "{} Failed to start PostgreSQL container: {e}",
                    POSTGRES_CONTAINER_START_ERR_PREFIX
                ))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        // Default credentials from testcontainers-modules postgres
        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
        let store = PostgresStore::from_url(&url, 5, None).await?;

        Ok(Self {
            store: Arc::new(store),
            _container: container,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }
}

/// Start a PostgreSQL store, or `None` when Docker is unavailable or
/// SKIP_POSTGRES_TESTS is set. Other setup failures still panic.
pub async fn postgres_or_skip() -> Option<PostgresTestMetadata> {
    if std::env::var("SKIP_POSTGRES_TESTS").is_ok() {
        return None;
    }
    match PostgresTestMetadata::new().await {
        Ok(metadata) => Some(metadata),
        Err(err) => {
            let msg = err.to_string();
            if msg.contains(POSTGRES_CONTAINER_START_ERR_PREFIX) {
                eprintln!("Skipping PostgreSQL test (Docker unavailable): {msg}");
                None
            } else {
                panic!("PostgreSQL test setup failed: {msg}");
            }
        }
    }
}

/// Run a test against SQLite, then against PostgreSQL when Docker is available.
pub async fn run_metadata_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn MetadataStore>) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestMetadata::new()
        .await
        .expect("Failed to create SQLite test metadata");
    test_fn.clone()(sqlite.store()).await;

    if let Some(postgres) = postgres_or_skip().await {
        test_fn(postgres.store()).await;
    }
}

/// Upserter with fast retries for tests.
pub fn upserter(store: Arc<dyn MetadataStore>, max_retries: u32) -> Upserter {
    Upserter::with_parts(
        store,
        Reconciler::new(Duration::from_secs(10)),
        RetrySupervisor::new(max_retries, Duration::from_millis(5)),
    )
}

pub fn instance(id: &str) -> InstanceId {
    InstanceId::parse(id).unwrap()
}

pub fn addresses(list: &[&str]) -> AddressSet {
    AddressSet::parse(list).unwrap()
}

/// Addresses currently stored for `instance_id`, sorted.
pub async fn stored_addresses(store: &Arc<dyn MetadataStore>, instance_id: &str) -> Vec<String> {
    let mut list: Vec<String> = store
        .list_addresses(instance_id)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.address)
        .collect();
    list.sort();
    list
}

/// Payload policy that fails its first `failures` calls, then writes metadata.
pub struct FlakyUpserter {
    inner: MetadataUpserter,
    failures: u32,
    pub calls: AtomicU32,
}

impl FlakyUpserter {
    pub fn new(instance_id: &str, metadata: &str, failures: u32) -> Self {
        Self {
            inner: MetadataUpserter::new(instance_id, metadata),
            failures,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordUpserter for FlakyUpserter {
    fn kind(&self) -> &'static str {
        "metadata"
    }

    async fn upsert(&self, tx: &mut dyn UpsertTx) -> MetadataResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(MetadataError::Internal(format!(
                "forced payload failure on attempt {call}"
            )));
        }
        self.inner.upsert(tx).await
    }
}

/// Payload policy that stalls before writing.
pub struct SlowUpserter {
    inner: MetadataUpserter,
    delay: Duration,
}

impl SlowUpserter {
    pub fn new(instance_id: &str, metadata: &str, delay: Duration) -> Self {
        Self {
            inner: MetadataUpserter::new(instance_id, metadata),
            delay,
        }
    }
}

#[async_trait]
impl RecordUpserter for SlowUpserter {
    fn kind(&self) -> &'static str {
        "metadata"
    }

    async fn upsert(&self, tx: &mut dyn UpsertTx) -> MetadataResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert(tx).await
    }
}

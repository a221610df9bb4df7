//! Upsert reconciliation engine.
//!
//! An upsert replaces an instance's full address set and writes its
//! metadata or userdata payload in one transaction. Addresses claimed by
//! another instance are evicted from it: the latest claim wins.
//!
//! Layering, outermost first:
//! - [`Upserter`]: entry point used by the API layer
//! - [`RetrySupervisor`]: bounded retries with full-jitter backoff
//! - [`Reconciler`]: one transactional attempt
//! - [`AddressDiff`] and [`RecordUpserter`]: pure diffing and the payload write

pub mod diff;
pub mod error;
pub mod policy;
pub mod reconcile;
pub mod retry;

pub use diff::{AddressDiff, Addressed};
pub use error::{TransactionError, UpsertError, UpsertStage};
pub use policy::{MetadataUpserter, RecordUpserter, UserdataUpserter, extract_network_addresses};
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use retry::RetrySupervisor;

use crate::store::MetadataStore;
use cairn_core::config::UpsertConfig;
use cairn_core::{AddressSet, InstanceId};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Metadata/userdata upserts against one store.
#[derive(Clone)]
pub struct Upserter {
    store: Arc<dyn MetadataStore>,
    reconciler: Reconciler,
    supervisor: RetrySupervisor,
}

impl Upserter {
    pub fn new(store: Arc<dyn MetadataStore>, config: &UpsertConfig) -> Self {
        Self::with_parts(
            store,
            Reconciler::new(config.tx_timeout()),
            RetrySupervisor::from_config(config),
        )
    }

    pub fn with_parts(
        store: Arc<dyn MetadataStore>,
        reconciler: Reconciler,
        supervisor: RetrySupervisor,
    ) -> Self {
        Self {
            store,
            reconciler,
            supervisor,
        }
    }

    /// Replace the instance's addresses and store its metadata document.
    pub async fn upsert_metadata(
        &self,
        instance_id: &InstanceId,
        addresses: &AddressSet,
        metadata: &Value,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, UpsertError> {
        let document = serde_json::to_string(metadata)
            .map_err(|e| UpsertError::InvalidRequest(format!("metadata is not valid JSON: {e}")))?;

        tracing::info!(
            instance_id = %instance_id,
            addresses = ?addresses.as_slice(),
            network_addresses = ?extract_network_addresses(metadata),
            "Upserting instance metadata"
        );

        let policy = MetadataUpserter::new(instance_id.as_str(), document);
        self.upsert_with(instance_id, addresses, &policy, cancel).await
    }

    /// Replace the instance's addresses and store its userdata.
    pub async fn upsert_userdata(
        &self,
        instance_id: &InstanceId,
        addresses: &AddressSet,
        userdata: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, UpsertError> {
        tracing::info!(
            instance_id = %instance_id,
            addresses = ?addresses.as_slice(),
            bytes = userdata.len(),
            "Upserting instance userdata"
        );

        let policy = UserdataUpserter::new(instance_id.as_str(), userdata);
        self.upsert_with(instance_id, addresses, &policy, cancel).await
    }

    /// Run a reconciliation with an arbitrary payload policy.
    pub async fn upsert_with(
        &self,
        instance_id: &InstanceId,
        addresses: &AddressSet,
        policy: &dyn RecordUpserter,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, UpsertError> {
        let store: &dyn MetadataStore = self.store.as_ref();
        let reconciler = &self.reconciler;
        let requested = addresses.as_slice();

        self.supervisor
            .run(instance_id, cancel, move |_| {
                reconciler.reconcile(store, instance_id, requested, policy)
            })
            .await
    }
}

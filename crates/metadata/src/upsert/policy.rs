//! Record upsert policies.
//!
//! A policy writes the instance's payload inside the reconciliation
//! transaction, which lets metadata and userdata share one engine.

use crate::error::MetadataResult;
use crate::models::{InstanceMetadataRow, InstanceUserdataRow};
use crate::repos::UpsertTx;
use async_trait::async_trait;
use serde_json::Value;

/// Writes one payload record for an instance inside an open transaction.
///
/// Called once per attempt, so implementations must be repeatable.
#[async_trait]
pub trait RecordUpserter: Send + Sync {
    /// Short name used in logs ("metadata", "userdata").
    fn kind(&self) -> &'static str;

    /// Write the record.
    async fn upsert(&self, tx: &mut dyn UpsertTx) -> MetadataResult<()>;
}

/// Upserts an `instance_metadata` row.
#[derive(Clone, Debug)]
pub struct MetadataUpserter {
    instance_id: String,
    metadata: String,
}

impl MetadataUpserter {
    pub fn new(instance_id: impl Into<String>, metadata: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            metadata: metadata.into(),
        }
    }
}

#[async_trait]
impl RecordUpserter for MetadataUpserter {
    fn kind(&self) -> &'static str {
        "metadata"
    }

    async fn upsert(&self, tx: &mut dyn UpsertTx) -> MetadataResult<()> {
        let row = InstanceMetadataRow::new(self.instance_id.as_str(), self.metadata.as_str());
        tx.upsert_metadata(&row).await
    }
}

/// Upserts an `instance_userdata` row.
#[derive(Clone, Debug)]
pub struct UserdataUpserter {
    instance_id: String,
    userdata: String,
}

impl UserdataUpserter {
    pub fn new(instance_id: impl Into<String>, userdata: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            userdata: userdata.into(),
        }
    }
}

#[async_trait]
impl RecordUpserter for UserdataUpserter {
    fn kind(&self) -> &'static str {
        "userdata"
    }

    async fn upsert(&self, tx: &mut dyn UpsertTx) -> MetadataResult<()> {
        let row = InstanceUserdataRow::new(self.instance_id.as_str(), self.userdata.as_str());
        tx.upsert_userdata(&row).await
    }
}

/// Collect `network.addresses[*].address` from a metadata document.
///
/// Only used for logging; any shape mismatch yields an empty list.
pub fn extract_network_addresses(metadata: &Value) -> Vec<String> {
    metadata
        .get("network")
        .and_then(|network| network.get("addresses"))
        .and_then(Value::as_array)
        .map(|addresses| {
            addresses
                .iter()
                .filter_map(|entry| entry.get("address").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

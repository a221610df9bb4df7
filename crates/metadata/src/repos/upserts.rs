//! Transactional write interface used by the upsert engine.

use crate::error::MetadataResult;
use crate::models::{InstanceIpAddressRow, InstanceMetadataRow, InstanceUserdataRow};
use async_trait::async_trait;

/// An open write transaction.
///
/// Dropping an uncommitted transaction rolls it back, so a cancelled
/// upsert never leaves partial writes behind.
#[async_trait]
pub trait UpsertTx: Send {
    /// Select and lock every address row owned by `instance_id`.
    async fn lock_instance_addresses(
        &mut self,
        instance_id: &str,
    ) -> MetadataResult<Vec<InstanceIpAddressRow>>;

    /// Select and lock the rows for `addresses` (matched case-insensitively)
    /// that are owned by any instance other than `instance_id`.
    async fn lock_conflicting_addresses(
        &mut self,
        instance_id: &str,
        addresses: &[String],
    ) -> MetadataResult<Vec<InstanceIpAddressRow>>;

    /// Delete one address row by its row ID.
    async fn delete_address(&mut self, row: &InstanceIpAddressRow) -> MetadataResult<()>;

    /// Insert one address row.
    async fn insert_address(&mut self, row: &InstanceIpAddressRow) -> MetadataResult<()>;

    /// Insert the metadata record, or update `metadata` and `updated_at`
    /// when a record for the same instance already exists.
    async fn upsert_metadata(&mut self, row: &InstanceMetadataRow) -> MetadataResult<()>;

    /// Insert the userdata record, or update `userdata` and `updated_at`
    /// when a record for the same instance already exists.
    async fn upsert_userdata(&mut self, row: &InstanceUserdataRow) -> MetadataResult<()>;

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> MetadataResult<()>;

    /// Roll the transaction back.
    async fn rollback(self: Box<Self>) -> MetadataResult<()>;
}

/// Repository able to open upsert transactions.
#[async_trait]
pub trait UpsertRepo: Send + Sync {
    /// Begin a new write transaction.
    async fn begin_upsert(&self) -> MetadataResult<Box<dyn UpsertTx>>;
}

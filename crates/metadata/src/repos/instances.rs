//! Read-side repository for instance records and address associations.

use crate::error::MetadataResult;
use crate::models::{InstanceIpAddressRow, InstanceMetadataRow, InstanceUserdataRow};
use async_trait::async_trait;

/// Repository for looking up instance metadata and userdata.
///
/// Address lookups match case-insensitively.
#[async_trait]
pub trait InstanceRepo: Send + Sync {
    /// Get the metadata record for an instance.
    async fn get_metadata(&self, instance_id: &str) -> MetadataResult<Option<InstanceMetadataRow>>;

    /// Get the userdata record for an instance.
    async fn get_userdata(&self, instance_id: &str) -> MetadataResult<Option<InstanceUserdataRow>>;

    /// Get the metadata record of the instance currently owning `address`.
    async fn get_metadata_by_address(
        &self,
        address: &str,
    ) -> MetadataResult<Option<InstanceMetadataRow>>;

    /// Get the userdata record of the instance currently owning `address`.
    async fn get_userdata_by_address(
        &self,
        address: &str,
    ) -> MetadataResult<Option<InstanceUserdataRow>>;

    /// List the addresses associated with an instance, ordered by address.
    async fn list_addresses(&self, instance_id: &str) -> MetadataResult<Vec<InstanceIpAddressRow>>;
}

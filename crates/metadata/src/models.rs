//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Instance payload records
// =============================================================================

/// Metadata document stored for an instance (JSON text).
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct InstanceMetadataRow {
    pub id: String,
    pub metadata: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl InstanceMetadataRow {
    /// Build a row for a write happening now.
    pub fn new(id: impl Into<String>, metadata: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            metadata: metadata.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Userdata blob stored for an instance (opaque text, e.g. cloud-init).
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct InstanceUserdataRow {
    pub id: String,
    pub userdata: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl InstanceUserdataRow {
    /// Build a row for a write happening now.
    pub fn new(id: impl Into<String>, userdata: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            userdata: userdata.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// Address associations
// =============================================================================

/// Association between an instance and one of its lookup addresses.
///
/// `address` is unique across all instances (case-insensitively).
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct InstanceIpAddressRow {
    pub id: Uuid,
    pub instance_id: String,
    pub address: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl InstanceIpAddressRow {
    /// Build a new association row bound to `instance_id`.
    pub fn new(instance_id: impl Into<String>, address: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            instance_id: instance_id.into(),
            address: address.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

//! Repository traits for metadata operations.

pub mod instances;
pub mod upserts;

pub use instances::InstanceRepo;
pub use upserts::{UpsertRepo, UpsertTx};

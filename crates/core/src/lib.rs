//! Core domain types and shared configuration for the cairn metadata service.
//!
//! This crate defines the data model used across the other crates:
//! - Instance identifiers
//! - Lookup addresses and requested address sets
//! - Application configuration

pub mod config;
pub mod error;
pub mod instance;

pub use error::{Error, Result};
pub use instance::{AddressSet, InstanceId, parse_address};

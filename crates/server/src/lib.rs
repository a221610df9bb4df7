//! HTTP API server for the cairn instance metadata service.
//!
//! This crate provides the HTTP surface:
//! - Metadata and userdata upserts (with address reconciliation)
//! - Lookups by instance ID and by the caller's address
//! - Health probes and Prometheus metrics

pub mod client_ip;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;

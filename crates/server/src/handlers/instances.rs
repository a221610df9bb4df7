//! Upserts and lookups keyed by instance ID.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use cairn_core::{AddressSet, InstanceId};
use cairn_metadata::models::{InstanceIpAddressRow, InstanceMetadataRow, InstanceUserdataRow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Request body for metadata upserts.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRequest {
    pub id: String,
    pub metadata: Value,
    /// Full set of addresses the instance owns; omitted means none.
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

/// Request body for userdata upserts.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserdataRequest {
    pub id: String,
    pub userdata: String,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

/// Stored metadata for one instance.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataResponse {
    pub id: String,
    pub metadata: Value,
    pub ip_addresses: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Stored userdata for one instance.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserdataResponse {
    pub id: String,
    pub userdata: String,
    pub ip_addresses: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

fn format_timestamp(ts: OffsetDateTime) -> ApiResult<String> {
    ts.format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format timestamp: {e}")))
}

fn address_list(rows: Vec<InstanceIpAddressRow>) -> Vec<String> {
    rows.into_iter().map(|row| row.address).collect()
}

impl MetadataResponse {
    fn from_rows(row: InstanceMetadataRow, addresses: Vec<InstanceIpAddressRow>) -> ApiResult<Self> {
        let metadata = serde_json::from_str(&row.metadata)
            .map_err(|e| ApiError::Internal(format!("stored metadata is not valid JSON: {e}")))?;
        Ok(Self {
            id: row.id,
            metadata,
            ip_addresses: address_list(addresses),
            created_at: format_timestamp(row.created_at)?,
            updated_at: format_timestamp(row.updated_at)?,
        })
    }
}

impl UserdataResponse {
    fn from_rows(row: InstanceUserdataRow, addresses: Vec<InstanceIpAddressRow>) -> ApiResult<Self> {
        Ok(Self {
            id: row.id,
            userdata: row.userdata,
            ip_addresses: address_list(addresses),
            created_at: format_timestamp(row.created_at)?,
            updated_at: format_timestamp(row.updated_at)?,
        })
    }
}

async fn load_metadata(state: &AppState, id: &InstanceId) -> ApiResult<MetadataResponse> {
    let row = state
        .metadata
        .get_metadata(id.as_str())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("metadata for instance {id}")))?;
    let addresses = state.metadata.list_addresses(id.as_str()).await?;
    MetadataResponse::from_rows(row, addresses)
}

async fn load_userdata(state: &AppState, id: &InstanceId) -> ApiResult<UserdataResponse> {
    let row = state
        .metadata
        .get_userdata(id.as_str())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("userdata for instance {id}")))?;
    let addresses = state.metadata.list_addresses(id.as_str()).await?;
    UserdataResponse::from_rows(row, addresses)
}

/// POST /device-metadata - Store an instance's metadata and addresses.
pub async fn upsert_metadata(
    State(state): State<AppState>,
    Json(req): Json<MetadataRequest>,
) -> ApiResult<Json<MetadataResponse>> {
    let id = InstanceId::parse(&req.id)?;
    let addresses = AddressSet::parse(&req.ip_addresses)?;

    let timer = metrics::UPSERT_DURATION
        .with_label_values(&["metadata"])
        .start_timer();
    let result = state
        .upserter
        .upsert_metadata(&id, &addresses, &req.metadata, &state.shutdown)
        .await;
    timer.observe_duration();
    metrics::record_upsert("metadata", result)?;

    Ok(Json(load_metadata(&state, &id).await?))
}

/// POST /device-userdata - Store an instance's userdata and addresses.
pub async fn upsert_userdata(
    State(state): State<AppState>,
    Json(req): Json<UserdataRequest>,
) -> ApiResult<Json<UserdataResponse>> {
    let id = InstanceId::parse(&req.id)?;
    let addresses = AddressSet::parse(&req.ip_addresses)?;

    let timer = metrics::UPSERT_DURATION
        .with_label_values(&["userdata"])
        .start_timer();
    let result = state
        .upserter
        .upsert_userdata(&id, &addresses, &req.userdata, &state.shutdown)
        .await;
    timer.observe_duration();
    metrics::record_upsert("userdata", result)?;

    Ok(Json(load_userdata(&state, &id).await?))
}

/// GET /device-metadata/{id}
pub async fn get_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MetadataResponse>> {
    let id = InstanceId::parse(&id)?;
    Ok(Json(load_metadata(&state, &id).await?))
}

/// GET /device-userdata/{id}
pub async fn get_userdata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UserdataResponse>> {
    let id = InstanceId::parse(&id)?;
    Ok(Json(load_userdata(&state, &id).await?))
}

//! Lookups by the caller's own address.
//!
//! An instance fetches its metadata or userdata without knowing its ID:
//! the request's source address selects the record.

use crate::client_ip::client_ip;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::header;
use axum::response::IntoResponse;
use cairn_core::parse_address;
use serde_json::Value;

fn caller_address(state: &AppState, req: &Request) -> ApiResult<String> {
    let raw = client_ip(req, &state.trusted_proxies)
        .ok_or_else(|| ApiError::BadRequest("unable to determine client address".to_string()))?;
    Ok(parse_address(&raw)?)
}

/// GET /metadata - The metadata document of the instance owning the caller's address.
pub async fn lookup_metadata(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<Value>> {
    let address = caller_address(&state, &req)?;

    let Some(row) = state.metadata.get_metadata_by_address(&address).await? else {
        metrics::record_lookup("metadata", false);
        return Err(ApiError::NotFound(format!("no metadata for address {address}")));
    };
    metrics::record_lookup("metadata", true);

    tracing::debug!(address = %address, instance_id = %row.id, "Served metadata by address");
    let document = serde_json::from_str(&row.metadata)
        .map_err(|e| ApiError::Internal(format!("stored metadata is not valid JSON: {e}")))?;
    Ok(Json(document))
}

/// GET /userdata - The userdata of the instance owning the caller's address, as text.
pub async fn lookup_userdata(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<impl IntoResponse> {
    let address = caller_address(&state, &req)?;

    let Some(row) = state.metadata.get_userdata_by_address(&address).await? else {
        metrics::record_lookup("userdata", false);
        return Err(ApiError::NotFound(format!("no userdata for address {address}")));
    };
    metrics::record_lookup("userdata", true);

    tracing::debug!(address = %address, instance_id = %row.id, "Served userdata by address");
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        row.userdata,
    ))
}

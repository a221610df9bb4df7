//! Prometheus metrics for the cairn server.
//!
//! The `/metrics` endpoint is unauthenticated; restrict it to the scraper's
//! network at the infrastructure level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use cairn_metadata::{ReconcileOutcome, UpsertError};
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static UPSERT_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cairn_upsert_requests_total",
            "Upsert requests by record kind and outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("metric creation failed")
});

pub static UPSERT_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "cairn_upsert_duration_seconds",
            "Time taken by an upsert, retries included",
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0]),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static ADDRESSES_EVICTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cairn_addresses_evicted_total",
        "Addresses taken over from another instance",
    )
    .expect("metric creation failed")
});

pub static LOOKUPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cairn_lookups_total",
            "Client-address lookups by record kind and result",
        ),
        &["kind", "result"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPSERT_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPSERT_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ADDRESSES_EVICTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(LOOKUPS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus text exposition.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Count an upsert result and pass it through.
pub fn record_upsert(
    kind: &str,
    result: Result<ReconcileOutcome, UpsertError>,
) -> Result<ReconcileOutcome, UpsertError> {
    let outcome = match &result {
        Ok(outcome) => {
            ADDRESSES_EVICTED.inc_by(outcome.evicted.len() as u64);
            "ok"
        }
        Err(UpsertError::InvalidRequest(_)) => "invalid",
        Err(UpsertError::RetriesExhausted { .. }) => "exhausted",
        Err(UpsertError::Cancelled { .. }) => "cancelled",
    };
    UPSERT_REQUESTS.with_label_values(&[kind, outcome]).inc();
    result
}

/// Count a lookup by client address.
pub fn record_lookup(kind: &str, found: bool) {
    let result = if found { "found" } else { "not_found" };
    LOOKUPS.with_label_values(&[kind, result]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        // This would panic if any metric creation failed
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_record_upsert_counts_evictions() {
        let before = ADDRESSES_EVICTED.get();
        let outcome = ReconcileOutcome {
            evicted: vec![cairn_metadata::models::InstanceIpAddressRow::new(
                "i-old", "10.0.0.1",
            )],
            ..Default::default()
        };
        let result = record_upsert("metadata", Ok(outcome));
        assert!(result.is_ok());
        assert!(ADDRESSES_EVICTED.get() >= before + 1);
        assert!(
            UPSERT_REQUESTS
                .with_label_values(&["metadata", "ok"])
                .get()
                >= 1
        );
    }
}

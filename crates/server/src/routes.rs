//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::http::{Method, header};
use axum::routing::{get, post};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// How long browsers may cache a preflight answer.
const CORS_MAX_AGE: Duration = Duration::from_secs(12 * 60 * 60);

/// Versioned API routes, mounted at `/` and at `/api/v1`.
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/device-metadata", post(handlers::upsert_metadata))
        .route("/device-metadata/{id}", get(handlers::get_metadata))
        .route("/device-userdata", post(handlers::upsert_userdata))
        .route("/device-userdata/{id}", get(handlers::get_userdata))
        // Lookups by the caller's address
        .route("/metadata", get(handlers::lookup_metadata))
        .route("/userdata", get(handlers::lookup_userdata))
}

/// Any origin may call the API with credentials. The origin is echoed
/// back since a wildcard is not allowed alongside credentials.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::HEAD,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_LENGTH,
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ])
        .allow_credentials(true)
        .max_age(CORS_MAX_AGE)
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        // Health probes (unauthenticated, for load balancers/k8s)
        .route("/healthz", get(handlers::liveness))
        .route("/healthz/liveness", get(handlers::liveness))
        .route("/healthz/readiness", get(handlers::readiness))
        .merge(api_routes())
        .nest("/api/v1", api_routes());

    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .fallback(handlers::route_not_found)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

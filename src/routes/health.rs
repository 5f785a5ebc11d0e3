// src/routes/health.rs
//! Liveness endpoint.
//!
//! Used by container orchestrators and CI to verify the service answers HTTP
//! requests. It does not touch the feed or the fallback store.

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Subrouter with a single GET `/health` route, generic over the gateway
/// state so it merges cleanly.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}

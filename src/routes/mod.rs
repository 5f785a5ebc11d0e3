//! HTTP query interface over a [`WeatherPipeline`].
//!
//! Each sibling module exports a subrouter; this gateway merges them and
//! attaches the shared pipeline as state, so `main.rs` never sees individual
//! endpoints.

use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::models::RangeTag;
use crate::pipeline::WeatherPipeline;

mod get_anomalies;
mod get_battery;
mod get_records;
mod get_series;
mod get_status;
mod health;

// ---

pub type AppState = Arc<WeatherPipeline>;

pub fn router(pipeline: AppState) -> Router {
    // ---
    Router::new()
        .merge(get_records::router())
        .merge(get_anomalies::router())
        .merge(get_series::router())
        .merge(get_battery::router())
        .merge(get_status::router())
        .merge(health::router())
        .with_state(pipeline)
}

/// `?range=` selector shared by the query endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct RangeQuery {
    range: Option<String>,
}

impl RangeQuery {
    pub(crate) fn tag(&self) -> RangeTag {
        self.range.as_deref().map(RangeTag::from_tag).unwrap_or_default()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// No live data and no mirror: report "no data available" rather than fail.
pub(crate) fn unavailable(e: FetchError) -> axum::response::Response {
    tracing::error!("Request could not be served: {}", e);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

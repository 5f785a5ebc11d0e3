use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use tracing::info;

use super::{unavailable, AppState, RangeQuery};
use crate::battery::battery_status;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/battery", get(handler))
}

/// Latest battery reading in the window, `null` when there is none.
async fn handler(
    Query(params): Query<RangeQuery>,
    State(pipeline): State<AppState>,
) -> impl IntoResponse {
    // ---
    let range = params.tag();
    info!("GET /battery - range {}", range);

    match pipeline.get_records(range).await {
        Ok(records) => (StatusCode::OK, Json(battery_status(&records))).into_response(),
        Err(e) => unavailable(e),
    }
}

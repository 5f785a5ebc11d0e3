use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::Serialize;
use tracing::info;

use super::{unavailable, AppState, RangeQuery};
use crate::models::{RangeTag, WeatherRecord};

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/records", get(handler))
}

#[derive(Serialize)]
struct RecordsResponse {
    range: RangeTag,
    count: usize,
    records: Vec<WeatherRecord>,
}

async fn handler(
    Query(params): Query<RangeQuery>,
    State(pipeline): State<AppState>,
) -> impl IntoResponse {
    // ---
    let range = params.tag();
    info!("GET /records - range {}", range);

    match pipeline.get_records(range).await {
        Ok(records) => (
            StatusCode::OK,
            Json(RecordsResponse {
                range,
                count: records.len(),
                records,
            }),
        )
            .into_response(),
        Err(e) => unavailable(e),
    }
}

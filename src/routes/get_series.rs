use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{unavailable, AppState};
use crate::models::{channels, RangeTag, WeatherRecord};
use crate::window;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/series", get(handler))
}

#[derive(Debug, Deserialize)]
struct SeriesQuery {
    range: Option<String>,
    /// Channel to plot, e.g. `airtemp_Avg` (default).
    field: Option<String>,
}

#[derive(Serialize)]
struct SeriesResponse {
    range: RangeTag,
    field: String,
    count: usize,
    records: Vec<WeatherRecord>,
}

/// Windowed, cleaned and downsampled records for one chart channel.
async fn handler(
    Query(params): Query<SeriesQuery>,
    State(pipeline): State<AppState>,
) -> impl IntoResponse {
    // ---
    let range = params.range.as_deref().map(RangeTag::from_tag).unwrap_or_default();
    let field = params
        .field
        .unwrap_or_else(|| channels::AIR_TEMPERATURE.to_string());
    info!("GET /series - range {} field {}", range, field);

    let records = match pipeline.get_records(range).await {
        Ok(records) => records,
        Err(e) => return unavailable(e),
    };
    let series = window::chart_series(&records, range, &field);

    (
        StatusCode::OK,
        Json(SeriesResponse {
            range,
            field,
            count: series.len(),
            records: series,
        }),
    )
        .into_response()
}

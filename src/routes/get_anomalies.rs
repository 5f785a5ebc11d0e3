use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::Serialize;
use tracing::info;

use super::{unavailable, AppState, RangeQuery};
use crate::anomaly::AnomalySummary;
use crate::models::{Anomaly, RangeTag};

// ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/anomalies", get(handler))
        .route("/anomalies/history", get(history_handler))
}

#[derive(Serialize)]
struct AnomaliesResponse {
    range: RangeTag,
    summary: AnomalySummary,
    anomalies: Vec<Anomaly>,
}

#[derive(Serialize)]
struct HistoryResponse {
    summary: AnomalySummary,
    anomalies: Vec<Anomaly>,
}

/// Detect anomalies over the records of the selected window.
async fn handler(
    Query(params): Query<RangeQuery>,
    State(pipeline): State<AppState>,
) -> impl IntoResponse {
    // ---
    let range = params.tag();
    info!("GET /anomalies - range {}", range);

    let records = match pipeline.get_records(range).await {
        Ok(records) => records,
        Err(e) => return unavailable(e),
    };

    let anomalies = pipeline.get_anomalies(&records);
    let summary = AnomalySummary::from_anomalies(&anomalies);
    info!(
        total = summary.total,
        errors = summary.error,
        "Anomaly detection complete"
    );

    (
        StatusCode::OK,
        Json(AnomaliesResponse {
            range,
            summary,
            anomalies,
        }),
    )
        .into_response()
}

/// Detect anomalies over every fetched record, ignoring any range.
async fn history_handler(State(pipeline): State<AppState>) -> impl IntoResponse {
    // ---
    info!("GET /anomalies/history");

    let anomalies = match pipeline.get_anomaly_history().await {
        Ok(anomalies) => anomalies,
        Err(e) => return unavailable(e),
    };

    let summary = AnomalySummary::from_anomalies(&anomalies);
    (
        StatusCode::OK,
        Json(HistoryResponse {
            summary,
            anomalies,
        }),
    )
        .into_response()
}

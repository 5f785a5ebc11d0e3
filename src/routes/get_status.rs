use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;
use crate::fetcher::FetchState;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(handler))
}

#[derive(Serialize)]
struct StatusResponse {
    state: FetchState,
    cached_records: usize,
    fetched_at: Option<DateTime<Utc>>,
    mirror_records: Option<usize>,
    mirror_written_at: Option<DateTime<Utc>>,
}

/// Pipeline health without triggering a fetch.
async fn handler(State(pipeline): State<AppState>) -> Json<StatusResponse> {
    // ---
    let fetcher = pipeline.fetcher();
    let snapshot = fetcher.snapshot();

    let mirror = match fetcher.fallback().metadata().await {
        Ok(meta) => meta,
        Err(e) => {
            tracing::warn!("Failed to read fallback metadata: {}", e);
            None
        }
    };

    Json(StatusResponse {
        state: fetcher.state(),
        cached_records: snapshot.as_ref().map_or(0, |s| s.records.len()),
        fetched_at: snapshot.as_ref().map(|s| s.fetched_at_utc),
        mirror_records: mirror.map(|m| m.count),
        mirror_written_at: mirror.map(|m| m.written_at),
    })
}

use std::time::Instant;

use axum::{extract::State, http::StatusCode, Json};
use chrono::Local;

use crate::{error::AppResult, storage, AppState};

// ── POST /api/maintenance/sweep-blobs ────────────────────────────────────────

pub async fn sweep_blobs(
    State(state): State<AppState>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let cutoff = Local::now().naive_local() - state.sweep_grace;

    let start = Instant::now();
    let report = storage::sweep_orphans(&state.db, &state.blobs, cutoff).await?;
    let elapsed = start.elapsed();

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "data": report,
            "sweep_time_ms": elapsed.as_secs_f64() * 1000.0,
        })),
    ))
}

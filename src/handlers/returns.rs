use std::time::Instant;

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use crate::{
    db,
    error::{AppError, AppResult},
    models::ReturnFilters,
    submission::{self, ReturnSubmission, IMAGES_FIELD},
    AppState,
};

// ── List ──────────────────────────────────────────────────────────────────────

pub async fn list_returns(
    State(state): State<AppState>,
    Query(filters): Query<ReturnFilters>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let range = filters.date_range()?;

    let start = Instant::now();
    let returns = db::fetch_returns(&state.db, range).await?;
    let elapsed = start.elapsed();

    info!(
        count = returns.len(),
        filtered = range.is_some(),
        elapsed_ms = elapsed.as_millis(),
        "Listed returns"
    );

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "data": returns,
            "count": returns.len(),
            "query_time_ms": elapsed.as_secs_f64() * 1000.0,
        })),
    ))
}

// ── Create ────────────────────────────────────────────────────────────────────

fn multipart_error(e: MultipartError) -> AppError {
    AppError::invalid("multipart body", e.body_text())
}

/// Collects the form into a submission: `images` parts are evidence files,
/// every other part is a text field.
async fn read_submission(mut multipart: Multipart) -> AppResult<ReturnSubmission> {
    let mut submission = ReturnSubmission::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == IMAGES_FIELD {
            let original_name = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await.map_err(multipart_error)?;
            submission.push_file(original_name, bytes.to_vec());
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            submission.push_field(name, value);
        }
    }

    Ok(submission)
}

pub async fn create_return(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let submission = read_submission(multipart).await?;

    let start = Instant::now();
    let record = submission::submit(&state.db, &state.blobs, &submission).await?;
    let elapsed = start.elapsed();

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "data": record,
            "db_time_ms": elapsed.as_secs_f64() * 1000.0,
        })),
    ))
}

// ── Get by ID ─────────────────────────────────────────────────────────────────

pub async fn get_return(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let start = Instant::now();
    let record = db::fetch_return_by_id(&state.db, id).await?;
    let elapsed = start.elapsed();

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "data": record,
            "query_time_ms": elapsed.as_secs_f64() * 1000.0,
        })),
    ))
}

// ── Delete ────────────────────────────────────────────────────────────────────

/// Always succeeds for a well-formed id; `deleted` tells whether a row existed.
pub async fn delete_return(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let start = Instant::now();
    let rows = db::delete_return(&state.db, id).await?;
    let elapsed = start.elapsed();

    info!(id, deleted = rows > 0, "Deleted return");

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "message": "Return deleted",
            "id": id,
            "deleted": rows > 0,
            "db_time_ms": elapsed.as_secs_f64() * 1000.0,
        })),
    ))
}

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::{error::AppResult, export, AppState};

fn attachment(content_type: &'static str, filename: &str, body: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

// ── GET /api/returns/export/xlsx ─────────────────────────────────────────────

pub async fn export_xlsx(State(state): State<AppState>) -> AppResult<Response> {
    let sheet = export::export_all(&state.db, &state.blobs).await?;
    let bytes = export::to_xlsx(&sheet)?;

    Ok(attachment(
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        export::XLSX_FILENAME,
        bytes,
    ))
}

// ── GET /api/returns/export/csv ──────────────────────────────────────────────

pub async fn export_csv(State(state): State<AppState>) -> AppResult<Response> {
    let sheet = export::export_all(&state.db, &state.blobs).await?;
    let bytes = export::to_csv(&sheet)?;

    Ok(attachment("text/csv", export::CSV_FILENAME, bytes))
}

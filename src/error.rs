use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The submission carried no usable evidence file.
    #[error("at least one image is required")]
    MissingImages,

    #[error("{0} is required")]
    MissingField(String),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("{0}")]
    NotFound(String),

    /// Blob store write or remove failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingImages | Self::MissingField(_) | Self::InvalidField { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingImages => "MISSING_IMAGES",
            Self::MissingField(_) => "MISSING_FIELD",
            Self::InvalidField { .. } => "INVALID_FIELD",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Database(e) => {
                error!(error = %e, "Database error");
                "An internal database error occurred".to_string()
            }
            Self::Internal(e) => {
                error!(error = ?e, "Internal error");
                "An internal error occurred".to_string()
            }
            Self::Storage(msg) => {
                error!(error = %msg, "Storage error");
                self.to_string()
            }
            _ => self.to_string(),
        };

        (
            self.status(),
            Json(serde_json::json!({
                "error": self.code(),
                "message": message,
            })),
        )
            .into_response()
    }
}

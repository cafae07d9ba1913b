use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{code}: {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("{0}")]
    Conflict(&'static str),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    /// Stable machine-readable code reported to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "database_error",
            Self::NotFound(code) | Self::Conflict(code) => *code,
            Self::BadRequest { code, .. } => *code,
            Self::Internal(_) => "internal_error",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, msg) = match &self {
            AppError::Database(err) => {
                tracing::error!(error = ?err, "database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_owned(),
                )
            }
            AppError::NotFound(code) => (StatusCode::NOT_FOUND, not_found_message(code)),
            AppError::BadRequest { message, .. } => (StatusCode::BAD_REQUEST, message.to_owned()),
            AppError::Conflict(code) => (StatusCode::CONFLICT, conflict_message(code)),
            AppError::Internal(message) => {
                tracing::error!(message, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, message.to_owned())
            }
        };

        (
            status,
            Json(ErrorBody {
                error: ErrorDetail { code, message: msg },
            }),
        )
            .into_response()
    }
}

fn not_found_message(code: &str) -> String {
    match code {
        "inbox_not_found" => "Inbox not found",
        "event_not_found" => "Event not found",
        "job_not_found" => "Replay job not found",
        _ => "Not found",
    }
    .to_owned()
}

fn conflict_message(code: &str) -> String {
    match code {
        "job_already_running" => "Replay job is already running",
        _ => "Conflict",
    }
    .to_owned()
}

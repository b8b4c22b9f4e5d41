use salvo::http::{StatusCode, StatusError};
use salvo::prelude::*;
use thiserror::Error;

/// Taxonomy from the design's error-handling section. Most variants never
/// reach an HTTP response: handlers convert them into a WS `error` frame or a
/// silent drop at the boundary (see `ws::router`). `Scribe` is only exercised
/// by the handful of plain HTTP endpoints (`/healthz`, `/diagnostics/active`,
/// and WS-upgrade rejection).
#[derive(Error, Debug)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database connection error: {0}")]
    DatabaseConnection(#[from] diesel::r2d2::PoolError),
    #[error("invalid or expired classroom code")]
    InvalidClassroomCode,
    #[error("invalid teacher credential")]
    InvalidTeacherCredential,
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("speech pipeline error: {0}")]
    SpeechPipeline(#[from] crate::speech::SpeechPipelineError),
    #[error("session {session_id} already belongs to a different teacher")]
    SessionOwnedByAnotherTeacher { session_id: String },
    #[error("username already taken")]
    UsernameTaken,
    #[error("password hashing error: {0}")]
    PasswordHash(#[from] argon2::password_hash::Error),
    #[error("not found")]
    NotFound,
}

pub type AppResult<T> = Result<T, AppError>;

impl Scribe for AppError {
    fn render(self, res: &mut Response) {
        let status_error = match self {
            AppError::Database(err) => {
                tracing::error!(error = ?err, "diesel error");
                StatusError::internal_server_error()
            }
            AppError::DatabaseConnection(err) => {
                tracing::error!(error = ?err, "db pool error");
                StatusError::internal_server_error()
            }
            AppError::InvalidClassroomCode => StatusError::unauthorized()
                .brief("Classroom session expired or invalid"),
            AppError::InvalidTeacherCredential => {
                StatusError::unauthorized().brief("Invalid teacher credential")
            }
            AppError::Jwt(err) => {
                tracing::debug!(error = ?err, "jwt decode failed");
                StatusError::unauthorized().brief("Invalid token")
            }
            AppError::SpeechPipeline(err) => {
                tracing::error!(error = ?err, "speech pipeline error");
                StatusError::internal_server_error()
            }
            AppError::SessionOwnedByAnotherTeacher { session_id } => {
                tracing::warn!(session_id, "rejected session reassignment");
                StatusError::forbidden().brief("Session belongs to another teacher")
            }
            AppError::UsernameTaken => {
                StatusError::conflict().brief("Username already taken")
            }
            AppError::PasswordHash(err) => {
                tracing::error!(error = ?err, "password hash error");
                StatusError::internal_server_error()
            }
            AppError::NotFound => StatusError::not_found(),
        };
        res.render(status_error);
    }
}

impl From<AppError> for StatusError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::InvalidClassroomCode | AppError::InvalidTeacherCredential => {
                StatusError::unauthorized().brief(err.to_string())
            }
            AppError::UsernameTaken => StatusError::conflict().brief(err.to_string()),
            AppError::SessionOwnedByAnotherTeacher { .. } => {
                StatusError::forbidden().brief(err.to_string())
            }
            AppError::NotFound => StatusError::not_found(),
            other => {
                tracing::error!(error = ?other, "internal error");
                StatusError::internal_server_error()
            }
        }
    }
}

/// Stable machine-readable codes sent in the WS `error` frame's `code` field.
pub mod code {
    pub const INVALID_CLASSROOM: &str = "INVALID_CLASSROOM";
    pub const INVALID_TEACHER_CREDENTIAL: &str = "INVALID_TEACHER_CREDENTIAL";
    pub const MISSING_FIELD: &str = "MISSING_FIELD";
    pub const TTS_FAILED: &str = "TTS_FAILED";
    pub const SESSION_OWNED_BY_ANOTHER_TEACHER: &str =
        "SESSION_OWNED_BY_ANOTHER_TEACHER";
    pub const INTERNAL: &str = "INTERNAL";
}

pub const STATUS_CODE_POLICY_VIOLATION: u16 = 1008;

//! Typed errors, backend error classification and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("duplicate path segment: {0}")]
    DuplicatePathSegment(String),
    #[error("schema load: {0}")]
    Load(String),
}

/// Classification of a storage backend failure. Backends map their native codes onto this.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendErrorKind {
    UniqueViolation,
    NotFound,
    Other(String),
}

#[derive(Error, Clone, Debug)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        BackendError {
            kind,
            message: message.into(),
        }
    }

    pub fn unique(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::UniqueViolation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, message)
    }

    pub fn other(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Other(code.into()), message)
    }
}

impl From<sqlx::Error> for BackendError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => BackendError::not_found(e.to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("23505") => BackendError::unique(db.message().to_string()),
                Some(code) => BackendError::other(code, db.message().to_string()),
                None => BackendError::other("database", db.message().to_string()),
            },
            _ => BackendError::other("database", e.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("validation: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Backend(String),
    #[error("metadata: {0}")]
    Metadata(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl AppError {
    /// Remap a backend failure for `entity` into a caller-visible error.
    pub fn from_backend(entity: &str, err: BackendError) -> Self {
        match err.kind {
            BackendErrorKind::UniqueViolation => AppError::Conflict(format!("{} already exists", entity)),
            BackendErrorKind::NotFound => AppError::NotFound(normalize_message(&err.message)),
            BackendErrorKind::Other(_) => AppError::Backend(normalize_message(&err.message)),
        }
    }
}

/// Collapse line breaks (and the indentation around them) into single spaces.
pub fn normalize_message(message: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::Backend(_) => (StatusCode::INTERNAL_SERVER_ERROR, "backend_error"),
            AppError::Metadata(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metadata_error"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

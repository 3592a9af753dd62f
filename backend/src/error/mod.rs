use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    BadRequest(String),
    InternalServerError(anyhow::Error),
    Validation(Vec<String>),
}

/// Errors raised by the change log, the restore dispatcher and the undo paths.
///
/// Lower layers raise the typed variant; callers further up attach context
/// with [`ChangeError::context`] without changing the variant, so the HTTP
/// mapping stays stable.
#[derive(Debug, Error)]
pub enum ChangeError {
    /// Caller-correctable input: malformed id, unsupported operation, empty
    /// or unparsable snapshot, unknown column.
    #[error("{0}")]
    Validation(String),
    /// Missing change entry, quick-undo entry or target record.
    #[error("{0}")]
    NotFound(String),
    /// Already consumed or already expired.
    #[error("{0}")]
    Conflict(String),
    /// Storage failure. Never retried.
    #[error("{context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: sqlx::Error,
    },
}

impl ChangeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn persistence(context: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Persistence {
            context: context.into(),
            source,
        }
    }

    /// Prefixes the message with `ctx`, keeping the variant.
    pub fn context(self, ctx: impl fmt::Display) -> Self {
        match self {
            Self::Validation(msg) => Self::Validation(format!("{ctx}: {msg}")),
            Self::NotFound(msg) => Self::NotFound(format!("{ctx}: {msg}")),
            Self::Conflict(msg) => Self::Conflict(format!("{ctx}: {msg}")),
            Self::Persistence { context, source } => Self::Persistence {
                context: format!("{ctx}: {context}"),
                source,
            },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<sqlx::Error> for ChangeError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ChangeError::NotFound("Record not found".to_string()),
            other => ChangeError::persistence("storage operation failed", other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, code, details) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "NOT_FOUND".to_string(), None),
            AppError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                msg,
                "UNAUTHORIZED".to_string(),
                None,
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, "FORBIDDEN".to_string(), None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg, "CONFLICT".to_string(), None),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                msg,
                "BAD_REQUEST".to_string(),
                None,
            ),
            AppError::InternalServerError(err) => {
                tracing::error!("Internal server error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "INTERNAL_SERVER_ERROR".to_string(),
                    None,
                )
            }
            AppError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "Validation failed".to_string(),
                "VALIDATION_ERROR".to_string(),
                Some(serde_json::json!({ "errors": errors })),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code,
            details,
        });

        (status, body).into_response()
    }
}

impl From<ChangeError> for AppError {
    fn from(err: ChangeError) -> Self {
        match err {
            ChangeError::Validation(msg) => AppError::Validation(vec![msg]),
            ChangeError::NotFound(msg) => AppError::NotFound(msg),
            ChangeError::Conflict(msg) => AppError::Conflict(msg),
            persistence @ ChangeError::Persistence { .. } => {
                AppError::InternalServerError(persistence.into())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalServerError(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Resource not found".to_string()),
            _ => AppError::InternalServerError(err.into()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| {
                    let code = e.code.as_ref();
                    format!("{}: {}", field, code)
                })
            })
            .collect();
        AppError::Validation(messages)
    }
}

impl From<validator::ValidationErrors> for ChangeError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter()
                    .map(move |e| format!("{}: {}", field, e.code.as_ref()))
            })
            .collect();
        ChangeError::Validation(messages.join(", "))
    }
}

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::compose::ComposeError;
use crate::traits::catalog::CatalogError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    #[error("Unknown style: {0}")]
    UnknownStyle(String),

    #[error("Malformed JSON body: {0}")]
    InvalidJson(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Route not found")]
    NotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ApiError::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Machine-readable code placed in the `error` field.
    pub fn code(&self) -> String {
        match self {
            ApiError::MissingField(field) => format!("missing_{field}"),
            ApiError::InvalidField { field, .. } => format!("invalid_{field}"),
            ApiError::UnknownStyle(_) => "unknown_style".to_string(),
            ApiError::InvalidJson(_) => "invalid_json".to_string(),
            ApiError::MethodNotAllowed => "method_not_allowed".to_string(),
            ApiError::NotFound => "not_found".to_string(),
            ApiError::Internal(_) => "internal_error".to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingField(_)
            | ApiError::InvalidField { .. }
            | ApiError::UnknownStyle(_)
            | ApiError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::UnknownStyle(style) => ApiError::UnknownStyle(style),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ComposeError> for ApiError {
    fn from(err: ComposeError) -> Self {
        match err {
            ComposeError::InvalidSubject(source) => ApiError::invalid("subjectImage", source.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidJson(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        match &self {
            ApiError::Internal(message) => {
                tracing::error!(error_code = %code, message = %message, "Internal error occurred");
            }
            ApiError::MethodNotAllowed | ApiError::NotFound => {
                tracing::debug!(error_code = %code, "Rejected request");
            }
            _ => {
                tracing::warn!(error_code = %code, error = %self, "Rejected request");
            }
        }

        let detail = match &self {
            ApiError::InvalidField { reason, .. } => Some(reason.clone()),
            ApiError::UnknownStyle(style) => Some(style.clone()),
            ApiError::InvalidJson(message) => Some(message.clone()),
            _ => None,
        };
        let body = Json(ErrorResponse {
            ok: false,
            error: code,
            detail,
        });
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

//! Typed failures and their HTTP mapping.
//!
//! Every failure that reaches the dispatcher's outer boundary is converted to
//! the structured body `{ name, message, data }`; nothing propagates to the
//! transport layer unhandled.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// A required handler parameter was missing from path/query/form/body.
    /// Surfaced as 500, matching the historical dispatcher (candidate for
    /// 400, see DESIGN.md).
    #[error("missing required parameter: {0}")]
    RequiredArgument(String),
    /// A parameter was present but could not be coerced or parsed.
    #[error("invalid value for parameter: {0}")]
    InvalidArgument(String),
    #[error("unauthorized: {0}")]
    Unauthenticated(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("transaction: {0}")]
    Tx(String),
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
    /// Business-rule failure raised by handler code, carrying its own name
    /// and optional payload.
    #[error("{name}: {message}")]
    Domain {
        name: String,
        message: String,
        data: Option<Value>,
    },
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn domain(name: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Domain {
            name: name.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn domain_with_data(
        name: impl Into<String>,
        message: impl Into<String>,
        data: Value,
    ) -> Self {
        AppError::Domain {
            name: name.into(),
            message: message.into(),
            data: Some(data),
        }
    }

    /// Error name used in the response body.
    pub fn name(&self) -> String {
        match self {
            AppError::RequiredArgument(p) => format!("required_argument:{p}"),
            AppError::InvalidArgument(p) => format!("invalid_argument:{p}"),
            AppError::Unauthenticated(_) => "unauthorized".into(),
            AppError::Forbidden(_) => "forbidden".into(),
            AppError::NotFound(_) => "not_found".into(),
            AppError::Db(_) => "database_error".into(),
            AppError::Tx(_) => "transaction_error".into(),
            AppError::Decode(_) => "decode_error".into(),
            AppError::Domain { name, .. } => name.clone(),
            AppError::Internal(_) => "internal_error".into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn data(&self) -> Option<Value> {
        match self {
            AppError::Domain { data, .. } => data.clone(),
            _ => None,
        }
    }
}

/// Structured error body: `{ name, message, data }`.
#[derive(Serialize)]
pub struct ErrorBody {
    pub name: String,
    pub message: String,
    pub data: Option<Value>,
}

impl From<&AppError> for ErrorBody {
    fn from(e: &AppError) -> Self {
        let message = match e {
            AppError::Domain { message, .. } => message.clone(),
            other => other.to_string(),
        };
        ErrorBody {
            name: e.name(),
            message,
            data: e.data(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody::from(&self);
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_failures_stay_500() {
        assert_eq!(
            AppError::RequiredArgument("id".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::RequiredArgument("id".into()).name(),
            "required_argument:id"
        );
    }

    #[test]
    fn auth_failures_map_to_401_and_403() {
        assert_eq!(
            AppError::Unauthenticated("missing token".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Forbidden("role".into()).status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn domain_failure_keeps_its_own_name_and_data() {
        let e = AppError::domain_with_data("quota_exceeded", "too many", serde_json::json!(3));
        let body = ErrorBody::from(&e);
        assert_eq!(body.name, "quota_exceeded");
        assert_eq!(body.message, "too many");
        assert_eq!(body.data, Some(serde_json::json!(3)));
    }
}

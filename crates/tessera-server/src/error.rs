//! HTTP error types for `tessera` server.
//!
//! Maps domain errors from `tessera-core` into HTTP responses. Every error
//! except the login redirect produces a JSON body with a machine-readable
//! `error` field and a human-readable `message`. Messages never carry
//! internal detail; that goes to the log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use serde::Serialize;
use tracing::error;

use tessera_core::authz::{Denial, DenyKind};
use tessera_core::error::{CancellationError, WebhookError};
use tessera_storage::StoreError;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// No valid session; send the caller to log in.
    LoginRequired { login_path: String },
    /// Authenticated but not allowed.
    Forbidden,
    /// Absent, or not the caller's to know about.
    NotFound,
    /// Client sent invalid input.
    BadRequest(String),
    /// The billing provider failed.
    BadGateway(String),
    /// A dependency is temporarily unavailable.
    Unavailable,
    /// Internal server error. The detail is logged, never returned.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::LoginRequired { login_path } => return Redirect::to(&login_path).into_response(),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", "access denied".to_owned()),
            Self::NotFound => (StatusCode::NOT_FOUND, "not_found", "not found".to_owned()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::BadGateway(detail) => {
                error!(error = %detail, "billing provider error");
                (
                    StatusCode::BAD_GATEWAY,
                    "bad_gateway",
                    "billing provider unavailable".to_owned(),
                )
            }
            Self::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                "temporarily unavailable".to_owned(),
            ),
            Self::Internal(detail) => {
                error!(error = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_owned(),
                )
            }
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl AppError {
    /// The response for an authorization denial.
    ///
    /// Unknown and foreign tenants produce byte-identical responses.
    #[must_use]
    pub fn from_denial(denial: &Denial, login_path: &str) -> Self {
        match denial.reason.kind() {
            DenyKind::Unauthenticated => Self::LoginRequired {
                login_path: login_path.to_owned(),
            },
            DenyKind::Forbidden => Self::Forbidden,
            DenyKind::Concealed => Self::NotFound,
            DenyKind::Invalid => Self::BadRequest("malformed path".to_owned()),
            DenyKind::Unavailable => Self::Unavailable,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<CancellationError> for AppError {
    fn from(err: CancellationError) -> Self {
        match err {
            CancellationError::NotFound { .. } => Self::NotFound,
            CancellationError::AlreadyCanceled { .. } | CancellationError::AlreadyPending { .. } => {
                Self::BadRequest(err.to_string())
            }
            CancellationError::Provider(_) => Self::BadGateway(err.to_string()),
            CancellationError::Store(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::Signature(_) => Self::BadRequest("invalid signature".to_owned()),
            WebhookError::Malformed { .. } => Self::BadRequest("malformed event".to_owned()),
            WebhookError::Transient { .. } => Self::Internal(err.to_string()),
        }
    }
}

//! Public endpoints: liveness and the login landing point.

use axum::Json;
use serde::Serialize;

/// Response body for `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Response body for the login path.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: &'static str,
}

/// `GET <login path>`
///
/// Credentials are handled by the identity provider in front of this
/// service; this is only where unauthenticated callers land.
pub async fn login() -> Json<LoginResponse> {
    Json(LoginResponse {
        message: "authentication required",
    })
}

//! Authorization middleware for `tessera`.
//!
//! Reads the session token, runs the authorization pipeline, and injects
//! the resulting [`AuthorizedRequest`] into the request extensions for
//! downstream handlers. Handlers never see a request the pipeline denied.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use tessera_core::authz::{AccessRequest, Decision};

use crate::error::AppError;
use crate::state::AppState;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "tessera_session";

/// Middleware applied to every route, public ones included.
///
/// Public routes are decided by the route table, not by this function.
pub async fn authorization_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    // Owned copies: the request body is not `Sync`, so it cannot be
    // borrowed across the await.
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let token = session_token(req.headers());

    let access = AccessRequest {
        method: method.as_str(),
        path: &path,
        session_token: token.as_deref(),
    };
    let decision = state.authorizer.authorize(&access).await;

    match decision {
        Decision::Public => next.run(req).await,
        Decision::Allowed(authorized) => {
            req.extensions_mut().insert(*authorized);
            next.run(req).await
        }
        Decision::Denied(denial) => AppError::from_denial(&denial, &state.login_path).into_response(),
    }
}

/// The session token from `Authorization: Bearer`, else the session cookie.
fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_owned());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_owned())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn bearer_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        headers.insert(COOKIE, HeaderValue::from_static("tessera_session=zzz"));
        assert_eq!(session_token(&headers).as_deref(), Some("abc.def"));
    }

    #[test]
    fn cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; tessera_session=tok.sig; lang=en"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("tok.sig"));
    }

    #[test]
    fn no_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwdw=="));
        headers.insert(COOKIE, HeaderValue::from_static("tessera_session="));
        assert_eq!(session_token(&headers), None);
    }
}

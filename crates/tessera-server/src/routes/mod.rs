//! HTTP route handlers for `tessera`.
//!
//! Routes are organized by concern:
//! - `health`: liveness check and the login landing stub (public)
//! - `webhooks`: billing provider event receiver (public, signature-checked)
//! - `tenants`: tenant summary
//! - `subscriptions`: subscription reads and cancellation requests
//!
//! The route table below is the single source of truth for who may reach
//! what. Axum's router only decides which handler runs.

pub mod health;
pub mod subscriptions;
pub mod tenants;
pub mod webhooks;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::middleware as axum_mw;
use axum::routing::{get, post};
use tessera_core::permission::Requirement;
use tessera_core::routes::{RouteRule, RouteTable, UnmatchedRoutes};
use tessera_storage::Permission;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::authorization_middleware;
use crate::state::AppState;

/// Largest webhook body accepted.
const WEBHOOK_BODY_LIMIT: usize = 1024 * 1024;

/// Concurrent webhook deliveries processed at once.
const WEBHOOK_CONCURRENCY: usize = 32;

/// The route table for this server.
///
/// More specific rules come first. Public routes are listed explicitly.
#[must_use]
pub fn route_table(login_path: &str, unmatched: UnmatchedRoutes) -> RouteTable {
    RouteTable::new(unmatched)
        .rule(RouteRule::public("/health").methods(["GET"]))
        .rule(RouteRule::public("/webhooks/billing").methods(["POST"]))
        .rule(RouteRule::public(login_path).methods(["GET"]))
        .rule(
            RouteRule::protected(
                "/{tenant}/subscriptions",
                Requirement::one(Permission::SUBSCRIPTION_READ),
            )
            .methods(["GET"]),
        )
        .rule(
            RouteRule::protected(
                "/{tenant}/subscriptions/{id}",
                Requirement::one(Permission::SUBSCRIPTION_READ),
            )
            .methods(["GET"]),
        )
        .rule(
            RouteRule::protected(
                "/{tenant}/subscriptions/{id}",
                Requirement::all([Permission::SUBSCRIPTION_READ, Permission::SUBSCRIPTION_MANAGE]),
            )
            .methods(["DELETE"]),
        )
        .rule(
            RouteRule::protected("/{tenant}", Requirement::one(Permission::TENANT_READ))
                .methods(["GET"]),
        )
}

/// Build the Axum router with all routes and middleware.
///
/// The authorization middleware wraps every route, including the fallback,
/// so a request no rule covers is denied rather than falling through.
pub fn build_router(state: Arc<AppState>) -> Router {
    let webhook_routes = Router::new().route(
        "/webhooks/billing",
        post(webhooks::receive)
            .layer::<_, std::convert::Infallible>(RequestBodyLimitLayer::new(WEBHOOK_BODY_LIMIT))
            .layer(tower::limit::ConcurrencyLimitLayer::new(WEBHOOK_CONCURRENCY)),
    );

    let tenant_routes = Router::new()
        .route("/{tenant}", get(tenants::summary))
        .route("/{tenant}/subscriptions", get(subscriptions::list))
        .route(
            "/{tenant}/subscriptions/{id}",
            get(subscriptions::show).delete(subscriptions::cancel),
        );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    Router::new()
        .route("/health", get(health::health))
        .route(&state.login_path, get(health::login))
        .merge(webhook_routes)
        .merge(tenant_routes)
        .layer(axum_mw::from_fn_with_state(
            Arc::clone(&state),
            authorization_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}

//! `tessera` HTTP server.
//!
//! Wires the authorization pipeline, the billing webhook processor and the
//! tenant-scoped subscription routes into an Axum router.

pub mod billing;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

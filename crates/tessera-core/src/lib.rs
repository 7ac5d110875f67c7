//! Core library for `tessera`.
//!
//! Two independent subsystems share this crate:
//!
//! - **Authorization**: [`session`] verifies the opaque principal reference,
//!   [`tenant`] resolves path-carried tenants and enforces isolation,
//!   [`permission`] computes effective permissions, [`routes`] holds the
//!   ordered route table, and [`authz`] composes them into a per-request
//!   decision.
//! - **Billing synchronization**: [`lifecycle`] defines subscription states,
//!   [`webhook`] verifies and applies billing-provider events, and
//!   [`cancellation`] handles user-initiated cancellation requests through
//!   the [`billing`] provider abstraction.
//!
//! All persistence goes through the store traits from `tessera-storage`,
//! injected explicitly at construction.

pub mod authz;
pub mod billing;
pub mod cancellation;
pub mod error;
pub mod lifecycle;
pub mod permission;
pub mod routes;
pub mod session;
pub mod tenant;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

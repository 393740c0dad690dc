//! Gateway: tenant session orchestration, event routing and the HTTP surface.
//!
//! Lifecycle:
//! 1. Load config, open the tenant store
//! 2. Build the session manager, event router and auth cache
//! 3. Resume sessions of tenants flagged as connected
//! 4. Serve HTTP until a shutdown signal
//! 5. Stop every session within the shutdown deadline

pub mod auth;
pub mod error;
pub mod router;
pub mod routes;
pub mod server;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_support;

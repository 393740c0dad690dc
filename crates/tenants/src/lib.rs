//! Durable tenant registry.
//!
//! One record per account: identity, auth token, webhook target, the paired
//! protocol session id and the advisory `connected` flag the supervisor uses
//! to resume sessions after a restart.

pub mod memory;
pub mod record;
pub mod sqlite;
pub mod store;

pub use {
    memory::MemoryTenantStore,
    record::{NewTenant, TenantRecord, TenantSummary, TenantUpdate},
    sqlite::SqliteTenantStore,
    store::{TenantError, TenantStore},
};

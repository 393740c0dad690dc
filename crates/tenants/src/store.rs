//! Storage abstraction for tenant records.

use {async_trait::async_trait, wagate_common::TenantId};

use crate::record::{NewTenant, TenantRecord, TenantUpdate};

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("tenant {0} not found")]
    NotFound(TenantId),
    #[error("auth token already in use")]
    DuplicateToken,
    #[error("tenant store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

pub type Result<T, E = TenantError> = std::result::Result<T, E>;

#[async_trait]
pub trait TenantStore: Send + Sync {
    // ---- lookups ----
    async fn get_by_id(&self, id: TenantId) -> Result<Option<TenantRecord>>;
    async fn get_by_token(&self, token: &str) -> Result<Option<TenantRecord>>;
    async fn list(&self) -> Result<Vec<TenantRecord>>;
    /// Tenants whose last known state was connected.
    async fn list_connected(&self) -> Result<Vec<TenantRecord>>;

    // ---- admin ----
    async fn create(&self, tenant: NewTenant) -> Result<TenantRecord>;
    async fn update(&self, id: TenantId, update: TenantUpdate) -> Result<TenantRecord>;
    /// Returns the removed record, if any.
    async fn delete(&self, id: TenantId) -> Result<Option<TenantRecord>>;

    // ---- session bookkeeping (advisory) ----
    async fn set_connected(&self, id: TenantId, connected: bool) -> Result<()>;
    async fn set_session_id(&self, id: TenantId, session_id: Option<&str>) -> Result<()>;
    async fn set_qrcode(&self, id: TenantId, qrcode: Option<&str>) -> Result<()>;
}

use std::collections::BTreeMap;

use {async_trait::async_trait, tokio::sync::RwLock, wagate_common::TenantId};

use crate::{
    record::{NewTenant, TenantRecord, TenantUpdate},
    store::{Result, TenantError, TenantStore},
};

/// In-process store for tests and throwaway runs. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryTenantStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<TenantId, TenantRecord>,
    next_id: TenantId,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed record, replacing any existing one with that id.
    pub async fn insert(&self, record: TenantRecord) {
        let mut inner = self.inner.write().await;
        inner.next_id = inner.next_id.max(record.id);
        inner.records.insert(record.id, record);
    }

    async fn modify(&self, id: TenantId, f: impl FnOnce(&mut TenantRecord)) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner.records.get_mut(&id).ok_or(TenantError::NotFound(id))?;
        f(record);
        Ok(())
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn get_by_id(&self, id: TenantId) -> Result<Option<TenantRecord>> {
        Ok(self.inner.read().await.records.get(&id).cloned())
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<TenantRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .records
            .values()
            .find(|r| r.token == token)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<TenantRecord>> {
        Ok(self.inner.read().await.records.values().cloned().collect())
    }

    async fn list_connected(&self) -> Result<Vec<TenantRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .records
            .values()
            .filter(|r| r.connected)
            .cloned()
            .collect())
    }

    async fn create(&self, tenant: NewTenant) -> Result<TenantRecord> {
        let token = tenant.resolved_token();
        let mut inner = self.inner.write().await;
        if inner.records.values().any(|r| r.token == token) {
            return Err(TenantError::DuplicateToken);
        }
        inner.next_id += 1;
        let record = TenantRecord {
            id: inner.next_id,
            name: tenant.name,
            token,
            webhook: tenant.webhook.filter(|w| !w.is_empty()),
            session_id: None,
            qrcode: None,
            connected: false,
            expiration: tenant.expiration,
            events: tenant.events,
        };
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(&self, id: TenantId, update: TenantUpdate) -> Result<TenantRecord> {
        let mut inner = self.inner.write().await;
        let record = inner.records.get_mut(&id).ok_or(TenantError::NotFound(id))?;
        update.apply(record);
        Ok(record.clone())
    }

    async fn delete(&self, id: TenantId) -> Result<Option<TenantRecord>> {
        Ok(self.inner.write().await.records.remove(&id))
    }

    async fn set_connected(&self, id: TenantId, connected: bool) -> Result<()> {
        self.modify(id, |r| r.connected = connected).await
    }

    async fn set_session_id(&self, id: TenantId, session_id: Option<&str>) -> Result<()> {
        self.modify(id, |r| r.session_id = session_id.map(str::to_string))
            .await
    }

    async fn set_qrcode(&self, id: TenantId, qrcode: Option<&str>) -> Result<()> {
        self.modify(id, |r| r.qrcode = qrcode.map(str::to_string)).await
    }
}

use std::{sync::Arc, time::Instant};

use {
    wagate_channels::ClientFactory,
    wagate_config::WagateConfig,
    wagate_tenants::TenantStore,
};

use crate::{
    auth::AuthCache,
    router::EventRouter,
    session::{SessionManager, SessionTimings},
};

/// Everything request handlers and background tasks share.
pub struct GatewayState {
    pub version: String,
    pub config: WagateConfig,
    pub store: Arc<dyn TenantStore>,
    pub auth_cache: Arc<AuthCache>,
    pub router: Arc<EventRouter>,
    pub sessions: Arc<SessionManager>,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(
        config: WagateConfig,
        store: Arc<dyn TenantStore>,
        factory: Arc<dyn ClientFactory>,
    ) -> Arc<Self> {
        let router = Arc::new(EventRouter::new(&config.webhooks));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&store),
            factory,
            Arc::clone(&router),
            SessionTimings::from(&config.sessions),
        ));
        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            auth_cache: Arc::new(AuthCache::from_config(&config.auth)),
            config,
            store,
            router,
            sessions,
            started_at: Instant::now(),
        })
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.config.auth.admin_token()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

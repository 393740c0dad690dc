use std::{sync::Arc, time::Duration};

use {
    dashmap::DashMap,
    tokio::{task::JoinHandle, time::Instant},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
    wagate_common::{TenantId, time::now_secs},
    wagate_config::AuthConfig,
    wagate_tenants::TenantStore,
};

// ── Types ────────────────────────────────────────────────────────────────────

/// Why a request could not be attributed to a tenant or the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    TokenMissing,
    TokenMismatch,
    AccountExpired,
    /// The store could not be consulted; requests fail closed.
    StoreUnavailable,
    /// No admin token is configured, admin routes are disabled.
    AdminDisabled,
}

impl AuthFailure {
    pub fn reason(self) -> &'static str {
        match self {
            Self::TokenMissing => "token_missing",
            Self::TokenMismatch => "token_mismatch",
            Self::AccountExpired => "account_expired",
            Self::StoreUnavailable => "store_unavailable",
            Self::AdminDisabled => "admin_disabled",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    tenant: TenantId,
    account_expiry: Option<i64>,
    inserted_at: Instant,
    last_access: Instant,
}

impl CacheEntry {
    fn is_stale(&self, now: Instant, idle: Duration, max_age: Duration) -> bool {
        now.duration_since(self.inserted_at) >= max_age
            || now.duration_since(self.last_access) >= idle
            || self
                .account_expiry
                .is_some_and(|exp| exp > 0 && exp <= now_secs())
    }
}

// ── Auth cache ───────────────────────────────────────────────────────────────

/// Token to tenant-id cache with an idle window and an absolute lifetime.
///
/// Stale entries are dropped lazily on lookup and by a periodic sweep. A
/// stale entry is never returned, whether or not the sweep has run.
pub struct AuthCache {
    entries: DashMap<String, CacheEntry>,
    idle: Duration,
    max_age: Duration,
}

impl AuthCache {
    pub fn new(idle: Duration, max_age: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            idle,
            max_age,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.cache_idle(), config.cache_max_age())
    }

    /// Resolve a token, refreshing its idle window on a hit.
    pub fn resolve(&self, token: &str) -> Option<TenantId> {
        let now = Instant::now();
        {
            let mut entry = self.entries.get_mut(token)?;
            if !entry.is_stale(now, self.idle, self.max_age) {
                entry.last_access = now;
                return Some(entry.tenant);
            }
        }
        self.entries
            .remove_if(token, |_, e| e.is_stale(now, self.idle, self.max_age));
        None
    }

    pub fn put(&self, token: impl Into<String>, tenant: TenantId) {
        self.put_until(token, tenant, None);
    }

    /// Cache a token that must also stop resolving once the tenant's account
    /// expiry (unix seconds) passes.
    pub fn put_until(&self, token: impl Into<String>, tenant: TenantId, account_expiry: Option<i64>) {
        let now = Instant::now();
        self.entries.insert(token.into(), CacheEntry {
            tenant,
            account_expiry,
            inserted_at: now,
            last_access: now,
        });
    }

    pub fn invalidate(&self, token: &str) {
        self.entries.remove(token);
    }

    /// Drop every token that maps to `tenant`.
    pub fn invalidate_tenant(&self, tenant: TenantId) {
        self.entries.retain(|_, e| e.tenant != tenant);
    }

    /// Remove stale entries, returning how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, e| !e.is_stale(now, self.idle, self.max_age));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run `sweep` every `every` until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let dropped = cache.sweep();
                        if dropped > 0 {
                            debug!(dropped, remaining = cache.len(), "auth cache sweep");
                        }
                    }
                }
            }
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Constant-time string comparison.
fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Extract the caller's token from a `token` header value or a bearer
/// `Authorization` value, in that order.
pub fn token_from_headers<'a>(token: Option<&'a str>, authorization: Option<&'a str>) -> Option<&'a str> {
    token
        .or_else(|| authorization.map(|v| v.strip_prefix("Bearer ").unwrap_or(v)))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

// ── Auth logic ───────────────────────────────────────────────────────────────

/// Authenticate an operator request against the configured admin token.
pub fn authorize_admin(expected: Option<&str>, provided: Option<&str>) -> Result<(), AuthFailure> {
    let Some(expected) = expected else {
        return Err(AuthFailure::AdminDisabled);
    };
    let Some(given) = provided else {
        return Err(AuthFailure::TokenMissing);
    };
    if !safe_equal(given, expected) {
        return Err(AuthFailure::TokenMismatch);
    }
    Ok(())
}

/// Resolve a tenant token through the cache, falling back to the store.
///
/// Expired accounts are rejected and never cached. Store errors reject the
/// request.
pub async fn authenticate_tenant(
    cache: &AuthCache,
    store: &dyn TenantStore,
    token: Option<&str>,
) -> Result<TenantId, AuthFailure> {
    let Some(token) = token else {
        return Err(AuthFailure::TokenMissing);
    };
    if let Some(tenant) = cache.resolve(token) {
        return Ok(tenant);
    }
    let record = match store.get_by_token(token).await {
        Ok(Some(record)) => record,
        Ok(None) => return Err(AuthFailure::TokenMismatch),
        Err(e) => {
            warn!(error = %e, "tenant store unavailable during authentication");
            return Err(AuthFailure::StoreUnavailable);
        },
    };
    if record.is_expired(now_secs()) {
        debug!(tenant = record.id, "rejecting expired account");
        return Err(AuthFailure::AccountExpired);
    }
    cache.put_until(token, record.id, record.expiration);
    Ok(record.id)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        wagate_tenants::{MemoryTenantStore, NewTenant, TenantRecord},
    };

    fn cache() -> AuthCache {
        AuthCache::new(Duration::from_secs(300), Duration::from_secs(600))
    }

    #[tokio::test(start_paused = true)]
    async fn hit_refreshes_idle_window() {
        let c = cache();
        c.put("tok", 7);
        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(c.resolve("tok"), Some(7));
        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(c.resolve("tok"), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entry_misses_without_sweep() {
        let c = cache();
        c.put("tok", 7);
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(c.resolve("tok"), None);
        assert!(c.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn absolute_lifetime_wins_over_activity() {
        let c = cache();
        c.put("tok", 7);
        for _ in 0..6 {
            tokio::time::advance(Duration::from_secs(100)).await;
            c.resolve("tok");
        }
        assert_eq!(c.resolve("tok"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_only_stale_entries() {
        let c = cache();
        c.put("old", 1);
        tokio::time::advance(Duration::from_secs(250)).await;
        c.put("new", 2);
        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(c.sweep(), 1);
        assert_eq!(c.resolve("new"), Some(2));
    }

    #[tokio::test]
    async fn invalidate_tenant_drops_all_its_tokens() {
        let c = cache();
        c.put("a", 1);
        c.put("b", 1);
        c.put("c", 2);
        c.invalidate_tenant(1);
        assert_eq!(c.len(), 1);
        c.invalidate("c");
        assert!(c.is_empty());
    }

    #[test]
    fn admin_token_checks() {
        assert_eq!(authorize_admin(None, Some("x")), Err(AuthFailure::AdminDisabled));
        assert_eq!(authorize_admin(Some("s3cret"), None), Err(AuthFailure::TokenMissing));
        assert_eq!(
            authorize_admin(Some("s3cret"), Some("s3cre")),
            Err(AuthFailure::TokenMismatch)
        );
        assert_eq!(authorize_admin(Some("s3cret"), Some("s3cret")), Ok(()));
    }

    #[test]
    fn token_header_precedence() {
        assert_eq!(token_from_headers(Some("a"), Some("Bearer b")), Some("a"));
        assert_eq!(token_from_headers(None, Some("Bearer b")), Some("b"));
        assert_eq!(token_from_headers(None, Some("raw")), Some("raw"));
        assert_eq!(token_from_headers(Some("  "), None), None);
    }

    #[tokio::test]
    async fn store_fallback_populates_cache() {
        let store = MemoryTenantStore::new();
        let rec = store
            .create(NewTenant::named("acme").with_token("tok-acme"))
            .await
            .unwrap();
        let c = cache();
        assert_eq!(authenticate_tenant(&c, &store, Some("tok-acme")).await, Ok(rec.id));
        assert_eq!(c.resolve("tok-acme"), Some(rec.id));
        assert_eq!(
            authenticate_tenant(&c, &store, Some("nope")).await,
            Err(AuthFailure::TokenMismatch)
        );
        assert_eq!(
            authenticate_tenant(&c, &store, None).await,
            Err(AuthFailure::TokenMissing)
        );
    }

    #[tokio::test]
    async fn expired_account_is_rejected_and_not_cached() {
        let store = MemoryTenantStore::new();
        store
            .insert(TenantRecord {
                expiration: Some(1),
                ..TenantRecord::new(5, "old", "tok-old")
            })
            .await;
        let c = cache();
        assert_eq!(
            authenticate_tenant(&c, &store, Some("tok-old")).await,
            Err(AuthFailure::AccountExpired)
        );
        assert!(c.is_empty());
    }
}

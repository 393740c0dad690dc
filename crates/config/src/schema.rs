/// Config schema types (server, auth, storage, sessions, webhooks, bridge).
use std::{path::PathBuf, time::Duration};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WagateConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub sessions: SessionsConfig,
    pub webhooks: WebhooksConfig,
    pub bridge: BridgeConfig,
}

/// HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

/// Admin credentials and the token cache windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token authorizing `/admin/*` routes. Never written back to disk.
    #[serde(skip_serializing)]
    pub admin_token: Option<Secret<String>>,
    /// Evict a cached token after this long without a lookup.
    pub cache_idle_secs: u64,
    /// Evict a cached token this long after insertion regardless of use.
    pub cache_max_age_secs: u64,
    /// Interval of the background sweep that drops expired entries.
    pub cache_sweep_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_token: None,
            cache_idle_secs: 300,
            cache_max_age_secs: 600,
            cache_sweep_secs: 600,
        }
    }
}

impl AuthConfig {
    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token
            .as_ref()
            .map(|s| s.expose_secret().as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn cache_idle(&self) -> Duration {
        Duration::from_secs(self.cache_idle_secs)
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_secs)
    }

    pub fn cache_sweep(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_secs.max(1))
    }
}

/// Where tenant records live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory; `~/.wagate` when unset.
    pub data_dir: Option<PathBuf>,
    /// SQLite file name inside the data directory.
    pub database: Option<String>,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        let dir = self
            .data_dir
            .clone()
            .unwrap_or_else(crate::loader::data_dir);
        dir.join(self.database.as_deref().unwrap_or("users.db"))
    }
}

/// Session lifecycle timing and the reconnect budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub connect_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub shutdown_deadline_secs: u64,
    pub reconnect_attempts: u32,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// Resume every tenant flagged as connected when the process starts.
    pub connect_on_startup: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            stop_timeout_secs: 10,
            shutdown_deadline_secs: 10,
            reconnect_attempts: 5,
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 30_000,
            connect_on_startup: true,
        }
    }
}

impl SessionsConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_deadline_secs)
    }
}

/// Outbound webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhooksConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_initial_ms: u64,
    /// Upper bound on concurrent outbound POSTs across all tenants.
    pub max_concurrency: usize,
    /// Pending deliveries buffered per tenant before new events are dropped.
    pub queue_capacity: usize,
    /// Recent events kept per tenant for `GET /session/events`.
    pub recent_events: usize,
    /// Attach an HMAC-SHA256 signature keyed by the tenant token.
    pub sign: bool,
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_attempts: 3,
            retry_initial_ms: 500,
            max_concurrency: 32,
            queue_capacity: 256,
            recent_events: 100,
            sign: false,
        }
    }
}

/// Protocol sidecar the bundled client connects to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub url: String,
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765".into(),
            request_timeout_secs: 30,
        }
    }
}

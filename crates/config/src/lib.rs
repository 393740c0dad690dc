//! Configuration loading: file discovery, `${VAR}` substitution and the
//! typed schema consumed by the gateway and the binary.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, config_dir, data_dir, discover_and_load, load_config, set_config_dir,
    },
    schema::{
        AuthConfig, BridgeConfig, ServerConfig, SessionsConfig, StorageConfig, WagateConfig,
        WebhooksConfig,
    },
};

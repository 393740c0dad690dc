use std::{
    path::{Path, PathBuf},
    sync::RwLock,
};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::WagateConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["wagate.toml", "wagate.yaml", "wagate.yml", "wagate.json"];

/// Env var that supplies the admin token when the file does not.
const ADMIN_TOKEN_ENV: &str = "WAGATE_ADMIN_TOKEN";

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Restrict config discovery to `path`. Each call replaces the previous override.
pub fn set_config_dir(path: PathBuf) {
    if let Ok(mut guard) = CONFIG_DIR_OVERRIDE.write() {
        *guard = Some(path);
    }
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    if let Ok(mut guard) = CONFIG_DIR_OVERRIDE.write() {
        *guard = None;
    }
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE.read().ok().and_then(|g| g.clone())
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<WagateConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./wagate.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/wagate/wagate.{toml,yaml,yml,json}` (user-global)
///
/// Returns defaults (plus env overrides) when no file is found.
pub fn discover_and_load() -> WagateConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    let mut config = WagateConfig::default();
    apply_env_overrides(&mut config);
    config
}

fn apply_env_overrides(config: &mut WagateConfig) {
    if let Ok(token) = std::env::var(ADMIN_TOKEN_ENV)
        && !token.is_empty()
    {
        config.auth.admin_token = Some(Secret::new(token));
    }
}

/// Find the first config file in standard locations.
///
/// When a config dir override is set, only that directory is searched.
fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return first_existing(&dir);
    }

    if let Some(p) = first_existing(Path::new(".")) {
        return Some(p);
    }

    home_dir()
        .map(|h| h.join(".config").join("wagate"))
        .and_then(|dir| first_existing(&dir))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the config directory: override, or `~/.config/wagate/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    home_dir().map(|h| h.join(".config").join("wagate"))
}

/// Returns the data directory: `~/.wagate/` on all platforms.
pub fn data_dir() -> PathBuf {
    home_dir()
        .map(|h| h.join(".wagate"))
        .unwrap_or_else(|| PathBuf::from(".wagate"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<WagateConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

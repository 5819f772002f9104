//! Configuration loader
//!
//! Loads [`ResilinkConfig`] from a file, then applies environment overrides.
//!
//! ## Loading Strategy
//! 1. `RESILINK_CONFIG` names the file explicitly, if set
//! 2. Otherwise probes the standard paths for a config file
//! 3. Falls back to the documented defaults when no file exists
//! 4. Applies `RESILINK_*` environment overrides on top
//! 5. Validates the result
//!
//! Every section is optional in the file; missing settings keep their
//! defaults. Durations are written in milliseconds.
//!
//! ## Environment Variables
//! - `RESILINK_CONFIG`: Config file path
//! - `RESILINK_BASE_URL`: Base URL for relative request paths
//! - `RESILINK_MAX_CONNECTIONS`: Global connection ceiling
//! - `RESILINK_MAX_CONNECTIONS_PER_HOST`: Per-host connection ceiling
//! - `RESILINK_CONNECT_TIMEOUT_MS`: Connect timeout
//! - `RESILINK_RECEIVE_TIMEOUT_MS`: Receive timeout
//! - `RESILINK_SEND_TIMEOUT_MS`: Send timeout
//! - `RESILINK_CACHE_TTL_MS`: Default cache staleness window
//! - `RESILINK_RETRY_MAX_ATTEMPTS`: Total attempts including the first
//! - `RESILINK_RETRY_BASE_DELAY_MS`: Backoff base delay
//! - `RESILINK_RETRY_JITTER`: Whether backoff is jittered (true/false)
//! - `RESILINK_OFFLINE_PRIORITY`: Default offline replay priority
//! - `RESILINK_{CACHE,RETRY,OFFLINE,MONITOR,AUTH}_ENABLED`: Feature toggles
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./resilink.json` or `./resilink.toml` (current working directory)
//! 2. `./config.json` or `./config.toml` (current working directory)
//! 3. The same names next to the executable

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use resilink_common::error::{CommonError, CommonResult};
use resilink_domain::ResilinkConfig;

/// Supported config file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Detect by file extension; unknown extensions are rejected
    pub fn from_path(path: &Path) -> CommonResult<Self> {
        match path.extension().and_then(|e| e.to_str()).unwrap_or("json") {
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            other => Err(CommonError::config(format!("Unsupported config format: {other}"))),
        }
    }
}

/// Load configuration with the full fallback strategy
///
/// # Errors
/// Returns `CommonError::Config` if the named file is missing, a file
/// cannot be parsed, an environment override is malformed, or the
/// resulting configuration fails validation.
pub fn load() -> CommonResult<ResilinkConfig> {
    let explicit = std::env::var("RESILINK_CONFIG").ok().map(PathBuf::from);
    let mut config = match explicit.or_else(probe_config_paths) {
        Some(path) => load_from_file(Some(path))?,
        None => {
            tracing::debug!("No config file found, using defaults");
            ResilinkConfig::default()
        }
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;
    tracing::info!(base_url = %config.base_url, "Configuration loaded");
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. The format is
/// detected by file extension.
///
/// # Errors
/// Returns `CommonError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> CommonResult<ResilinkConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CommonError::config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            CommonError::config("No config file found in any of the standard locations")
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| CommonError::config(format!("Failed to read config file: {e}")))?;

    load_from_str(&contents, ConfigFormat::from_path(&config_path)?)
}

/// Parse configuration from string content
///
/// # Errors
/// Returns `CommonError::Config` if parsing fails.
pub fn load_from_str(contents: &str, format: ConfigFormat) -> CommonResult<ResilinkConfig> {
    match format {
        ConfigFormat::Toml => toml::from_str(contents)
            .map_err(|e| CommonError::config(format!("Invalid TOML format: {e}"))),
        ConfigFormat::Json => serde_json::from_str(contents)
            .map_err(|e| CommonError::config(format!("Invalid JSON format: {e}"))),
    }
}

/// Probe the standard locations for a configuration file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    const NAMES: [&str; 4] = ["resilink.json", "resilink.toml", "config.json", "config.toml"];

    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(exe_dir) =
        std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir);
    }

    dirs.iter().flat_map(|dir| NAMES.iter().map(move |name| dir.join(name))).find(|p| p.exists())
}

/// Apply `RESILINK_*` overrides to `config`
///
/// # Errors
/// Returns `CommonError::Config` naming the variable when a value does not
/// parse.
pub fn apply_env_overrides(config: &mut ResilinkConfig) -> CommonResult<()> {
    if let Some(base_url) = env_var("RESILINK_BASE_URL") {
        config.base_url = base_url;
    }

    if let Some(value) = env_parse("RESILINK_MAX_CONNECTIONS")? {
        config.pool.max_connections = value;
    }
    if let Some(value) = env_parse("RESILINK_MAX_CONNECTIONS_PER_HOST")? {
        config.pool.max_connections_per_host = value;
    }
    if let Some(value) = env_millis("RESILINK_CONNECT_TIMEOUT_MS")? {
        config.pool.connect_timeout = value;
    }
    if let Some(value) = env_millis("RESILINK_RECEIVE_TIMEOUT_MS")? {
        config.pool.receive_timeout = value;
    }
    if let Some(value) = env_millis("RESILINK_SEND_TIMEOUT_MS")? {
        config.pool.send_timeout = value;
    }

    if let Some(value) = env_millis("RESILINK_CACHE_TTL_MS")? {
        config.cache.default_ttl = value;
    }

    if let Some(value) = env_parse("RESILINK_RETRY_MAX_ATTEMPTS")? {
        config.retry.max_attempts = value;
    }
    if let Some(value) = env_millis("RESILINK_RETRY_BASE_DELAY_MS")? {
        config.retry.base_delay = value;
    }
    config.retry.jitter = env_bool("RESILINK_RETRY_JITTER", config.retry.jitter);

    if let Some(value) = env_parse("RESILINK_OFFLINE_PRIORITY")? {
        config.offline.default_priority = value;
    }

    let features = &mut config.features;
    features.cache = env_bool("RESILINK_CACHE_ENABLED", features.cache);
    features.retry = env_bool("RESILINK_RETRY_ENABLED", features.retry);
    features.offline = env_bool("RESILINK_OFFLINE_ENABLED", features.offline);
    features.monitor = env_bool("RESILINK_MONITOR_ENABLED", features.monitor);
    features.auth = env_bool("RESILINK_AUTH_ENABLED", features.auth);
    Ok(())
}

/// Non-empty environment variable
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Parse a numeric environment variable
///
/// # Errors
/// Returns `CommonError::Config` if the variable is set but does not parse.
fn env_parse<T>(key: &str) -> CommonResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| CommonError::config_field(key, format!("Invalid value '{raw}': {e}")))
        })
        .transpose()
}

fn env_millis(key: &str) -> CommonResult<Option<Duration>> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
///
/// # Returns
/// The parsed boolean value, or `default` if not set.
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

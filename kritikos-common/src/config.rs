//! Configuration file loading and path resolution
//!
//! The TOML file is the lowest-priority configuration tier. Every field is
//! optional so that a partial file only overrides what it names; the analysis
//! service layers database settings and environment variables on top.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "KRITIKOS_CONFIG";

/// Root of the TOML configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// SQLite database file
    pub database_path: Option<PathBuf>,
    /// HTTP bind address (e.g. "127.0.0.1")
    pub bind_address: Option<String>,
    /// HTTP port
    pub port: Option<u16>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
}

/// `[logging]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is unset
    pub filter: Option<String>,
}

/// `[llm]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub requests_per_minute: Option<u32>,
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

/// `[pipeline]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub lot_size: Option<usize>,
    pub max_lots: Option<usize>,
    pub item_delay_ms: Option<u64>,
    pub lot_pause_ms: Option<u64>,
    pub reanalysis_days: Option<i64>,
    pub analysis_version: Option<String>,
    pub save_logs: Option<bool>,
    pub max_input_chars: Option<usize>,
    pub max_item_attempts: Option<u32>,
}

/// `[fetcher]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FetcherConfig {
    pub storage_base_url: Option<String>,
    pub camara_api_base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Locate the config file
///
/// Priority:
/// 1. Explicit path (command line)
/// 2. `KRITIKOS_CONFIG` environment variable
/// 3. `<user config dir>/kritikos/config.toml`, if it exists
/// 4. `/etc/kritikos/config.toml` on Linux, if it exists
///
/// Returns None when no file applies; running without a config file is valid.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("kritikos").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/kritikos/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Load the config file when one is present, defaults otherwise
///
/// A missing file is not an error; an unreadable or malformed one is.
pub fn load_or_default(path: Option<&Path>) -> Result<TomlConfig> {
    match path {
        Some(path) if path.exists() => load_toml_config(path),
        Some(path) => {
            debug!("Config file {} not present, using defaults", path.display());
            Ok(TomlConfig::default())
        }
        None => Ok(TomlConfig::default()),
    }
}

/// Write a TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolve the database file
///
/// Priority: explicit path (command line / environment) → TOML → data dir default
pub fn resolve_database_path(cli_path: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_path {
        return path.to_path_buf();
    }
    if let Some(path) = &toml_config.database_path {
        return path.clone();
    }
    default_database_path()
}

/// OS-dependent default database location
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("kritikos"))
        .unwrap_or_else(|| PathBuf::from("./kritikos_data"))
        .join("kritikos.db")
}

/// User-Agent sent by every outbound HTTP client
pub fn get_user_agent() -> String {
    format!("Kritikos/{} (civic transparency analysis)", env!("CARGO_PKG_VERSION"))
}

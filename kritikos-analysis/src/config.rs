//! Configuration resolution for kritikos-analysis
//!
//! Each setting resolves Database → TOML → compiled default. The LLM API key
//! additionally checks `GEMINI_API_KEY` between the database and the TOML
//! file. Command-line flags are applied on top by `main`.

use kritikos_common::config::TomlConfig;
use kritikos_common::{Error, Result};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{info, warn};

use crate::db::settings::{self, get_setting};
use crate::llm::{gemini, GeminiConfig, RetryPolicy};
use crate::services::proposal_fetcher::{DEFAULT_CAMARA_API_BASE_URL, DEFAULT_STORAGE_BASE_URL};
use crate::services::summarizer::DEFAULT_MAX_INPUT_CHARS;

/// Environment variable holding the Gemini API key
pub const API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";

/// Resolve the LLM API key from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML
pub async fn resolve_llm_api_key(db: &SqlitePool, toml_config: &TomlConfig) -> Result<String> {
    let mut sources = Vec::new();

    let db_key = settings::get_llm_api_key(db).await?.filter(|k| is_valid_key(k));
    if db_key.is_some() {
        sources.push("database");
    }

    let env_key = std::env::var(API_KEY_ENV_VAR).ok().filter(|k| is_valid_key(k));
    if env_key.is_some() {
        sources.push("environment");
    }

    let toml_key = toml_config.llm.api_key.clone().filter(|k| is_valid_key(k));
    if toml_key.is_some() {
        sources.push("TOML");
    }

    if sources.len() > 1 {
        warn!(
            "LLM API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(key) = db_key {
        info!("LLM API key loaded from database");
        return Ok(key);
    }
    if let Some(key) = env_key {
        info!("LLM API key loaded from environment variable");
        return Ok(key);
    }
    if let Some(key) = toml_key {
        info!("LLM API key loaded from TOML config");
        return Ok(key);
    }

    Err(Error::Config(format!(
        "LLM API key not configured. Please configure using one of:\n\
         1. Database: settings key '{}'\n\
         2. Environment: {}=your-key-here\n\
         3. TOML config: [llm] api_key = \"your-key\"",
        settings::LLM_API_KEY,
        API_KEY_ENV_VAR
    )))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Database setting, then TOML value, then default
async fn resolve<T>(db: &SqlitePool, key: &str, toml_value: Option<T>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    Ok(get_setting::<T>(db, key).await?.or(toml_value).unwrap_or(default))
}

/// LLM client settings (API key resolved separately)
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout: Duration,
    pub requests_per_minute: u32,
    pub retry: RetryPolicy,
}

impl Default for LlmSettings {
    fn default() -> Self {
        let base = GeminiConfig::new("");
        Self {
            model: base.model,
            base_url: base.base_url,
            temperature: base.temperature,
            max_output_tokens: base.max_output_tokens,
            timeout: base.timeout,
            requests_per_minute: base.requests_per_minute,
            retry: base.retry,
        }
    }
}

impl LlmSettings {
    pub async fn resolve(db: &SqlitePool, toml_config: &TomlConfig) -> Result<Self> {
        let llm = &toml_config.llm;
        let defaults = Self::default();
        let default_retry = RetryPolicy::default();

        Ok(Self {
            model: resolve(db, settings::LLM_MODEL, llm.model.clone(), gemini::DEFAULT_MODEL.to_string()).await?,
            base_url: llm.base_url.clone().unwrap_or(defaults.base_url),
            temperature: llm.temperature.unwrap_or(defaults.temperature),
            max_output_tokens: llm.max_output_tokens.unwrap_or(defaults.max_output_tokens),
            timeout: llm.timeout_secs.map(Duration::from_secs).unwrap_or(defaults.timeout),
            requests_per_minute: resolve(
                db,
                settings::LLM_REQUESTS_PER_MINUTE,
                llm.requests_per_minute,
                defaults.requests_per_minute,
            )
            .await?,
            retry: RetryPolicy {
                max_retries: resolve(db, settings::LLM_MAX_RETRIES, llm.max_retries, default_retry.max_retries)
                    .await?,
                initial_backoff: llm
                    .initial_backoff_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default_retry.initial_backoff),
                max_backoff: llm
                    .max_backoff_ms
                    .map(Duration::from_millis)
                    .unwrap_or(default_retry.max_backoff),
            },
        })
    }

    /// Client configuration for the given key
    pub fn gemini_config(&self, api_key: String) -> GeminiConfig {
        GeminiConfig {
            api_key,
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            timeout: self.timeout,
            requests_per_minute: self.requests_per_minute,
            retry: self.retry,
        }
    }
}

/// Pipeline and batch driver settings
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Proposals per lot
    pub lot_size: usize,
    /// Lots per continuous run (None = until no work remains)
    pub max_lots: Option<usize>,
    /// Pause between items
    pub item_delay: Duration,
    /// Pause between lots in continuous mode
    pub lot_pause: Duration,
    /// Persisted analyses older than this are redone
    pub reanalysis_days: i64,
    pub analysis_version: String,
    /// Write processing_logs rows
    pub save_logs: bool,
    /// Bill text budget for the summarizer prompt
    pub max_input_chars: usize,
    /// FAILED items are re-selected until this many attempts
    pub max_item_attempts: u32,
    pub max_lock_wait_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            lot_size: 10,
            max_lots: Some(5),
            item_delay: Duration::from_millis(2000),
            lot_pause: Duration::from_millis(10_000),
            reanalysis_days: 7,
            analysis_version: "1.0".to_string(),
            save_logs: true,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            max_item_attempts: 3,
            max_lock_wait_ms: 5000,
        }
    }
}

impl PipelineSettings {
    pub async fn resolve(db: &SqlitePool, toml_config: &TomlConfig) -> Result<Self> {
        let p = &toml_config.pipeline;
        let d = Self::default();

        let lot_size: usize = resolve(db, settings::PIPELINE_LOT_SIZE, p.lot_size, d.lot_size).await?;
        if lot_size == 0 {
            return Err(Error::Config("pipeline lot_size must be at least 1".to_string()));
        }

        // 0 means no lot limit
        let max_lots: usize = resolve(db, settings::PIPELINE_MAX_LOTS, p.max_lots, 5).await?;

        let item_delay_ms = resolve(db, settings::PIPELINE_ITEM_DELAY_MS, p.item_delay_ms, 2000u64).await?;
        let lot_pause_ms = resolve(db, settings::PIPELINE_LOT_PAUSE_MS, p.lot_pause_ms, 10_000u64).await?;

        Ok(Self {
            lot_size,
            max_lots: (max_lots > 0).then_some(max_lots),
            item_delay: Duration::from_millis(item_delay_ms),
            lot_pause: Duration::from_millis(lot_pause_ms),
            reanalysis_days: resolve(db, settings::PIPELINE_REANALYSIS_DAYS, p.reanalysis_days, d.reanalysis_days)
                .await?,
            analysis_version: resolve(
                db,
                settings::ANALYSIS_VERSION,
                p.analysis_version.clone(),
                d.analysis_version,
            )
            .await?,
            save_logs: resolve(db, settings::PIPELINE_SAVE_LOGS, p.save_logs, d.save_logs).await?,
            max_input_chars: resolve(db, settings::PIPELINE_MAX_INPUT_CHARS, p.max_input_chars, d.max_input_chars)
                .await?,
            max_item_attempts: resolve(
                db,
                settings::PIPELINE_MAX_ITEM_ATTEMPTS,
                p.max_item_attempts,
                d.max_item_attempts,
            )
            .await?
            .max(1),
            max_lock_wait_ms: settings::get_max_lock_wait_ms(db).await?,
        })
    }
}

/// Text source settings
#[derive(Debug, Clone, PartialEq)]
pub struct FetcherSettings {
    pub storage_base_url: String,
    pub camara_api_base_url: String,
    pub timeout: Duration,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            storage_base_url: DEFAULT_STORAGE_BASE_URL.to_string(),
            camara_api_base_url: DEFAULT_CAMARA_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl FetcherSettings {
    pub async fn resolve(db: &SqlitePool, toml_config: &TomlConfig) -> Result<Self> {
        let f = &toml_config.fetcher;
        let d = Self::default();

        Ok(Self {
            storage_base_url: resolve(
                db,
                settings::FETCHER_STORAGE_BASE_URL,
                f.storage_base_url.clone(),
                d.storage_base_url,
            )
            .await?,
            camara_api_base_url: resolve(
                db,
                settings::FETCHER_CAMARA_API_BASE_URL,
                f.camara_api_base_url.clone(),
                d.camara_api_base_url,
            )
            .await?,
            timeout: f.timeout_secs.map(Duration::from_secs).unwrap_or(d.timeout),
        })
    }
}

/// Everything the service needs besides the API key
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub llm: LlmSettings,
    pub pipeline: PipelineSettings,
    pub fetcher: FetcherSettings,
}

impl ServiceConfig {
    pub async fn resolve(db: &SqlitePool, toml_config: &TomlConfig) -> Result<Self> {
        Ok(Self {
            llm: LlmSettings::resolve(db, toml_config).await?,
            pipeline: PipelineSettings::resolve(db, toml_config).await?,
            fetcher: FetcherSettings::resolve(db, toml_config).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("abc"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("   "));
    }

    #[tokio::test]
    async fn test_defaults_without_overrides() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let config = ServiceConfig::resolve(&pool, &TomlConfig::default()).await.unwrap();

        assert_eq!(config.pipeline, PipelineSettings::default());
        assert_eq!(config.fetcher, FetcherSettings::default());
        assert_eq!(config.llm.model, gemini::DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn test_database_overrides_toml() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let mut toml_config = TomlConfig::default();
        toml_config.pipeline.lot_size = Some(25);
        toml_config.pipeline.item_delay_ms = Some(500);

        settings::set_setting(&pool, settings::PIPELINE_LOT_SIZE, 3).await.unwrap();

        let pipeline = PipelineSettings::resolve(&pool, &toml_config).await.unwrap();
        assert_eq!(pipeline.lot_size, 3, "database wins");
        assert_eq!(pipeline.item_delay, Duration::from_millis(500), "TOML beats default");
    }

    #[tokio::test]
    async fn test_zero_max_lots_means_unbounded() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let mut toml_config = TomlConfig::default();
        toml_config.pipeline.max_lots = Some(0);

        let pipeline = PipelineSettings::resolve(&pool, &toml_config).await.unwrap();
        assert_eq!(pipeline.max_lots, None);
    }

    #[tokio::test]
    async fn test_zero_lot_size_rejected() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let mut toml_config = TomlConfig::default();
        toml_config.pipeline.lot_size = Some(0);

        assert!(PipelineSettings::resolve(&pool, &toml_config).await.is_err());
    }
}

//! Settings database operations
//!
//! Typed get/set accessors over the `settings` key-value table. A missing
//! row and a NULL value both read as "not set".

use sqlx::SqlitePool;
use kritikos_common::{Error, Result};

pub const LLM_API_KEY: &str = "llm_api_key";
pub const LLM_MODEL: &str = "llm_model";
pub const LLM_REQUESTS_PER_MINUTE: &str = "llm_requests_per_minute";
pub const LLM_MAX_RETRIES: &str = "llm_max_retries";
pub const PIPELINE_LOT_SIZE: &str = "pipeline_lot_size";
pub const PIPELINE_MAX_LOTS: &str = "pipeline_max_lots";
pub const PIPELINE_ITEM_DELAY_MS: &str = "pipeline_item_delay_ms";
pub const PIPELINE_LOT_PAUSE_MS: &str = "pipeline_lot_pause_ms";
pub const PIPELINE_REANALYSIS_DAYS: &str = "pipeline_reanalysis_days";
pub const PIPELINE_SAVE_LOGS: &str = "pipeline_save_logs";
pub const PIPELINE_MAX_INPUT_CHARS: &str = "pipeline_max_input_chars";
pub const PIPELINE_MAX_ITEM_ATTEMPTS: &str = "pipeline_max_item_attempts";
pub const ANALYSIS_VERSION: &str = "analysis_version";
pub const FETCHER_STORAGE_BASE_URL: &str = "fetcher_storage_base_url";
pub const FETCHER_CAMARA_API_BASE_URL: &str = "fetcher_camara_api_base_url";
pub const DATABASE_MAX_LOCK_WAIT_MS: &str = "database_max_lock_wait_ms";

/// Get the LLM API key
pub async fn get_llm_api_key(db: &SqlitePool) -> Result<Option<String>> {
    get_setting::<String>(db, LLM_API_KEY).await
}

/// Set the LLM API key
pub async fn set_llm_api_key(db: &SqlitePool, key: String) -> Result<()> {
    set_setting(db, LLM_API_KEY, key).await
}

/// Upper bound for retry_on_lock waits
///
/// **Default:** 5000 ms
pub async fn get_max_lock_wait_ms(db: &SqlitePool) -> Result<u64> {
    get_setting(db, DATABASE_MAX_LOCK_WAIT_MS).await.map(|opt| opt.unwrap_or(5000))
}

/// Generic setting getter
pub async fn get_setting<T>(db: &SqlitePool, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match value.flatten() {
        Some(value) => {
            let parsed = value
                .trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &SqlitePool, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

//! Database access for kritikos-analysis
//!
//! The schema lives in `kritikos_common::db`; the modules here hold the
//! queries the pipeline, the aggregator and the API run against it.

pub mod analyses;
pub mod processing_log;
pub mod proposals;
pub mod report;
pub mod runs;
pub mod scores;
pub mod settings;

use kritikos_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open the database, creating the file and schema when missing
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::debug!("Connecting to database: {}", db_path.display());
    kritikos_common::db::init::init_database(db_path).await
}

/// In-memory pool with the full schema
///
/// A single connection, so every query sees the same database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    kritikos_common::db::init::create_schema(&pool).await?;
    Ok(pool)
}

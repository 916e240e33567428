//! Database initialization tests
//!
//! Covers first-run creation, reopening an existing file, schema idempotency
//! and seeded settings.

use kritikos_common::db::init::init_database;
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("kritikos.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("kritikos.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_all_tables_created() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("kritikos.db")).await.unwrap();

    for table in [
        "settings",
        "legislators",
        "proposals",
        "authorships",
        "expenses",
        "earmarks",
        "proposal_analyses",
        "processing_logs",
        "legislator_scores",
        "analysis_runs",
    ] {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists, "table {} missing", table);
    }
}

#[tokio::test]
async fn test_default_settings_initialized() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("kritikos.db")).await.unwrap();

    let max_wait: Option<String> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = 'database_max_lock_wait_ms'")
            .fetch_optional(&pool)
            .await
            .unwrap();
    assert_eq!(max_wait.as_deref(), Some("5000"));

    // Pipeline settings stay unset so lower configuration tiers apply
    let lot_size: Option<String> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = 'pipeline_lot_size'")
            .fetch_optional(&pool)
            .await
            .unwrap();
    assert!(lot_size.is_none());
}

#[tokio::test]
async fn test_null_setting_reset_on_reopen() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("kritikos.db");

    let pool = init_database(&db_path).await.unwrap();
    sqlx::query("UPDATE settings SET value = NULL WHERE key = 'database_lock_retry_ms'")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let pool = init_database(&db_path).await.unwrap();
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = 'database_lock_retry_ms'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(value.as_deref(), Some("250"));
}

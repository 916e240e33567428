//! Database initialization
//!
//! Opens (or creates) the SQLite database and applies the schema. Every
//! statement is `CREATE ... IF NOT EXISTS`, so initialization is safe to run
//! on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // One writer (the batch driver) with concurrent API readers
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    create_schema(&pool).await?;
    init_default_settings(&pool).await?;

    // Short busy timeout; longer waits are handled by retry_on_lock
    let timeout_ms: i64 = sqlx::query_scalar(
        "SELECT CAST(value AS INTEGER) FROM settings WHERE key = 'database_lock_retry_ms'",
    )
    .fetch_optional(&pool)
    .await?
    .unwrap_or(250);

    let pragma_sql = format!("PRAGMA busy_timeout = {}", timeout_ms);
    sqlx::query(&pragma_sql).execute(&pool).await?;

    info!("Database busy timeout set to {} ms", timeout_ms);

    Ok(pool)
}

/// Create every table and index
///
/// Split out of [`init_database`] so tests can build the schema on an
/// in-memory pool.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;

    // Source data (loaded by the ETL collectors)
    create_legislators_table(pool).await?;
    create_proposals_table(pool).await?;
    create_authorships_table(pool).await?;
    create_expenses_table(pool).await?;
    create_earmarks_table(pool).await?;

    // Analysis pipeline output
    create_proposal_analyses_table(pool).await?;
    create_processing_logs_table(pool).await?;
    create_legislator_scores_table(pool).await?;
    create_analysis_runs_table(pool).await?;

    Ok(())
}

/// Create the settings table
///
/// Stores application configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Seed settings that only the database layer reads
///
/// Pipeline and LLM settings are deliberately not seeded: an absent row
/// lets the TOML file and compiled defaults apply.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, "database_lock_retry_ms", "250").await?;
    ensure_setting(pool, "database_max_lock_wait_ms", "5000").await?;
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// A missing row is created; a row holding NULL is reset to the default.
async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match value {
        None => {
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;
            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
        Some(None) => {
            sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
                .bind(default_value)
                .bind(key)
                .execute(pool)
                .await?;
            warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
        }
        Some(Some(_)) => {}
    }

    Ok(())
}

pub async fn create_legislators_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS legislators (
            id INTEGER PRIMARY KEY,
            camara_id INTEGER NOT NULL UNIQUE,
            name TEXT NOT NULL,
            party TEXT,
            state_uf TEXT,
            email TEXT,
            photo_url TEXT,
            status TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_legislators_party_uf ON legislators(party, state_uf)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_proposals_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS proposals (
            id INTEGER PRIMARY KEY,
            camara_id INTEGER NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            number INTEGER,
            year INTEGER,
            summary_line TEXT,
            explanation TEXT,
            presented_at TEXT,
            full_text_url TEXT,
            storage_url TEXT,
            keywords TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_proposals_year_kind ON proposals(year, kind)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_authorships_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS authorships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            proposal_id INTEGER NOT NULL REFERENCES proposals(id) ON DELETE CASCADE,
            legislator_id INTEGER NOT NULL REFERENCES legislators(id) ON DELETE CASCADE,
            authorship_kind TEXT,
            position INTEGER,
            UNIQUE(proposal_id, legislator_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_authorships_legislator ON authorships(legislator_id)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_expenses_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            legislator_id INTEGER NOT NULL REFERENCES legislators(id) ON DELETE CASCADE,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL CHECK (month BETWEEN 1 AND 12),
            expense_kind TEXT,
            supplier TEXT,
            document_value REAL NOT NULL DEFAULT 0,
            net_value REAL NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_expenses_legislator_year ON expenses(legislator_id, year)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_earmarks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS earmarks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            legislator_id INTEGER NOT NULL REFERENCES legislators(id) ON DELETE CASCADE,
            year INTEGER NOT NULL,
            kind TEXT,
            number TEXT,
            committed_value REAL NOT NULL DEFAULT 0,
            paid_value REAL NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_earmarks_legislator_year ON earmarks(legislator_id, year)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the proposal_analyses table
///
/// One row per proposal. The row doubles as the pipeline checkpoint: `stage`
/// records the last completed step so an interrupted item resumes there.
pub async fn create_proposal_analyses_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS proposal_analyses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            proposal_id INTEGER NOT NULL UNIQUE REFERENCES proposals(id) ON DELETE CASCADE,
            stage TEXT NOT NULL DEFAULT 'PENDING',
            text_source TEXT,
            summary TEXT,
            summarized_at TEXT,
            is_trivial INTEGER,
            trivial_reason TEXT,
            filtered_at TEXT,
            scope_impact REAL,
            sdg_alignment REAL,
            innovation_efficiency REAL,
            fiscal_sustainability REAL,
            burden_penalty REAL,
            par_final REAL,
            sdg_goals TEXT,
            analysis_notes TEXT,
            analyzed_at TEXT,
            analysis_version TEXT NOT NULL DEFAULT '1.0',
            last_error TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_proposal_analyses_stage ON proposal_analyses(stage)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the processing_logs audit table
pub async fn create_processing_logs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processing_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            process_kind TEXT NOT NULL,
            run_id TEXT,
            proposal_id INTEGER,
            legislator_id INTEGER,
            status TEXT NOT NULL CHECK (status IN ('success', 'error', 'skipped')),
            message TEXT,
            input_data TEXT,
            output_data TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            duration_seconds REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_processing_logs_kind_status ON processing_logs(process_kind, status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_processing_logs_proposal ON processing_logs(proposal_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the legislator_scores table
///
/// Scores are versioned by methodology; recomputing replaces the row for
/// the same (legislator, methodology) pair.
pub async fn create_legislator_scores_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS legislator_scores (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            legislator_id INTEGER NOT NULL REFERENCES legislators(id) ON DELETE CASCADE,
            methodology_version TEXT NOT NULL,
            reference_year INTEGER,
            performance_score REAL NOT NULL,
            relevance_score REAL NOT NULL,
            responsibility_score REAL NOT NULL,
            ethics_score REAL,
            final_score REAL NOT NULL,
            total_proposals INTEGER NOT NULL DEFAULT 0,
            analyzed_proposals INTEGER NOT NULL DEFAULT 0,
            trivial_proposals INTEGER NOT NULL DEFAULT 0,
            relevant_proposals INTEGER NOT NULL DEFAULT 0,
            total_expenses REAL NOT NULL DEFAULT 0,
            earmarks_committed REAL NOT NULL DEFAULT 0,
            earmarks_paid REAL NOT NULL DEFAULT 0,
            computed_at TEXT NOT NULL,
            UNIQUE(legislator_id, methodology_version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_legislator_scores_ranking ON legislator_scores(methodology_version, final_score DESC)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the analysis_runs table (one row per batch run)
pub async fn create_analysis_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_runs (
            run_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            parameters TEXT NOT NULL,
            statistics TEXT NOT NULL,
            last_error TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

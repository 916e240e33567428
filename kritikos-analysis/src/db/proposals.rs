//! Work selection for the batch driver

use kritikos_common::db::{proposal_from_row, Proposal, PROPOSAL_COLUMNS};
use kritikos_common::Result;
use sqlx::SqlitePool;

/// Which proposals need (re)analysis
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionCriteria {
    pub analysis_version: String,
    /// Analyses older than this many days are redone
    pub reanalysis_days: i64,
    /// FAILED rows stop being retried at this many attempts, until they go
    /// stale or the analysis version changes
    pub max_item_attempts: u32,
}

/// Shared WHERE clause; binds: version, cutoff, max attempts, cutoff
const NEEDS_ANALYSIS: &str = r#"
    a.proposal_id IS NULL
    OR a.stage NOT IN ('PERSISTED', 'SKIPPED', 'FAILED')
    OR (a.stage = 'FAILED' AND (a.attempts < ?3 OR a.analysis_version <> ?1 OR a.updated_at IS NULL OR a.updated_at < ?2))
    OR (a.stage = 'PERSISTED' AND (a.analysis_version <> ?1 OR a.analyzed_at IS NULL OR a.analyzed_at < ?2))
    OR (a.stage = 'SKIPPED' AND (a.updated_at IS NULL OR a.updated_at < ?2))
"#;

/// Select the next lot
///
/// Never-analyzed proposals come first, then the most recent ids.
pub async fn select_lot(pool: &SqlitePool, criteria: &SelectionCriteria, lot_size: usize) -> Result<Vec<Proposal>> {
    let cutoff = kritikos_common::time::days_ago_db_timestamp(criteria.reanalysis_days);

    let sql = format!(
        r#"
        SELECT {}
        FROM proposals p
        LEFT JOIN proposal_analyses a ON a.proposal_id = p.id
        WHERE {}
        ORDER BY (a.proposal_id IS NULL) DESC, p.id DESC
        LIMIT ?4
        "#,
        PROPOSAL_COLUMNS, NEEDS_ANALYSIS
    );

    let rows = sqlx::query(&sql)
        .bind(&criteria.analysis_version)
        .bind(&cutoff)
        .bind(i64::from(criteria.max_item_attempts))
        .bind(lot_size as i64)
        .fetch_all(pool)
        .await?;

    rows.iter().map(proposal_from_row).collect()
}

/// Number of proposals the selection would still return
pub async fn count_pending(pool: &SqlitePool, criteria: &SelectionCriteria) -> Result<i64> {
    let cutoff = kritikos_common::time::days_ago_db_timestamp(criteria.reanalysis_days);

    let sql = format!(
        r#"
        SELECT COUNT(*)
        FROM proposals p
        LEFT JOIN proposal_analyses a ON a.proposal_id = p.id
        WHERE {}
        "#,
        NEEDS_ANALYSIS
    );

    let count: i64 = sqlx::query_scalar(&sql)
        .bind(&criteria.analysis_version)
        .bind(&cutoff)
        .bind(i64::from(criteria.max_item_attempts))
        .fetch_one(pool)
        .await?;

    Ok(count)
}

//! Aggregate analysis report

use chrono::{DateTime, Utc};
use kritikos_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use super::processing_log::{count_by_kind_and_status, LogCount};

/// Days of processing logs summarized in the report
pub const RECENT_LOG_DAYS: i64 = 7;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParStatistics {
    pub average: Option<f64>,
    pub max: Option<f64>,
    pub min: Option<f64>,
}

/// Stored legislator indexes of one methodology
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ScoreStatistics {
    pub methodology_version: String,
    pub legislators: i64,
    pub average: Option<f64>,
    pub max: Option<f64>,
    pub min: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub total_proposals: i64,
    /// Proposals with an analysis row in any stage
    pub with_analysis: i64,
    /// Finished (PERSISTED) analyses
    pub analyzed: i64,
    pub with_summary: i64,
    /// Triviality decided
    pub filtered: i64,
    /// PAR score present
    pub scored: i64,
    pub trivial: i64,
    pub relevant: i64,
    /// Trivial share of filtered proposals, in percent
    pub trivial_rate: f64,
    pub failed: i64,
    pub skipped: i64,
    pub par: ParStatistics,
    /// One entry per methodology with stored scores
    pub scores: Vec<ScoreStatistics>,
    /// processing_logs counts of the last [`RECENT_LOG_DAYS`] days
    pub recent_logs: Vec<LogCount>,
    pub generated_at: DateTime<Utc>,
}

pub async fn build_report(pool: &SqlitePool) -> Result<AnalysisReport> {
    let total_proposals: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM proposals")
        .fetch_one(pool)
        .await?;

    #[allow(clippy::type_complexity)]
    let counts: (i64, i64, i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*),
            COALESCE(SUM(CASE WHEN stage = 'PERSISTED' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN summary IS NOT NULL THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN is_trivial IS NOT NULL THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN par_final IS NOT NULL THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN is_trivial = 1 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN is_trivial = 0 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN stage = 'FAILED' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN stage = 'SKIPPED' THEN 1 ELSE 0 END), 0)
        FROM proposal_analyses
        "#,
    )
    .fetch_one(pool)
    .await?;
    let (with_analysis, analyzed, with_summary, filtered, scored, trivial, relevant, failed, skipped) = counts;

    let (average, max, min): (Option<f64>, Option<f64>, Option<f64>) = sqlx::query_as(
        "SELECT AVG(par_final), MAX(par_final), MIN(par_final) FROM proposal_analyses WHERE par_final IS NOT NULL",
    )
    .fetch_one(pool)
    .await?;

    let mut scores: Vec<ScoreStatistics> = sqlx::query_as(
        r#"
        SELECT methodology_version,
               COUNT(*) AS legislators,
               AVG(final_score) AS average,
               MAX(final_score) AS max,
               MIN(final_score) AS min
        FROM legislator_scores
        GROUP BY methodology_version
        ORDER BY methodology_version
        "#,
    )
    .fetch_all(pool)
    .await?;
    for entry in &mut scores {
        entry.average = entry.average.map(crate::scoring::round2);
    }

    let since = kritikos_common::time::days_ago_db_timestamp(RECENT_LOG_DAYS);
    let recent_logs = count_by_kind_and_status(pool, Some(&since)).await?;

    let trivial_rate = if filtered > 0 {
        crate::scoring::round2(trivial as f64 / filtered as f64 * 100.0)
    } else {
        0.0
    };

    Ok(AnalysisReport {
        total_proposals,
        with_analysis,
        analyzed,
        with_summary,
        filtered,
        scored,
        trivial,
        relevant,
        trivial_rate,
        failed,
        skipped,
        par: ParStatistics {
            average: average.map(crate::scoring::round2),
            max,
            min,
        },
        scores,
        recent_logs,
        generated_at: kritikos_common::time::now(),
    })
}

//! proposal_analyses persistence
//!
//! One row per proposal. The pipeline upserts the whole record after every
//! completed stage, so the row is also the resume checkpoint.

use chrono::{DateTime, Utc};
use kritikos_common::time::{parse_db_timestamp, to_db_timestamp};
use kritikos_common::{Error, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::models::{AnalysisStage, ParScore};
use crate::utils::retry_on_lock;

/// Stored analysis of one proposal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRecord {
    pub proposal_id: i64,
    pub stage: AnalysisStage,
    /// Where the analyzed text came from
    pub text_source: Option<String>,
    pub summary: Option<String>,
    pub summarized_at: Option<DateTime<Utc>>,
    pub is_trivial: Option<bool>,
    pub trivial_reason: Option<String>,
    pub filtered_at: Option<DateTime<Utc>>,
    pub par: Option<ParScore>,
    /// Set when the row reaches PERSISTED
    pub analyzed_at: Option<DateTime<Utc>>,
    pub analysis_version: String,
    pub last_error: Option<String>,
    pub attempts: u32,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AnalysisRecord {
    pub fn new(proposal_id: i64, analysis_version: &str) -> Self {
        Self {
            proposal_id,
            stage: AnalysisStage::Pending,
            text_source: None,
            summary: None,
            summarized_at: None,
            is_trivial: None,
            trivial_reason: None,
            filtered_at: None,
            par: None,
            analyzed_at: None,
            analysis_version: analysis_version.to_string(),
            last_error: None,
            attempts: 0,
            updated_at: None,
        }
    }

    /// Whether the row is a finished analysis newer than `cutoff` for `version`
    pub fn is_current(&self, version: &str, cutoff: DateTime<Utc>) -> bool {
        self.stage == AnalysisStage::Persisted
            && self.analysis_version == version
            && self.analyzed_at.is_some_and(|at| at >= cutoff)
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self> {
        let stage: String = row.try_get("stage")?;
        let stage = stage
            .parse::<AnalysisStage>()
            .map_err(|e| Error::Internal(format!("Failed to parse stage: {}", e)))?;

        let par_final: Option<f64> = row.try_get("par_final")?;
        let par = match par_final {
            Some(par_final) => {
                let sdg_goals: Option<String> = row.try_get("sdg_goals")?;
                let sdg_goals = match sdg_goals {
                    Some(json) => serde_json::from_str(&json)?,
                    None => Vec::new(),
                };
                Some(ParScore {
                    scope_impact: row.try_get::<Option<f64>, _>("scope_impact")?.unwrap_or(0.0),
                    sdg_alignment: row.try_get::<Option<f64>, _>("sdg_alignment")?.unwrap_or(0.0),
                    innovation_efficiency: row
                        .try_get::<Option<f64>, _>("innovation_efficiency")?
                        .unwrap_or(0.0),
                    fiscal_sustainability: row
                        .try_get::<Option<f64>, _>("fiscal_sustainability")?
                        .unwrap_or(0.0),
                    burden_penalty: row.try_get::<Option<f64>, _>("burden_penalty")?.unwrap_or(0.0),
                    par_final,
                    sdg_goals,
                    notes: row.try_get::<Option<String>, _>("analysis_notes")?.unwrap_or_default(),
                })
            }
            None => None,
        };

        let timestamp = |column: &str| -> Result<Option<DateTime<Utc>>> {
            let value: Option<String> = row.try_get(column)?;
            Ok(value.as_deref().and_then(parse_db_timestamp))
        };

        Ok(Self {
            proposal_id: row.try_get("proposal_id")?,
            stage,
            text_source: row.try_get("text_source")?,
            summary: row.try_get("summary")?,
            summarized_at: timestamp("summarized_at")?,
            is_trivial: row.try_get::<Option<i64>, _>("is_trivial")?.map(|v| v != 0),
            trivial_reason: row.try_get("trivial_reason")?,
            filtered_at: timestamp("filtered_at")?,
            par,
            analyzed_at: timestamp("analyzed_at")?,
            analysis_version: row.try_get("analysis_version")?,
            last_error: row.try_get("last_error")?,
            attempts: row.try_get::<i64, _>("attempts")?.max(0) as u32,
            updated_at: timestamp("updated_at")?,
        })
    }
}

const ANALYSIS_COLUMNS: &str = "proposal_id, stage, text_source, summary, summarized_at, is_trivial, \
     trivial_reason, filtered_at, scope_impact, sdg_alignment, innovation_efficiency, \
     fiscal_sustainability, burden_penalty, par_final, sdg_goals, analysis_notes, analyzed_at, \
     analysis_version, last_error, attempts, updated_at";

/// Load the analysis row of a proposal
pub async fn load_analysis(pool: &SqlitePool, proposal_id: i64) -> Result<Option<AnalysisRecord>> {
    let sql = format!("SELECT {} FROM proposal_analyses WHERE proposal_id = ?", ANALYSIS_COLUMNS);
    let row = sqlx::query(&sql).bind(proposal_id).fetch_optional(pool).await?;

    row.map(|r| AnalysisRecord::from_row(&r)).transpose()
}

/// Upsert the whole record keyed by proposal id
///
/// Stamps `updated_at`. Re-saving the same record leaves exactly one row.
pub async fn save_checkpoint(pool: &SqlitePool, record: &mut AnalysisRecord, max_wait_ms: u64) -> Result<()> {
    let now = kritikos_common::time::now();
    record.updated_at = Some(now);

    // Prepare all values before touching the database
    let stage = record.stage.as_str();
    let summarized_at = record.summarized_at.map(to_db_timestamp);
    let filtered_at = record.filtered_at.map(to_db_timestamp);
    let analyzed_at = record.analyzed_at.map(to_db_timestamp);
    let updated_at = to_db_timestamp(now);
    let is_trivial = record.is_trivial.map(i64::from);
    let par = record.par.as_ref();
    let sdg_goals = par.map(|p| serde_json::to_string(&p.sdg_goals)).transpose()?;
    let attempts = i64::from(record.attempts);
    let record = &*record;

    retry_on_lock("save_analysis_checkpoint", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO proposal_analyses (
                proposal_id, stage, text_source, summary, summarized_at,
                is_trivial, trivial_reason, filtered_at,
                scope_impact, sdg_alignment, innovation_efficiency,
                fiscal_sustainability, burden_penalty, par_final, sdg_goals,
                analysis_notes, analyzed_at, analysis_version, last_error,
                attempts, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(proposal_id) DO UPDATE SET
                stage = excluded.stage,
                text_source = excluded.text_source,
                summary = excluded.summary,
                summarized_at = excluded.summarized_at,
                is_trivial = excluded.is_trivial,
                trivial_reason = excluded.trivial_reason,
                filtered_at = excluded.filtered_at,
                scope_impact = excluded.scope_impact,
                sdg_alignment = excluded.sdg_alignment,
                innovation_efficiency = excluded.innovation_efficiency,
                fiscal_sustainability = excluded.fiscal_sustainability,
                burden_penalty = excluded.burden_penalty,
                par_final = excluded.par_final,
                sdg_goals = excluded.sdg_goals,
                analysis_notes = excluded.analysis_notes,
                analyzed_at = excluded.analyzed_at,
                analysis_version = excluded.analysis_version,
                last_error = excluded.last_error,
                attempts = excluded.attempts,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.proposal_id)
        .bind(stage)
        .bind(&record.text_source)
        .bind(&record.summary)
        .bind(&summarized_at)
        .bind(is_trivial)
        .bind(&record.trivial_reason)
        .bind(&filtered_at)
        .bind(par.map(|p| p.scope_impact))
        .bind(par.map(|p| p.sdg_alignment))
        .bind(par.map(|p| p.innovation_efficiency))
        .bind(par.map(|p| p.fiscal_sustainability))
        .bind(par.map(|p| p.burden_penalty))
        .bind(par.map(|p| p.par_final))
        .bind(&sdg_goals)
        .bind(par.map(|p| p.notes.as_str()))
        .bind(&analyzed_at)
        .bind(&record.analysis_version)
        .bind(&record.last_error)
        .bind(attempts)
        .bind(&updated_at)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use kritikos_common::db::{upsert_proposal, Proposal};

    async fn setup() -> (SqlitePool, i64) {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let id = upsert_proposal(
            &pool,
            &Proposal {
                id: 0,
                camara_id: 2_345_678,
                kind: "PL".to_string(),
                number: Some(1),
                year: Some(2025),
                summary_line: None,
                explanation: None,
                presented_at: None,
                full_text_url: None,
                storage_url: None,
            },
        )
        .await
        .unwrap();
        (pool, id)
    }

    #[tokio::test]
    async fn test_missing_analysis_is_none() {
        let (pool, id) = setup().await;
        assert!(load_analysis(&pool, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_upsert_keeps_single_row() {
        let (pool, id) = setup().await;

        let mut record = AnalysisRecord::new(id, "1.0");
        record.stage = AnalysisStage::Summarized;
        record.summary = Some("Resumo".to_string());
        record.summarized_at = Some(kritikos_common::time::now());
        save_checkpoint(&pool, &mut record, 1000).await.unwrap();

        record.stage = AnalysisStage::Scored;
        record.is_trivial = Some(false);
        record.par = Some(ParScore {
            scope_impact: 20.0,
            sdg_alignment: 15.0,
            innovation_efficiency: 10.0,
            fiscal_sustainability: 8.0,
            burden_penalty: 3.0,
            par_final: 50.0,
            sdg_goals: vec![3, 4],
            notes: "ok".to_string(),
        });
        save_checkpoint(&pool, &mut record, 1000).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM proposal_analyses WHERE proposal_id = ?")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let loaded = load_analysis(&pool, id).await.unwrap().unwrap();
        assert_eq!(loaded.stage, AnalysisStage::Scored);
        assert_eq!(loaded.summary.as_deref(), Some("Resumo"));
        assert_eq!(loaded.is_trivial, Some(false));
        assert_eq!(loaded.par.as_ref().map(|p| p.sdg_goals.clone()), Some(vec![3, 4]));
        assert_eq!(loaded.par.as_ref().map(|p| p.par_final), Some(50.0));
        assert!(loaded.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_is_current() {
        let now = kritikos_common::time::now();
        let mut record = AnalysisRecord::new(1, "1.0");
        record.stage = AnalysisStage::Persisted;
        record.analyzed_at = Some(now);

        let cutoff = now - chrono::Duration::days(7);
        assert!(record.is_current("1.0", cutoff));
        assert!(!record.is_current("2.0", cutoff), "older version");
        assert!(!record.is_current("1.0", now + chrono::Duration::days(1)), "stale");

        record.stage = AnalysisStage::Failed;
        assert!(!record.is_current("1.0", cutoff));
    }
}

//! IDP recomputation over the database
//!
//! Loads every legislator with authored proposals, scores them with the
//! chosen methodology and upserts one row per (legislator, methodology).
//! Rows of that methodology the recomputation did not write are removed.
//! A failure on one legislator is logged and counted; the rest continue.

use kritikos_common::events::{EventBus, KritikosEvent};
use kritikos_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::time::Instant;

use super::{LegislatorFacts, Methodology, ProposalFacts, ScoringContext};
use crate::db::processing_log::{self, LogEntry, LogStatus, ProcessKind};
use crate::db::scores::{prune_scores, upsert_score, LegislatorScore};

/// Recomputation options
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecomputeOptions {
    pub methodology: Methodology,
    /// Only count proposals, expenses and earmarks of this year
    pub reference_year: Option<i64>,
}

/// Outcome of a recomputation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecomputeSummary {
    pub methodology_version: String,
    pub reference_year: Option<i64>,
    pub legislators: usize,
    pub updated: usize,
    pub failures: usize,
    /// Rows from earlier recomputations that were removed
    pub pruned: u64,
    pub duration_seconds: f64,
}

/// Load the scoring inputs of every legislator with authored proposals
pub async fn load_facts(pool: &SqlitePool, reference_year: Option<i64>) -> Result<Vec<LegislatorFacts>> {
    let rows: Vec<(i64, String, Option<String>, Option<i64>, Option<f64>, Option<f64>, Option<f64>)> =
        sqlx::query_as(
            r#"
            SELECT au.legislator_id, p.kind, substr(p.presented_at, 1, 7),
                   a.is_trivial, a.par_final, a.fiscal_sustainability, a.burden_penalty
            FROM authorships au
            JOIN proposals p ON p.id = au.proposal_id
            LEFT JOIN proposal_analyses a ON a.proposal_id = p.id AND a.stage = 'PERSISTED'
            WHERE ?1 IS NULL OR p.year = ?1
            ORDER BY au.legislator_id
            "#,
        )
        .bind(reference_year)
        .fetch_all(pool)
        .await?;

    let mut facts: BTreeMap<i64, LegislatorFacts> = BTreeMap::new();
    for (legislator_id, kind, presented_month, is_trivial, par_final, fiscal, penalty) in rows {
        facts
            .entry(legislator_id)
            .or_insert_with(|| LegislatorFacts {
                legislator_id,
                ..Default::default()
            })
            .proposals
            .push(ProposalFacts {
                kind,
                presented_month: presented_month.filter(|m| m.len() == 7),
                is_trivial: is_trivial.map(|v| v != 0),
                par_final,
                fiscal_sustainability: fiscal,
                burden_penalty: penalty,
            });
    }

    let expenses: Vec<(i64, f64)> = sqlx::query_as(
        r#"
        SELECT legislator_id, COALESCE(SUM(net_value), 0.0)
        FROM expenses
        WHERE ?1 IS NULL OR year = ?1
        GROUP BY legislator_id
        "#,
    )
    .bind(reference_year)
    .fetch_all(pool)
    .await?;
    for (legislator_id, total) in expenses {
        if let Some(f) = facts.get_mut(&legislator_id) {
            f.total_expenses = total;
        }
    }

    let earmarks: Vec<(i64, f64, f64)> = sqlx::query_as(
        r#"
        SELECT legislator_id, COALESCE(SUM(committed_value), 0.0), COALESCE(SUM(paid_value), 0.0)
        FROM earmarks
        WHERE ?1 IS NULL OR year = ?1
        GROUP BY legislator_id
        "#,
    )
    .bind(reference_year)
    .fetch_all(pool)
    .await?;
    for (legislator_id, committed, paid) in earmarks {
        if let Some(f) = facts.get_mut(&legislator_id) {
            f.earmarks_committed = committed;
            f.earmarks_paid = paid;
        }
    }

    Ok(facts.into_values().collect())
}

/// Score one legislator (no I/O)
pub fn build_score(
    facts: &LegislatorFacts,
    context: &ScoringContext,
    options: &RecomputeOptions,
) -> LegislatorScore {
    LegislatorScore {
        legislator_id: facts.legislator_id,
        methodology_version: options.methodology.version().to_string(),
        reference_year: options.reference_year,
        scores: options.methodology.score(facts, context),
        total_proposals: facts.proposals.len() as i64,
        analyzed_proposals: facts.analyzed_count() as i64,
        trivial_proposals: facts.trivial_count() as i64,
        relevant_proposals: facts.relevant_count() as i64,
        total_expenses: facts.total_expenses,
        earmarks_committed: facts.earmarks_committed,
        earmarks_paid: facts.earmarks_paid,
        computed_at: kritikos_common::time::now(),
    }
}

/// Recompute and store every legislator's index
pub async fn recompute_all(
    pool: &SqlitePool,
    options: RecomputeOptions,
    max_wait_ms: u64,
    event_bus: Option<&EventBus>,
) -> Result<RecomputeSummary> {
    let start = Instant::now();
    let facts = load_facts(pool, options.reference_year).await?;
    let context = ScoringContext::from_facts(&facts);

    tracing::info!(
        methodology = options.methodology.version(),
        reference_year = ?options.reference_year,
        legislators = facts.len(),
        "Recomputing IDP"
    );

    let mut updated = 0;
    let mut failures = 0;
    let mut scored_ids = Vec::with_capacity(facts.len());

    for legislator in &facts {
        let started_at = kritikos_common::time::now();
        let score = build_score(legislator, &context, &options);

        let mut entry = match upsert_score(pool, &score, max_wait_ms).await {
            Ok(()) => {
                updated += 1;
                scored_ids.push(legislator.legislator_id);
                tracing::debug!(
                    legislator_id = legislator.legislator_id,
                    final_score = score.scores.final_score,
                    "IDP stored"
                );
                LogEntry::finished(ProcessKind::Score, LogStatus::Success, started_at).output(serde_json::json!({
                    "methodology_version": score.methodology_version,
                    "final_score": score.scores.final_score,
                }))
            }
            Err(e) => {
                failures += 1;
                tracing::error!(legislator_id = legislator.legislator_id, error = %e, "IDP store failed");
                LogEntry::finished(ProcessKind::Score, LogStatus::Error, started_at).message(e.to_string())
            }
        };

        entry.legislator_id = Some(legislator.legislator_id);
        if let Err(e) = processing_log::record(pool, &entry, max_wait_ms).await {
            tracing::warn!(legislator_id = legislator.legislator_id, error = %e, "Failed to record score log");
        }
    }

    let pruned = prune_scores(pool, options.methodology.version(), &scored_ids, max_wait_ms).await?;

    let summary = RecomputeSummary {
        methodology_version: options.methodology.version().to_string(),
        reference_year: options.reference_year,
        legislators: facts.len(),
        updated,
        failures,
        pruned,
        duration_seconds: start.elapsed().as_secs_f64(),
    };

    tracing::info!(
        legislators = summary.legislators,
        updated = summary.updated,
        failures = summary.failures,
        pruned = summary.pruned,
        "IDP recomputation finished"
    );

    if let Some(bus) = event_bus {
        bus.emit_lossy(KritikosEvent::IdpRecomputed {
            methodology_version: summary.methodology_version.clone(),
            legislators: summary.legislators,
            failures: summary.failures,
            timestamp: kritikos_common::time::now(),
        });
    }

    Ok(summary)
}

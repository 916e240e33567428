//! Per-proposal analysis pipeline
//!
//! Runs one proposal through fetch → summarize → filter → PAR → persist.
//!
//! # State machine
//! - Every completed stage upserts the `proposal_analyses` row, so a crashed
//!   or failed item resumes from its last checkpoint on the next run.
//! - Trivial proposals skip the PAR stage and persist straight after the
//!   filter.
//! - Proposals without usable text end in SKIPPED.
//!
//! # Error Handling
//! - A failing stage marks the row FAILED, stores the error and bumps
//!   `attempts`; the caller gets an [`ItemOutcome`] instead of an error so a
//!   batch keeps going.
//! - Audit log writes never fail an item.

use chrono::{DateTime, Utc};
use kritikos_common::db::Proposal;
use kritikos_common::events::{EventBus, KritikosEvent};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

use crate::config::PipelineSettings;
use crate::db::analyses::{load_analysis, save_checkpoint, AnalysisRecord};
use crate::db::processing_log::{self, LogEntry, LogStatus, ProcessKind};
use crate::llm::{LlmClient, LlmError};
use crate::models::AnalysisStage;
use crate::services::{
    FetchError, FetchOutcome, FetchedText, ParAnalyzer, ProposalFetcher, Summarizer, TrivialityFilter,
};

/// Stage failures
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("{stage} stage failed: {source}")]
    Llm {
        stage: AnalysisStage,
        #[source]
        source: LlmError,
    },

    #[error("Database error at {stage}: {source}")]
    Database {
        stage: AnalysisStage,
        #[source]
        source: kritikos_common::Error,
    },

    #[error("Illegal stage transition {from} -> {to}")]
    InvalidTransition { from: AnalysisStage, to: AnalysisStage },

    #[error("No bill text in hand at {0}")]
    MissingText(AnalysisStage),
}

impl PipelineError {
    /// Stage that was being executed
    pub fn stage(&self) -> AnalysisStage {
        match self {
            PipelineError::Fetch(_) => AnalysisStage::Fetched,
            PipelineError::Llm { stage, .. } | PipelineError::Database { stage, .. } => *stage,
            PipelineError::InvalidTransition { to, .. } => *to,
            PipelineError::MissingText(stage) => *stage,
        }
    }

    /// Audit log kind of the failing stage
    pub fn process_kind(&self) -> ProcessKind {
        process_kind_for(self.stage())
    }
}

fn process_kind_for(stage: AnalysisStage) -> ProcessKind {
    match stage {
        AnalysisStage::Summarized => ProcessKind::Summary,
        AnalysisStage::Filtered => ProcessKind::Filter,
        AnalysisStage::Scored => ProcessKind::Par,
        AnalysisStage::Persisted => ProcessKind::Persist,
        _ => ProcessKind::Fetch,
    }
}

/// Result of running one proposal
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcome {
    pub proposal_id: i64,
    /// Stage the row ended in (PERSISTED, SKIPPED or FAILED)
    pub stage: AnalysisStage,
    pub is_trivial: Option<bool>,
    pub par_final: Option<f64>,
    pub error: Option<String>,
    pub failed_stage: Option<AnalysisStage>,
    pub duration: Duration,
}

impl ItemOutcome {
    fn from_record(record: &AnalysisRecord, duration: Duration) -> Self {
        Self {
            proposal_id: record.proposal_id,
            stage: record.stage,
            is_trivial: record.is_trivial,
            par_final: record.par.as_ref().map(|p| p.par_final),
            error: None,
            failed_stage: None,
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.stage == AnalysisStage::Persisted
    }
}

/// Stage a resumed row restarts from
///
/// Checkpoints are trusted only in order: a PAR score without a triviality
/// verdict is not reused.
pub fn resume_stage(record: &AnalysisRecord) -> AnalysisStage {
    match (&record.summary, record.is_trivial, &record.par) {
        (Some(_), Some(false), Some(_)) => AnalysisStage::Scored,
        (Some(_), Some(_), _) => AnalysisStage::Filtered,
        (Some(_), None, _) => AnalysisStage::Summarized,
        _ => AnalysisStage::Pending,
    }
}

/// Item context shared by the stage methods
struct ItemContext<'a> {
    proposal: &'a Proposal,
    run_id: Option<Uuid>,
}

/// Analysis pipeline for single proposals
pub struct AnalysisPipeline {
    pool: SqlitePool,
    fetcher: Arc<ProposalFetcher>,
    summarizer: Summarizer,
    filter: TrivialityFilter,
    analyzer: ParAnalyzer,
    settings: PipelineSettings,
    model_name: String,
    event_bus: Option<EventBus>,
}

impl AnalysisPipeline {
    pub fn new(
        pool: SqlitePool,
        llm: Arc<dyn LlmClient>,
        fetcher: Arc<ProposalFetcher>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            pool,
            fetcher,
            summarizer: Summarizer::new(Arc::clone(&llm), settings.max_input_chars),
            filter: TrivialityFilter::new(Arc::clone(&llm)),
            analyzer: ParAnalyzer::new(Arc::clone(&llm)),
            settings,
            model_name: llm.model_name().to_string(),
            event_bus: None,
        }
    }

    /// Announce item outcomes on `event_bus`
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.event_bus.as_ref()
    }

    /// Analyze one proposal
    ///
    /// A current analysis (same version, newer than `reanalysis_days`) is
    /// returned untouched unless `force` is set. `force` also discards any
    /// checkpoint and starts from scratch.
    pub async fn process(&self, proposal: &Proposal, run_id: Option<Uuid>, force: bool) -> ItemOutcome {
        let start = Instant::now();
        let ctx = ItemContext { proposal, run_id };

        let existing = match load_analysis(&self.pool, proposal.id).await {
            Ok(existing) => existing,
            Err(e) => {
                let err = PipelineError::Database {
                    stage: AnalysisStage::Pending,
                    source: e,
                };
                tracing::error!(proposal_id = proposal.id, error = %err, "Failed to load analysis checkpoint");
                let outcome = ItemOutcome {
                    proposal_id: proposal.id,
                    stage: AnalysisStage::Failed,
                    is_trivial: None,
                    par_final: None,
                    error: Some(err.to_string()),
                    failed_stage: Some(err.stage()),
                    duration: start.elapsed(),
                };
                self.emit_outcome(&outcome, run_id);
                return outcome;
            }
        };

        let version = self.settings.analysis_version.as_str();
        let cutoff = Utc::now() - chrono::Duration::days(self.settings.reanalysis_days);

        let mut record = match existing {
            Some(current) if !force && current.is_current(version, cutoff) => {
                tracing::info!(proposal_id = proposal.id, "Analysis is current, nothing to do");
                return ItemOutcome::from_record(&current, start.elapsed());
            }
            Some(mut previous)
                if !force
                    && previous.analysis_version == version
                    && !matches!(previous.stage, AnalysisStage::Persisted | AnalysisStage::Skipped)
                    && !(previous.stage == AnalysisStage::Failed
                        && previous.attempts >= self.settings.max_item_attempts) =>
            {
                previous.stage = resume_stage(&previous);
                tracing::info!(
                    proposal_id = proposal.id,
                    stage = %previous.stage,
                    attempts = previous.attempts,
                    "Resuming analysis from checkpoint"
                );
                previous
            }
            _ => AnalysisRecord::new(proposal.id, version),
        };

        let result = self.run_stages(&ctx, &mut record).await;

        let mut outcome = ItemOutcome::from_record(&record, Duration::ZERO);
        if let Err(err) = result {
            let failed_stage = err.stage();
            tracing::error!(
                proposal_id = proposal.id,
                stage = %failed_stage,
                error = %err,
                "Proposal analysis failed"
            );

            record.stage = AnalysisStage::Failed;
            record.last_error = Some(err.to_string());
            record.attempts += 1;
            if let Err(e) = save_checkpoint(&self.pool, &mut record, self.settings.max_lock_wait_ms).await {
                tracing::error!(proposal_id = proposal.id, error = %e, "Failed to record FAILED stage");
            }

            outcome = ItemOutcome::from_record(&record, Duration::ZERO);
            outcome.error = Some(err.to_string());
            outcome.failed_stage = Some(failed_stage);
        } else {
            tracing::info!(
                proposal_id = proposal.id,
                stage = %record.stage,
                is_trivial = ?record.is_trivial,
                par_final = ?outcome.par_final,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Proposal analysis finished"
            );
        }

        outcome.duration = start.elapsed();
        self.emit_outcome(&outcome, run_id);
        outcome
    }

    /// Drive the record to PERSISTED or SKIPPED
    async fn run_stages(&self, ctx: &ItemContext<'_>, record: &mut AnalysisRecord) -> Result<(), PipelineError> {
        let mut text: Option<FetchedText> = None;

        loop {
            match record.stage {
                AnalysisStage::Pending => {
                    text = self.fetch_stage(ctx, record).await?;
                }
                AnalysisStage::Fetched => {
                    let fetched = text.take().ok_or(PipelineError::MissingText(AnalysisStage::Summarized))?;
                    self.summarize_stage(ctx, record, &fetched).await?;
                }
                AnalysisStage::Summarized => self.filter_stage(ctx, record).await?,
                AnalysisStage::Filtered if record.is_trivial == Some(true) => self.persist_stage(ctx, record).await?,
                AnalysisStage::Filtered => self.par_stage(ctx, record).await?,
                AnalysisStage::Scored => self.persist_stage(ctx, record).await?,
                AnalysisStage::Persisted | AnalysisStage::Skipped | AnalysisStage::Failed => return Ok(()),
            }
        }
    }

    /// Retrieve the bill text; `None` when the proposal was skipped
    async fn fetch_stage(
        &self,
        ctx: &ItemContext<'_>,
        record: &mut AnalysisRecord,
    ) -> Result<Option<FetchedText>, PipelineError> {
        let started_at = kritikos_common::time::now();
        let input = json!({
            "camara_id": ctx.proposal.camara_id,
            "label": ctx.proposal.label(),
        });

        let outcome = match self.fetcher.fetch(ctx.proposal).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.audit(
                    self.entry(ProcessKind::Fetch, LogStatus::Error, started_at, ctx)
                        .input(input)
                        .message(e.to_string()),
                )
                .await;
                return Err(PipelineError::Fetch(e));
            }
        };

        match outcome {
            FetchOutcome::Found(fetched) => {
                advance(record, AnalysisStage::Fetched)?;
                record.text_source = Some(fetched.source.clone());
                self.audit(
                    self.entry(ProcessKind::Fetch, LogStatus::Success, started_at, ctx)
                        .input(input)
                        .output(json!({
                            "source": fetched.source,
                            "chars": fetched.char_count(),
                            "is_fallback": fetched.is_fallback,
                        })),
                )
                .await;
                Ok(Some(fetched))
            }
            FetchOutcome::TooShort { chars } => {
                tracing::info!(proposal_id = ctx.proposal.id, chars, "No usable text, skipping proposal");
                advance(record, AnalysisStage::Skipped)?;
                self.checkpoint(record, AnalysisStage::Skipped).await?;
                self.audit(
                    self.entry(ProcessKind::Fetch, LogStatus::Skipped, started_at, ctx)
                        .input(input)
                        .message(format!("text too short ({} chars)", chars)),
                )
                .await;
                Ok(None)
            }
        }
    }

    async fn summarize_stage(
        &self,
        ctx: &ItemContext<'_>,
        record: &mut AnalysisRecord,
        fetched: &FetchedText,
    ) -> Result<(), PipelineError> {
        let started_at = kritikos_common::time::now();
        let input = json!({
            "source": fetched.source,
            "chars": fetched.char_count(),
        });

        let summary = match self.summarizer.summarize(ctx.proposal, &fetched.text).await {
            Ok(summary) => summary,
            Err(e) => {
                self.audit(
                    self.entry(ProcessKind::Summary, LogStatus::Error, started_at, ctx)
                        .input(input)
                        .message(e.to_string()),
                )
                .await;
                return Err(PipelineError::Llm {
                    stage: AnalysisStage::Summarized,
                    source: e,
                });
            }
        };

        advance(record, AnalysisStage::Summarized)?;
        let words = summary.split_whitespace().count();
        record.summary = Some(summary);
        record.summarized_at = Some(kritikos_common::time::now());
        self.checkpoint(record, AnalysisStage::Summarized).await?;

        self.audit(
            self.entry(ProcessKind::Summary, LogStatus::Success, started_at, ctx)
                .input(input)
                .output(json!({ "words": words, "model": self.model_name })),
        )
        .await;
        Ok(())
    }

    async fn filter_stage(&self, ctx: &ItemContext<'_>, record: &mut AnalysisRecord) -> Result<(), PipelineError> {
        let started_at = kritikos_common::time::now();
        let summary = record
            .summary
            .clone()
            .ok_or(PipelineError::MissingText(AnalysisStage::Filtered))?;
        let input = json!({ "summary_chars": summary.chars().count() });

        let verdict = match self.filter.classify(ctx.proposal, &summary).await {
            Ok(verdict) => verdict,
            Err(e) => {
                self.audit(
                    self.entry(ProcessKind::Filter, LogStatus::Error, started_at, ctx)
                        .input(input)
                        .message(e.to_string()),
                )
                .await;
                return Err(PipelineError::Llm {
                    stage: AnalysisStage::Filtered,
                    source: e,
                });
            }
        };

        advance(record, AnalysisStage::Filtered)?;
        record.is_trivial = Some(verdict.is_trivial);
        record.trivial_reason = Some(verdict.reason.clone());
        record.filtered_at = Some(kritikos_common::time::now());
        // A new verdict invalidates any earlier score
        record.par = None;
        self.checkpoint(record, AnalysisStage::Filtered).await?;

        let output = serde_json::to_value(&verdict).unwrap_or_default();
        self.audit(
            self.entry(ProcessKind::Filter, LogStatus::Success, started_at, ctx)
                .input(input)
                .output(output),
        )
        .await;
        Ok(())
    }

    async fn par_stage(&self, ctx: &ItemContext<'_>, record: &mut AnalysisRecord) -> Result<(), PipelineError> {
        let started_at = kritikos_common::time::now();
        let summary = record
            .summary
            .clone()
            .ok_or(PipelineError::MissingText(AnalysisStage::Scored))?;
        let input = json!({ "summary_chars": summary.chars().count() });

        let score = match self.analyzer.analyze(ctx.proposal, &summary).await {
            Ok(score) => score,
            Err(e) => {
                self.audit(
                    self.entry(ProcessKind::Par, LogStatus::Error, started_at, ctx)
                        .input(input)
                        .message(e.to_string()),
                )
                .await;
                return Err(PipelineError::Llm {
                    stage: AnalysisStage::Scored,
                    source: e,
                });
            }
        };

        advance(record, AnalysisStage::Scored)?;
        let mut output = serde_json::to_value(&score).unwrap_or_default();
        if let Some(map) = output.as_object_mut() {
            map.insert("model".to_string(), json!(self.model_name));
        }
        record.par = Some(score);
        self.checkpoint(record, AnalysisStage::Scored).await?;

        self.audit(
            self.entry(ProcessKind::Par, LogStatus::Success, started_at, ctx)
                .input(input)
                .output(output),
        )
        .await;
        Ok(())
    }

    async fn persist_stage(&self, ctx: &ItemContext<'_>, record: &mut AnalysisRecord) -> Result<(), PipelineError> {
        let started_at = kritikos_common::time::now();

        advance(record, AnalysisStage::Persisted)?;
        record.analyzed_at = Some(kritikos_common::time::now());
        record.analysis_version = self.settings.analysis_version.clone();
        record.last_error = None;

        if let Err(e) = save_checkpoint(&self.pool, record, self.settings.max_lock_wait_ms).await {
            self.audit(
                self.entry(ProcessKind::Persist, LogStatus::Error, started_at, ctx)
                    .message(e.to_string()),
            )
            .await;
            return Err(PipelineError::Database {
                stage: AnalysisStage::Persisted,
                source: e,
            });
        }

        self.audit(
            self.entry(ProcessKind::Persist, LogStatus::Success, started_at, ctx)
                .output(json!({
                    "is_trivial": record.is_trivial,
                    "par_final": record.par.as_ref().map(|p| p.par_final),
                    "analysis_version": record.analysis_version,
                })),
        )
        .await;
        Ok(())
    }

    async fn checkpoint(&self, record: &mut AnalysisRecord, stage: AnalysisStage) -> Result<(), PipelineError> {
        save_checkpoint(&self.pool, record, self.settings.max_lock_wait_ms)
            .await
            .map_err(|source| PipelineError::Database { stage, source })
    }

    fn entry(&self, kind: ProcessKind, status: LogStatus, started_at: DateTime<Utc>, ctx: &ItemContext<'_>) -> LogEntry {
        LogEntry::finished(kind, status, started_at)
            .proposal(ctx.proposal.id)
            .run(ctx.run_id)
    }

    /// Write an audit row when logging is enabled
    async fn audit(&self, entry: LogEntry) {
        if !self.settings.save_logs {
            return;
        }
        if let Err(e) = processing_log::record(&self.pool, &entry, self.settings.max_lock_wait_ms).await {
            tracing::warn!(
                proposal_id = ?entry.proposal_id,
                kind = entry.kind.as_str(),
                error = %e,
                "Failed to record processing log"
            );
        }
    }

    fn emit_outcome(&self, outcome: &ItemOutcome, run_id: Option<Uuid>) {
        let Some(bus) = &self.event_bus else {
            return;
        };

        let event = match (&outcome.error, outcome.failed_stage) {
            (Some(error), Some(stage)) => KritikosEvent::AnalysisItemFailed {
                run_id,
                proposal_id: outcome.proposal_id,
                stage: stage.to_string(),
                error: error.clone(),
                timestamp: kritikos_common::time::now(),
            },
            _ => KritikosEvent::AnalysisItemCompleted {
                run_id,
                proposal_id: outcome.proposal_id,
                stage: outcome.stage.to_string(),
                is_trivial: outcome.is_trivial,
                par_final: outcome.par_final,
                duration_ms: outcome.duration.as_millis() as u64,
                timestamp: kritikos_common::time::now(),
            },
        };
        bus.emit_lossy(event);
    }
}

fn advance(record: &mut AnalysisRecord, next: AnalysisStage) -> Result<(), PipelineError> {
    if !record.stage.can_transition_to(next) {
        return Err(PipelineError::InvalidTransition {
            from: record.stage,
            to: next,
        });
    }
    tracing::debug!(
        proposal_id = record.proposal_id,
        from = %record.stage,
        to = %next,
        "Stage transition"
    );
    record.stage = next;
    Ok(())
}

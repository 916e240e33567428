//! Batch driver
//!
//! Selects proposals needing analysis in lots of `lot_size`, runs the
//! pipeline on each with `item_delay` between items, and in continuous mode
//! keeps taking lots (pausing `lot_pause` in between) until no work remains,
//! `max_lots` is reached or the run is cancelled.
//!
//! The run record is saved at start, after every lot and at the end, so the
//! status endpoint always shows current statistics.

use kritikos_common::db::load_proposal;
use kritikos_common::events::KritikosEvent;
use kritikos_common::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::pipeline::{AnalysisPipeline, ItemOutcome};
use super::statistics::LotStatistics;
use crate::db::proposals::{select_lot, SelectionCriteria};
use crate::db::runs::save_run;
use crate::models::{AnalysisRun, AnalysisStage, RunState};

/// Result of one lot
struct LotResult {
    statistics: LotStatistics,
    par_values: Vec<f64>,
    cancelled: bool,
}

pub struct BatchDriver {
    pipeline: Arc<AnalysisPipeline>,
}

impl BatchDriver {
    pub fn new(pipeline: Arc<AnalysisPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<AnalysisPipeline> {
        &self.pipeline
    }

    /// Selection criteria from the pipeline settings
    pub fn criteria(&self) -> SelectionCriteria {
        let settings = self.pipeline.settings();
        SelectionCriteria {
            analysis_version: settings.analysis_version.clone(),
            reanalysis_days: settings.reanalysis_days,
            max_item_attempts: settings.max_item_attempts,
        }
    }

    /// Execute a run to a terminal state
    ///
    /// Never returns an error: selection failures end the run in FAILED with
    /// `last_error` set, item failures are counted in the statistics.
    pub async fn execute(&self, mut run: AnalysisRun, cancel_token: CancellationToken) -> AnalysisRun {
        let start = Instant::now();
        let settings = self.pipeline.settings();
        let pool = self.pipeline.pool();
        let criteria = self.criteria();
        let parameters = run.parameters.clone();

        tracing::info!(
            run_id = %run.run_id,
            lot_size = parameters.lot_size,
            max_lots = ?parameters.max_lots,
            continuous = parameters.continuous,
            analysis_version = %criteria.analysis_version,
            "Starting analysis run"
        );

        self.save(&run).await;
        self.emit(KritikosEvent::AnalysisRunStarted {
            run_id: run.run_id,
            lot_size: parameters.lot_size,
            continuous: parameters.continuous,
            timestamp: kritikos_common::time::now(),
        });

        let mut lot_number = 0;
        let final_state = loop {
            if cancel_token.is_cancelled() {
                break RunState::Cancelled;
            }
            if parameters.max_lots.is_some_and(|max| lot_number >= max) {
                tracing::info!(run_id = %run.run_id, lots = lot_number, "Lot limit reached");
                break RunState::Completed;
            }

            let proposals = match select_lot(pool, &criteria, parameters.lot_size).await {
                Ok(proposals) => proposals,
                Err(e) => {
                    tracing::error!(run_id = %run.run_id, error = %e, "Lot selection failed");
                    run.last_error = Some(e.to_string());
                    break RunState::Failed;
                }
            };
            if proposals.is_empty() {
                tracing::info!(run_id = %run.run_id, "No proposals need analysis");
                break RunState::Completed;
            }

            lot_number += 1;
            tracing::info!(
                run_id = %run.run_id,
                lot_number,
                selected = proposals.len(),
                "Processing lot"
            );

            let lot = self
                .run_lot(run.run_id, lot_number, &proposals, settings.item_delay, &cancel_token)
                .await;

            self.emit(KritikosEvent::AnalysisLotCompleted {
                run_id: run.run_id,
                lot_number,
                processed: lot.statistics.counters.attempted,
                errors: lot.statistics.counters.errors,
                timestamp: kritikos_common::time::now(),
            });
            tracing::info!(
                run_id = %run.run_id,
                lot_number,
                attempted = lot.statistics.counters.attempted,
                persisted = lot.statistics.counters.persisted,
                errors = lot.statistics.counters.errors,
                "Lot finished"
            );

            run.statistics.record_lot(lot.statistics, &lot.par_values);
            run.statistics.duration_seconds = start.elapsed().as_secs_f64();
            self.save(&run).await;

            if lot.cancelled {
                break RunState::Cancelled;
            }
            if !parameters.continuous {
                break RunState::Completed;
            }

            tokio::select! {
                _ = cancel_token.cancelled() => break RunState::Cancelled,
                _ = tokio::time::sleep(settings.lot_pause) => {}
            }
        };

        run.statistics.duration_seconds = start.elapsed().as_secs_f64();
        run.transition_to(final_state);
        self.save(&run).await;

        tracing::info!(
            run_id = %run.run_id,
            state = run.state.as_str(),
            "Analysis run finished: {}",
            run.statistics.display_string()
        );

        self.emit(KritikosEvent::AnalysisRunCompleted {
            run_id: run.run_id,
            state: run.state.as_str().to_string(),
            processed: run.statistics.counters.attempted,
            errors: run.statistics.counters.errors,
            duration_seconds: run.statistics.duration_seconds,
            timestamp: kritikos_common::time::now(),
        });

        run
    }

    async fn run_lot(
        &self,
        run_id: Uuid,
        lot_number: usize,
        proposals: &[kritikos_common::db::Proposal],
        item_delay: Duration,
        cancel_token: &CancellationToken,
    ) -> LotResult {
        let start = Instant::now();
        let mut result = LotResult {
            statistics: LotStatistics {
                lot_number,
                selected: proposals.len(),
                ..Default::default()
            },
            par_values: Vec::new(),
            cancelled: false,
        };

        for (index, proposal) in proposals.iter().enumerate() {
            if cancel_token.is_cancelled() {
                result.cancelled = true;
                break;
            }

            let outcome = self.pipeline.process(proposal, Some(run_id), false).await;
            record_outcome(&mut result, &outcome);

            if index + 1 < proposals.len() && !item_delay.is_zero() {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        result.cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(item_delay) => {}
                }
            }
        }

        result.statistics.duration_seconds = start.elapsed().as_secs_f64();
        result
    }

    /// Analyze one proposal on demand
    pub async fn analyze_one(&self, proposal_id: i64, force: bool) -> Result<ItemOutcome> {
        let proposal = load_proposal(self.pipeline.pool(), proposal_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("proposal {}", proposal_id)))?;

        Ok(self.pipeline.process(&proposal, None, force).await)
    }

    async fn save(&self, run: &AnalysisRun) {
        let max_wait_ms = self.pipeline.settings().max_lock_wait_ms;
        if let Err(e) = save_run(self.pipeline.pool(), run, max_wait_ms).await {
            tracing::warn!(run_id = %run.run_id, error = %e, "Failed to save run state");
        }
    }

    fn emit(&self, event: KritikosEvent) {
        if let Some(bus) = self.pipeline.event_bus() {
            bus.emit_lossy(event);
        }
    }
}

fn record_outcome(result: &mut LotResult, outcome: &ItemOutcome) {
    result.statistics.counters.record(outcome);
    if outcome.stage == AnalysisStage::Persisted {
        if let Some(par) = outcome.par_final {
            result.par_values.push(par);
        }
    }
}

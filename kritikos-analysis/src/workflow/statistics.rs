//! Run statistics
//!
//! Counters are kept per lot and for the whole run. The run record stores
//! them as JSON, so the status endpoint and the CLI summary read the same
//! numbers.

use serde::{Deserialize, Serialize};

use super::pipeline::ItemOutcome;
use crate::models::AnalysisStage;

/// Outcome counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemCounters {
    /// Items the pipeline was run on
    pub attempted: usize,
    /// Items that reached PERSISTED
    pub persisted: usize,
    pub errors: usize,
    /// Items without usable text
    pub skipped: usize,
    pub trivial: usize,
    /// Persisted and not trivial
    pub relevant: usize,
    /// Items with a PAR score
    pub scored: usize,
}

impl ItemCounters {
    pub fn record(&mut self, outcome: &ItemOutcome) {
        self.attempted += 1;
        match outcome.stage {
            AnalysisStage::Persisted => {
                self.persisted += 1;
                match outcome.is_trivial {
                    Some(true) => self.trivial += 1,
                    Some(false) => self.relevant += 1,
                    None => {}
                }
            }
            AnalysisStage::Skipped => self.skipped += 1,
            _ => self.errors += 1,
        }
        if outcome.par_final.is_some() {
            self.scored += 1;
        }
    }

    /// Persisted share of attempted items, in percent
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.persisted as f64 / self.attempted as f64 * 100.0
        }
    }

    fn add(&mut self, other: &ItemCounters) {
        self.attempted += other.attempted;
        self.persisted += other.persisted;
        self.errors += other.errors;
        self.skipped += other.skipped;
        self.trivial += other.trivial;
        self.relevant += other.relevant;
        self.scored += other.scored;
    }
}

/// PAR distribution of scored items
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParSummary {
    pub count: usize,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ParSummary {
    pub fn record(&mut self, par: f64) {
        self.count += 1;
        self.sum += par;
        self.min = Some(self.min.map_or(par, |m| m.min(par)));
        self.max = Some(self.max.map_or(par, |m| m.max(par)));
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// One lot of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LotStatistics {
    pub lot_number: usize,
    /// Proposals the selection query returned
    pub selected: usize,
    #[serde(flatten)]
    pub counters: ItemCounters,
    pub duration_seconds: f64,
}

/// Whole-run statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    #[serde(flatten)]
    pub counters: ItemCounters,
    pub par: ParSummary,
    pub lots: Vec<LotStatistics>,
    pub duration_seconds: f64,
}

impl RunStatistics {
    /// Fold a finished lot into the run totals
    pub fn record_lot(&mut self, lot: LotStatistics, par_values: &[f64]) {
        self.counters.add(&lot.counters);
        for par in par_values {
            self.par.record(*par);
        }
        self.lots.push(lot);
    }

    pub fn success_rate(&self) -> f64 {
        self.counters.success_rate()
    }

    pub fn average_seconds_per_item(&self) -> Option<f64> {
        (self.counters.attempted > 0)
            .then(|| self.duration_seconds / self.counters.attempted as f64)
    }

    /// One-line summary for logs and the CLI
    pub fn display_string(&self) -> String {
        format!(
            "{} lots, {} attempted: {} persisted ({} relevant, {} trivial), {} skipped, {} errors, {:.1}% success",
            self.lots.len(),
            self.counters.attempted,
            self.counters.persisted,
            self.counters.relevant,
            self.counters.trivial,
            self.counters.skipped,
            self.counters.errors,
            self.success_rate()
        )
    }
}

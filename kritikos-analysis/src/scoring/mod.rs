//! IDP (parliamentary performance index) methodology
//!
//! Pure functions from per-legislator facts to axis scores. Loading the
//! facts and storing the results is done by [`aggregator`].
//!
//! Methodology 1.0:
//! `IDP = performance·0.35 + relevance·0.30 + responsibility·0.20 + ethics·0.15`
//!
//! Methodology 2.0 drops the ethics axis and folds expenditure and earmark
//! execution into the fiscal axis:
//! `IDP = performance·0.40 + relevance·0.35 + fiscal·0.25`

pub mod aggregator;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::models::par_score::HIGH_QUALITY_PAR;

/// Score used for an axis with no data to judge
pub const NEUTRAL_SCORE: f64 = 50.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Methodology {
    #[default]
    #[serde(rename = "1.0")]
    V1,
    #[serde(rename = "2.0")]
    V2,
}

impl Methodology {
    pub fn version(&self) -> &'static str {
        match self {
            Methodology::V1 => "1.0",
            Methodology::V2 => "2.0",
        }
    }

    /// Score one legislator
    pub fn score(&self, facts: &LegislatorFacts, context: &ScoringContext) -> AxisScores {
        let performance = performance_score(&facts.proposals);
        let relevance = relevance_score(&facts.proposals);
        let responsibility = responsibility_score(&facts.proposals);

        match self {
            Methodology::V1 => {
                let ethics = ethics_score(&facts.proposals);
                let final_score =
                    performance * 0.35 + relevance * 0.30 + responsibility * 0.20 + ethics * 0.15;
                AxisScores {
                    performance: round2(performance),
                    relevance: round2(relevance),
                    responsibility: round2(responsibility),
                    ethics: Some(round2(ethics)),
                    final_score: round2(final_score),
                }
            }
            Methodology::V2 => {
                let fiscal = responsibility * 0.5
                    + expense_score(facts.total_expenses, context.mean_expenses) * 0.3
                    + earmark_execution_score(facts.earmarks_committed, facts.earmarks_paid) * 0.2;
                let final_score = performance * 0.40 + relevance * 0.35 + fiscal * 0.25;
                AxisScores {
                    performance: round2(performance),
                    relevance: round2(relevance),
                    responsibility: round2(fiscal),
                    ethics: None,
                    final_score: round2(final_score),
                }
            }
        }
    }
}

impl fmt::Display for Methodology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.version())
    }
}

impl FromStr for Methodology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.0" | "1" | "v1" => Ok(Methodology::V1),
            "2.0" | "2" | "v2" => Ok(Methodology::V2),
            other => Err(format!("unknown methodology version: {}", other)),
        }
    }
}

/// One authored proposal as seen by the index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProposalFacts {
    pub kind: String,
    /// "YYYY-MM" of presentation
    pub presented_month: Option<String>,
    /// None when there is no finished analysis
    pub is_trivial: Option<bool>,
    pub par_final: Option<f64>,
    pub fiscal_sustainability: Option<f64>,
    pub burden_penalty: Option<f64>,
}

impl ProposalFacts {
    fn is_relevant(&self) -> bool {
        self.is_trivial == Some(false)
    }
}

/// Everything the index needs about one legislator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegislatorFacts {
    pub legislator_id: i64,
    pub proposals: Vec<ProposalFacts>,
    /// Sum of net expense values
    pub total_expenses: f64,
    pub earmarks_committed: f64,
    pub earmarks_paid: f64,
}

impl LegislatorFacts {
    pub fn analyzed_count(&self) -> usize {
        self.proposals.iter().filter(|p| p.is_trivial.is_some()).count()
    }

    pub fn trivial_count(&self) -> usize {
        self.proposals.iter().filter(|p| p.is_trivial == Some(true)).count()
    }

    pub fn relevant_count(&self) -> usize {
        self.proposals.iter().filter(|p| p.is_relevant()).count()
    }
}

/// Population-level values some axes compare against
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoringContext {
    /// Mean total expenses over the scored legislators
    pub mean_expenses: f64,
}

impl ScoringContext {
    pub fn from_facts(all: &[LegislatorFacts]) -> Self {
        if all.is_empty() {
            return Self::default();
        }
        let total: f64 = all.iter().map(|f| f.total_expenses).sum();
        Self {
            mean_expenses: total / all.len() as f64,
        }
    }
}

/// Axis scores of one legislator, rounded to 2 decimals
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisScores {
    pub performance: f64,
    pub relevance: f64,
    /// Responsibility (1.0) or combined fiscal axis (2.0)
    pub responsibility: f64,
    pub ethics: Option<f64>,
    pub final_score: f64,
}

/// Legislative performance: volume, diversity and constancy (0-100)
pub fn performance_score(proposals: &[ProposalFacts]) -> f64 {
    if proposals.is_empty() {
        return 0.0;
    }

    let total = proposals.len() as f64;
    let kinds: HashSet<&str> = proposals.iter().map(|p| p.kind.as_str()).collect();
    let months: HashSet<&str> = proposals
        .iter()
        .filter_map(|p| p.presented_month.as_deref())
        .collect();

    let volume = (total / 50.0 * 40.0).min(40.0);
    let diversity = (kinds.len() as f64 / 5.0 * 30.0).min(30.0);
    let constancy = (months.len() as f64 / 6.0 * 30.0).min(30.0);

    (volume + diversity + constancy).min(100.0)
}

/// Social relevance: mean PAR of non-trivial analyzed proposals (0 when none)
pub fn relevance_score(proposals: &[ProposalFacts]) -> f64 {
    mean(
        proposals
            .iter()
            .filter(|p| p.is_relevant())
            .filter_map(|p| p.par_final),
    )
    .map(|m| m.min(100.0))
    .unwrap_or(0.0)
}

/// Fiscal responsibility: mean of max(fiscal − penalty, 0) over non-trivial proposals
pub fn responsibility_score(proposals: &[ProposalFacts]) -> f64 {
    mean(proposals.iter().filter(|p| p.is_relevant()).filter_map(|p| {
        p.fiscal_sustainability
            .map(|fiscal| (fiscal - p.burden_penalty.unwrap_or(0.0)).max(0.0))
    }))
    .map(|m| m.min(100.0))
    .unwrap_or(NEUTRAL_SCORE)
}

/// Ethics and legality: share of high-PAR proposals, minus a triviality penalty
pub fn ethics_score(proposals: &[ProposalFacts]) -> f64 {
    if proposals.is_empty() {
        return NEUTRAL_SCORE;
    }

    let total = proposals.len() as f64;
    let high_quality = proposals
        .iter()
        .filter(|p| p.par_final.is_some_and(|par| par >= HIGH_QUALITY_PAR))
        .count() as f64;
    let trivial = proposals.iter().filter(|p| p.is_trivial == Some(true)).count() as f64;

    let quality = high_quality / total * 60.0;
    let seriousness = (40.0 - trivial / total * 40.0).max(0.0);

    (quality + seriousness).min(100.0)
}

/// Spending restraint relative to the mean (0-100); neutral when nobody spent
pub fn expense_score(total_expenses: f64, mean_expenses: f64) -> f64 {
    if mean_expenses <= 0.0 {
        return NEUTRAL_SCORE;
    }
    (100.0 * (1.0 - total_expenses / (2.0 * mean_expenses))).clamp(0.0, 100.0)
}

/// Paid share of committed earmarks (0-100); neutral with nothing committed
pub fn earmark_execution_score(committed: f64, paid: f64) -> f64 {
    if committed <= 0.0 {
        return NEUTRAL_SCORE;
    }
    (100.0 * paid / committed).clamp(0.0, 100.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

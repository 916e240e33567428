//! PAR (public-interest relevance) score

use serde::{Deserialize, Serialize};

/// Upper bounds of the rubric's sub-scores
pub const SCOPE_IMPACT_MAX: f64 = 30.0;
pub const SDG_ALIGNMENT_MAX: f64 = 30.0;
pub const INNOVATION_EFFICIENCY_MAX: f64 = 20.0;
pub const FISCAL_SUSTAINABILITY_MAX: f64 = 20.0;
pub const BURDEN_PENALTY_MAX: f64 = 15.0;

/// Proposals at or above this PAR count as high quality for the ethics axis
pub const HIGH_QUALITY_PAR: f64 = 70.0;

/// Rubric result for one proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParScore {
    /// Breadth of the affected population (0-30)
    pub scope_impact: f64,
    /// Alignment with the UN Sustainable Development Goals (0-30)
    pub sdg_alignment: f64,
    /// Innovation and efficiency of the mechanism (0-20)
    pub innovation_efficiency: f64,
    /// Fiscal sustainability (0-20)
    pub fiscal_sustainability: f64,
    /// Penalty for unfunded burdens on the public budget (0-15)
    pub burden_penalty: f64,
    /// Final score (0-100)
    pub par_final: f64,
    /// SDG numbers (1-17) identified by the model
    pub sdg_goals: Vec<u8>,
    /// Short justification written by the model
    pub notes: String,
}

impl ParScore {
    /// Final score from the sub-scores: positives minus penalty, clamped to 0..=100
    pub fn compute_final(
        scope_impact: f64,
        sdg_alignment: f64,
        innovation_efficiency: f64,
        fiscal_sustainability: f64,
        burden_penalty: f64,
    ) -> f64 {
        let positive = scope_impact + sdg_alignment + innovation_efficiency + fiscal_sustainability;
        (positive - burden_penalty).clamp(0.0, 100.0)
    }
}

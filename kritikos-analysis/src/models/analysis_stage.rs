//! Per-proposal analysis state machine
//!
//! PENDING → FETCHED → SUMMARIZED → FILTERED → SCORED → PERSISTED
//!
//! Trivial proposals go FILTERED → PERSISTED. Any stage may end in FAILED;
//! proposals without usable text end in SKIPPED. A resumed item starts from
//! its last checkpoint (SUMMARIZED, FILTERED or SCORED).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalysisStage {
    /// Selected, nothing done yet
    Pending,
    /// Bill text retrieved (not checkpointed; text is not stored)
    Fetched,
    /// Summary produced
    Summarized,
    /// Triviality decided
    Filtered,
    /// PAR rubric applied
    Scored,
    /// Final row written with analysis timestamp and version
    Persisted,
    /// A stage failed; `last_error` says why
    Failed,
    /// No usable text
    Skipped,
}

impl AnalysisStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStage::Pending => "PENDING",
            AnalysisStage::Fetched => "FETCHED",
            AnalysisStage::Summarized => "SUMMARIZED",
            AnalysisStage::Filtered => "FILTERED",
            AnalysisStage::Scored => "SCORED",
            AnalysisStage::Persisted => "PERSISTED",
            AnalysisStage::Failed => "FAILED",
            AnalysisStage::Skipped => "SKIPPED",
        }
    }

    /// Stages that end processing of an item
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnalysisStage::Persisted | AnalysisStage::Failed | AnalysisStage::Skipped
        )
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(&self, next: AnalysisStage) -> bool {
        use AnalysisStage::*;
        match (self, next) {
            (_, Failed) => !self.is_terminal(),
            (Pending, Fetched) | (Fetched, Skipped) | (Pending, Skipped) => true,
            (Fetched, Summarized) => true,
            (Summarized, Filtered) => true,
            (Filtered, Scored) | (Filtered, Persisted) => true,
            (Scored, Persisted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(AnalysisStage::Pending),
            "FETCHED" => Ok(AnalysisStage::Fetched),
            "SUMMARIZED" => Ok(AnalysisStage::Summarized),
            "FILTERED" => Ok(AnalysisStage::Filtered),
            "SCORED" => Ok(AnalysisStage::Scored),
            "PERSISTED" => Ok(AnalysisStage::Persisted),
            "FAILED" => Ok(AnalysisStage::Failed),
            "SKIPPED" => Ok(AnalysisStage::Skipped),
            other => Err(format!("unknown analysis stage: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use AnalysisStage::*;
        let path = [Pending, Fetched, Summarized, Filtered, Scored, Persisted];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(Filtered.can_transition_to(Persisted), "trivial early exit");
    }

    #[test]
    fn test_terminal_stages_are_final() {
        use AnalysisStage::*;
        for terminal in [Persisted, Failed, Skipped] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Failed));
            assert!(!terminal.can_transition_to(Summarized));
        }
        assert!(!Summarized.can_transition_to(Persisted), "cannot skip the filter");
    }

    #[test]
    fn test_string_forms_match_serde() {
        for stage in [AnalysisStage::Pending, AnalysisStage::Scored, AnalysisStage::Skipped] {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage.as_str()));
            assert_eq!(stage.as_str().parse::<AnalysisStage>().unwrap(), stage);
        }
        assert!("DONE".parse::<AnalysisStage>().is_err());
    }
}

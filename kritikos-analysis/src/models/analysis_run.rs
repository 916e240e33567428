//! Batch analysis run
//!
//! RUNNING → COMPLETED | CANCELLED | FAILED

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::statistics::RunStatistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    Running,
    /// No work left, or the lot limit was reached
    Completed,
    Cancelled,
    /// The run itself broke (not a single item)
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "RUNNING",
            RunState::Completed => "COMPLETED",
            RunState::Cancelled => "CANCELLED",
            RunState::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RUNNING" => Some(RunState::Running),
            "COMPLETED" => Some(RunState::Completed),
            "CANCELLED" => Some(RunState::Cancelled),
            "FAILED" => Some(RunState::Failed),
            _ => None,
        }
    }
}

/// Parameters a run was started with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    /// Proposals per lot
    pub lot_size: usize,
    /// Stop after this many lots (None = until no work remains)
    pub max_lots: Option<usize>,
    /// Keep taking lots; false runs exactly one lot
    pub continuous: bool,
}

impl Default for RunParameters {
    fn default() -> Self {
        Self {
            lot_size: 10,
            max_lots: Some(5),
            continuous: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub run_id: Uuid,
    pub state: RunState,
    pub parameters: RunParameters,
    pub statistics: RunStatistics,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl AnalysisRun {
    pub fn new(parameters: RunParameters) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: RunState::Running,
            parameters,
            statistics: RunStatistics::default(),
            last_error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move to `new_state`, stamping the end time for terminal states
    pub fn transition_to(&mut self, new_state: RunState) {
        self.state = new_state;
        if self.is_terminal() && self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.state, RunState::Running)
    }
}

//! Data models for the analysis pipeline

pub mod analysis_run;
pub mod analysis_stage;
pub mod par_score;

pub use analysis_run::{AnalysisRun, RunParameters, RunState};
pub use analysis_stage::AnalysisStage;
pub use par_score::ParScore;

//! Analysis workflow
//!
//! - [`pipeline`]: one proposal through fetch → summarize → filter → PAR → persist
//! - [`batch`]: lot selection, rate limiting and continuous runs
//! - [`statistics`]: per-lot and per-run counters

pub mod batch;
pub mod pipeline;
pub mod statistics;

pub use batch::BatchDriver;
pub use pipeline::{AnalysisPipeline, ItemOutcome, PipelineError};
pub use statistics::{LotStatistics, RunStatistics};

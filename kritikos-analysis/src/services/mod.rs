//! Pipeline stages
//!
//! Each stage owns its prompt and response parsing. None of them touch the
//! database; checkpointing is done by the pipeline.

pub mod par_analyzer;
pub mod proposal_fetcher;
pub mod summarizer;
pub mod triviality_filter;

pub use par_analyzer::ParAnalyzer;
pub use proposal_fetcher::{FetchError, FetchOutcome, FetchedText, ProposalFetcher, TextSource};
pub use summarizer::Summarizer;
pub use triviality_filter::{TrivialityFilter, TrivialityVerdict};

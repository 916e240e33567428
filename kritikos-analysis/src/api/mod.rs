//! HTTP API handlers for kritikos-analysis
//!
//! REST endpoints for analysis runs, single-proposal analysis, the report,
//! IDP recomputation and ranking, plus an SSE event stream.

pub mod analysis;
pub mod health;
pub mod idp;
pub mod sse;

pub use analysis::analysis_routes;
pub use health::health_routes;
pub use idp::idp_routes;
pub use sse::event_stream;

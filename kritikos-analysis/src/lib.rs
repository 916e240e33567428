//! kritikos-analysis library interface
//!
//! IDP/PAR analysis pipeline: proposal text retrieval, LLM stages, batch
//! runs, legislator index recomputation and the HTTP API over them.
//! Exposed as a library for the binary and for integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod pagination;
pub mod scoring;
pub mod services;
pub mod utils;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use kritikos_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::llm::{GeminiClient, LlmClient};
use crate::services::ProposalFetcher;
use crate::workflow::{AnalysisPipeline, BatchDriver};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub config: Arc<ServiceConfig>,
    /// Analysis driver; None when no LLM API key is configured
    pub driver: Option<Arc<BatchDriver>>,
    /// Cancellation tokens of active analysis runs
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Background tasks of started runs, awaited on shutdown
    pub run_tasks: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
    /// Held from the RUNNING check until the new run is registered
    pub run_start_lock: Arc<Mutex<()>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, config: ServiceConfig) -> Self {
        Self {
            db,
            event_bus,
            config: Arc::new(config),
            driver: None,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            run_tasks: Arc::new(Mutex::new(HashMap::new())),
            run_start_lock: Arc::new(Mutex::new(())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_driver(mut self, driver: Arc<BatchDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// The analysis driver, or 503 when analysis is not configured
    pub fn driver(&self) -> ApiResult<&Arc<BatchDriver>> {
        self.driver.as_ref().ok_or_else(|| {
            ApiError::Unavailable("LLM API key not configured; analysis is disabled".to_string())
        })
    }

    /// Track a run's background task; finished tasks are dropped here
    pub async fn track_run_task(&self, run_id: Uuid, handle: JoinHandle<()>) {
        let mut tasks = self.run_tasks.lock().await;
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(run_id, handle);
    }

    /// Cancel every live run and wait up to `grace` for each task to record
    /// its final state. Returns the number of tasks that did not stop in time.
    pub async fn shutdown_runs(&self, grace: Duration) -> usize {
        for token in self.cancellation_tokens.read().await.values() {
            token.cancel();
        }

        let tasks: Vec<(Uuid, JoinHandle<()>)> = self.run_tasks.lock().await.drain().collect();
        let mut unfinished = 0;
        for (run_id, mut handle) in tasks {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(run_id = %run_id, error = %e, "Analysis run task failed"),
                Err(_) => {
                    tracing::warn!(run_id = %run_id, "Analysis run did not stop in time");
                    handle.abort();
                    unfinished += 1;
                }
            }
        }
        unfinished
    }

    pub async fn set_last_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Wire the production pipeline: Gemini client and the default text sources
pub fn build_batch_driver(
    db: SqlitePool,
    config: &ServiceConfig,
    api_key: String,
    event_bus: EventBus,
) -> kritikos_common::Result<BatchDriver> {
    let llm = GeminiClient::new(config.llm.gemini_config(api_key))
        .map_err(|e| kritikos_common::Error::Config(e.to_string()))?;
    let llm: Arc<dyn LlmClient> = Arc::new(llm);

    let fetcher = ProposalFetcher::with_default_sources(
        &config.fetcher.storage_base_url,
        &config.fetcher.camara_api_base_url,
        config.fetcher.timeout,
    )
    .map_err(|e| kritikos_common::Error::Config(e.to_string()))?;

    let pipeline = AnalysisPipeline::new(db, llm, Arc::new(fetcher), config.pipeline.clone())
        .with_event_bus(event_bus);

    Ok(BatchDriver::new(Arc::new(pipeline)))
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::analysis_routes())
        .merge(api::idp_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        // Enable CORS for local dashboards
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

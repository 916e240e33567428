//! Analysis API handlers
//!
//! POST /analysis/runs, GET /analysis/runs/:run_id,
//! POST /analysis/runs/:run_id/cancel, POST|GET /analysis/proposals/:id,
//! GET /analysis/report

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::analyses::{load_analysis, AnalysisRecord};
use crate::db::report::{build_report, AnalysisReport};
use crate::db::runs::{has_running_run, load_run, save_run};
use crate::error::{ApiError, ApiResult};
use crate::models::{AnalysisRun, AnalysisStage, RunParameters, RunState};
use crate::AppState;

/// Largest lot a client may request
pub const MAX_LOT_SIZE: usize = 100;

/// POST /analysis/runs request; omitted fields use the configured defaults
#[derive(Debug, Default, Deserialize)]
pub struct StartRunRequest {
    pub lot_size: Option<usize>,
    /// 0 means no lot limit
    pub max_lots: Option<usize>,
    #[serde(default)]
    pub continuous: bool,
}

/// POST /analysis/runs response
#[derive(Debug, Serialize)]
pub struct StartRunResponse {
    pub run_id: Uuid,
    pub state: RunState,
    pub parameters: RunParameters,
    pub started_at: DateTime<Utc>,
}

/// POST /analysis/runs/:run_id/cancel response
#[derive(Debug, Serialize)]
pub struct CancelRunResponse {
    pub run_id: Uuid,
    pub state: RunState,
    /// True when a live run was signalled; it stops after the current item
    pub signalled: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeQuery {
    /// Redo the analysis even if it is current
    #[serde(default)]
    pub force: bool,
}

/// POST /analysis/proposals/:id response
#[derive(Debug, Serialize)]
pub struct AnalyzeProposalResponse {
    pub proposal_id: i64,
    pub stage: AnalysisStage,
    pub is_trivial: Option<bool>,
    pub par_final: Option<f64>,
    pub duration_ms: u64,
    pub analysis: Option<AnalysisRecord>,
}

/// POST /analysis/runs
///
/// Start a batch run in the background. Returns 202 Accepted with the run ID.
pub async fn start_run(
    State(state): State<AppState>,
    request: Option<Json<StartRunRequest>>,
) -> ApiResult<(StatusCode, Json<StartRunResponse>)> {
    let driver = state.driver()?.clone();
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let defaults = &state.config.pipeline;

    let lot_size = request.lot_size.unwrap_or(defaults.lot_size);
    if lot_size == 0 || lot_size > MAX_LOT_SIZE {
        return Err(ApiError::BadRequest(format!(
            "lot_size must be between 1 and {}",
            MAX_LOT_SIZE
        )));
    }
    let max_lots = match request.max_lots {
        Some(0) => None,
        Some(n) => Some(n),
        None => defaults.max_lots,
    };

    let _start_guard = state.run_start_lock.lock().await;
    if has_running_run(&state.db).await? {
        return Err(ApiError::Conflict("Analysis run already running".to_string()));
    }

    let run = AnalysisRun::new(RunParameters {
        lot_size,
        max_lots,
        continuous: request.continuous,
    });
    save_run(&state.db, &run, defaults.max_lock_wait_ms).await?;

    let response = StartRunResponse {
        run_id: run.run_id,
        state: run.state,
        parameters: run.parameters.clone(),
        started_at: run.started_at,
    };

    let cancel_token = CancellationToken::new();
    state
        .cancellation_tokens
        .write()
        .await
        .insert(run.run_id, cancel_token.clone());

    tracing::info!(run_id = %run.run_id, "Analysis run accepted");

    let state_clone = state.clone();
    let run_id = run.run_id;
    let handle = tokio::spawn(async move {
        let finished = driver.execute(run, cancel_token).await;

        state_clone.cancellation_tokens.write().await.remove(&run_id);
        if finished.state == RunState::Failed {
            let message = finished
                .last_error
                .unwrap_or_else(|| "analysis run failed".to_string());
            state_clone.set_last_error(message).await;
        }
    });
    state.track_run_task(run_id, handle).await;

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /analysis/runs/:run_id
pub async fn get_run(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> ApiResult<Json<AnalysisRun>> {
    let run = load_run(&state.db, run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Analysis run not found: {}", run_id)))?;

    Ok(Json(run))
}

/// POST /analysis/runs/:run_id/cancel
///
/// Signals the live run. A RUNNING row without a live task (left by another
/// process) is marked CANCELLED directly.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<CancelRunResponse>> {
    let mut run = load_run(&state.db, run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Analysis run not found: {}", run_id)))?;

    if run.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "Analysis run already in terminal state: {}",
            run.state.as_str()
        )));
    }

    let token = state.cancellation_tokens.read().await.get(&run_id).cloned();
    let signalled = match token {
        Some(token) => {
            token.cancel();
            true
        }
        None => {
            run.transition_to(RunState::Cancelled);
            save_run(&state.db, &run, state.config.pipeline.max_lock_wait_ms).await?;
            false
        }
    };

    tracing::info!(run_id = %run_id, signalled, "Analysis run cancellation requested");

    Ok(Json(CancelRunResponse {
        run_id,
        state: run.state,
        signalled,
    }))
}

/// POST /analysis/proposals/:id
///
/// Analyze one proposal synchronously. A failed analysis answers 502 with
/// the stage error; the FAILED row is stored either way.
pub async fn analyze_proposal(
    State(state): State<AppState>,
    Path(proposal_id): Path<i64>,
    Query(query): Query<AnalyzeQuery>,
) -> ApiResult<Json<AnalyzeProposalResponse>> {
    let driver = state.driver()?;
    let outcome = driver.analyze_one(proposal_id, query.force).await?;

    if let (Some(error), Some(stage)) = (&outcome.error, outcome.failed_stage) {
        return Err(ApiError::Upstream(format!(
            "Proposal {} failed at {}: {}",
            proposal_id, stage, error
        )));
    }

    let analysis = load_analysis(&state.db, proposal_id).await?;

    Ok(Json(AnalyzeProposalResponse {
        proposal_id,
        stage: outcome.stage,
        is_trivial: outcome.is_trivial,
        par_final: outcome.par_final,
        duration_ms: outcome.duration.as_millis() as u64,
        analysis,
    }))
}

/// GET /analysis/proposals/:id
pub async fn get_proposal_analysis(
    State(state): State<AppState>,
    Path(proposal_id): Path<i64>,
) -> ApiResult<Json<AnalysisRecord>> {
    let record = load_analysis(&state.db, proposal_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No analysis for proposal {}", proposal_id)))?;

    Ok(Json(record))
}

/// GET /analysis/report
pub async fn get_report(State(state): State<AppState>) -> ApiResult<Json<AnalysisReport>> {
    Ok(Json(build_report(&state.db).await?))
}

/// Build analysis routes
pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/analysis/runs", post(start_run))
        .route("/analysis/runs/:run_id", get(get_run))
        .route("/analysis/runs/:run_id/cancel", post(cancel_run))
        .route(
            "/analysis/proposals/:id",
            get(get_proposal_analysis).post(analyze_proposal),
        )
        .route("/analysis/report", get(get_report))
}

//! IDP API handlers
//!
//! POST /idp/recompute, GET /ranking/idp

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::db::scores::{fetch_ranking, RankingFilter, RankingPage};
use crate::error::{ApiError, ApiResult};
use crate::pagination::sanitize_per_page;
use crate::scoring::aggregator::{recompute_all, RecomputeOptions, RecomputeSummary};
use crate::scoring::Methodology;
use crate::AppState;

/// POST /idp/recompute request
#[derive(Debug, Default, Deserialize)]
pub struct RecomputeRequest {
    /// "1.0" (default) or "2.0"
    pub methodology: Option<String>,
    pub reference_year: Option<i64>,
}

/// GET /ranking/idp query
#[derive(Debug, Default, Deserialize)]
pub struct RankingQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub party: Option<String>,
    pub uf: Option<String>,
    pub methodology: Option<String>,
}

fn parse_methodology(value: Option<&str>) -> ApiResult<Methodology> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v.parse().map_err(ApiError::BadRequest),
        None => Ok(Methodology::default()),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// POST /idp/recompute
///
/// Recompute every legislator's index synchronously.
pub async fn recompute(
    State(state): State<AppState>,
    request: Option<Json<RecomputeRequest>>,
) -> ApiResult<Json<RecomputeSummary>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let options = RecomputeOptions {
        methodology: parse_methodology(request.methodology.as_deref())?,
        reference_year: request.reference_year,
    };

    let summary = recompute_all(
        &state.db,
        options,
        state.config.pipeline.max_lock_wait_ms,
        Some(&state.event_bus),
    )
    .await?;

    Ok(Json(summary))
}

/// GET /ranking/idp
pub async fn ranking(State(state): State<AppState>, Query(query): Query<RankingQuery>) -> ApiResult<Json<RankingPage>> {
    let methodology = parse_methodology(query.methodology.as_deref())?;
    let filter = RankingFilter {
        methodology_version: methodology.version().to_string(),
        party: non_empty(query.party),
        state_uf: non_empty(query.uf),
    };

    let page = query.page.unwrap_or(1);
    let per_page = sanitize_per_page(query.per_page);

    Ok(Json(fetch_ranking(&state.db, &filter, page, per_page).await?))
}

/// Build IDP routes
pub fn idp_routes() -> Router<AppState> {
    Router::new()
        .route("/idp/recompute", post(recompute))
        .route("/ranking/idp", get(ranking))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_methodology() {
        assert_eq!(parse_methodology(None).unwrap(), Methodology::V1);
        assert_eq!(parse_methodology(Some(" ")).unwrap(), Methodology::V1);
        assert_eq!(parse_methodology(Some("2.0")).unwrap(), Methodology::V2);
        assert!(matches!(parse_methodology(Some("9")), Err(ApiError::BadRequest(_))));
    }
}

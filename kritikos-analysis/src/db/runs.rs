//! Analysis run persistence

use kritikos_common::time::{parse_db_timestamp, to_db_timestamp};
use kritikos_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{AnalysisRun, RunParameters, RunState};
use crate::utils::retry_on_lock;
use crate::workflow::statistics::RunStatistics;

/// Save (insert or update) an analysis run
pub async fn save_run(pool: &SqlitePool, run: &AnalysisRun, max_wait_ms: u64) -> Result<()> {
    // Prepare all data before acquiring a connection
    let run_id = run.run_id.to_string();
    let state = run.state.as_str();
    let parameters = serde_json::to_string(&run.parameters)?;
    let statistics = serde_json::to_string(&run.statistics)?;
    let started_at = to_db_timestamp(run.started_at);
    let ended_at = run.ended_at.map(to_db_timestamp);

    retry_on_lock("save_run", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO analysis_runs (run_id, state, parameters, statistics, last_error, started_at, ended_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                state = excluded.state,
                statistics = excluded.statistics,
                last_error = excluded.last_error,
                ended_at = excluded.ended_at
            "#,
        )
        .bind(&run_id)
        .bind(state)
        .bind(&parameters)
        .bind(&statistics)
        .bind(&run.last_error)
        .bind(&started_at)
        .bind(&ended_at)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

/// Load an analysis run
pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<AnalysisRun>> {
    let row = sqlx::query(
        r#"
        SELECT run_id, state, parameters, statistics, last_error, started_at, ended_at
        FROM analysis_runs
        WHERE run_id = ?
        "#,
    )
    .bind(run_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let state: String = row.get("state");
    let state = RunState::parse(&state)
        .ok_or_else(|| Error::Internal(format!("Unknown run state: {}", state)))?;

    let parameters: String = row.get("parameters");
    let parameters: RunParameters = serde_json::from_str(&parameters)?;

    let statistics: String = row.get("statistics");
    let statistics: RunStatistics = serde_json::from_str(&statistics)?;

    let started_at: String = row.get("started_at");
    let started_at = parse_db_timestamp(&started_at)
        .ok_or_else(|| Error::Internal(format!("Failed to parse started_at: {}", started_at)))?;

    let ended_at: Option<String> = row.get("ended_at");

    Ok(Some(AnalysisRun {
        run_id,
        state,
        parameters,
        statistics,
        last_error: row.get("last_error"),
        started_at,
        ended_at: ended_at.as_deref().and_then(parse_db_timestamp),
    }))
}

/// Check if any analysis run is currently running
pub async fn has_running_run(pool: &SqlitePool) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analysis_runs WHERE state = 'RUNNING'")
        .fetch_one(pool)
        .await?;

    Ok(count > 0)
}

/// Mark runs left RUNNING by a previous process as FAILED
///
/// Called at startup; a run cannot survive a restart.
pub async fn fail_orphaned_runs(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE analysis_runs
        SET state = 'FAILED', last_error = 'Interrupted by service restart', ended_at = ?
        WHERE state = 'RUNNING'
        "#,
    )
    .bind(kritikos_common::time::now_db_timestamp())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load_run() {
        let pool = crate::db::init_memory_pool().await.unwrap();

        let mut run = AnalysisRun::new(RunParameters {
            lot_size: 4,
            max_lots: None,
            continuous: true,
        });
        run.statistics.counters.persisted = 3;
        save_run(&pool, &run, 1000).await.unwrap();
        assert!(has_running_run(&pool).await.unwrap());

        run.transition_to(RunState::Completed);
        save_run(&pool, &run, 1000).await.unwrap();
        assert!(!has_running_run(&pool).await.unwrap());

        let loaded = load_run(&pool, run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, RunState::Completed);
        assert_eq!(loaded.parameters, run.parameters);
        assert_eq!(loaded.statistics.counters.persisted, 3);
        assert!(loaded.ended_at.is_some());

        assert!(load_run(&pool, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_orphaned_runs_marked_failed() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let run = AnalysisRun::new(RunParameters::default());
        save_run(&pool, &run, 1000).await.unwrap();

        assert_eq!(fail_orphaned_runs(&pool).await.unwrap(), 1);

        let loaded = load_run(&pool, run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, RunState::Failed);
        assert!(loaded.last_error.is_some());
        assert!(!has_running_run(&pool).await.unwrap());
    }
}

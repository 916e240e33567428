//! processing_logs audit trail
//!
//! One row per stage execution (or per IDP recomputation) with its status,
//! JSON input/output and timing.

use chrono::{DateTime, Utc};
use kritikos_common::time::to_db_timestamp;
use kritikos_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::utils::retry_on_lock;

/// Process kinds recorded in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    Fetch,
    Summary,
    Filter,
    Par,
    Persist,
    Score,
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Fetch => "fetch",
            ProcessKind::Summary => "summary",
            ProcessKind::Filter => "filter",
            ProcessKind::Par => "par",
            ProcessKind::Persist => "persist",
            ProcessKind::Score => "score",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
    Skipped,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Error => "error",
            LogStatus::Skipped => "skipped",
        }
    }
}

/// One audit row
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub kind: ProcessKind,
    pub status: LogStatus,
    pub run_id: Option<Uuid>,
    pub proposal_id: Option<i64>,
    pub legislator_id: Option<i64>,
    pub message: Option<String>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl LogEntry {
    /// Entry for a stage that started at `started_at` and just finished
    pub fn finished(kind: ProcessKind, status: LogStatus, started_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            status,
            run_id: None,
            proposal_id: None,
            legislator_id: None,
            message: None,
            input: None,
            output: None,
            started_at,
            finished_at: kritikos_common::time::now(),
        }
    }

    pub fn proposal(mut self, proposal_id: i64) -> Self {
        self.proposal_id = Some(proposal_id);
        self
    }

    pub fn run(mut self, run_id: Option<Uuid>) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn duration_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Append an audit row
pub async fn record(pool: &SqlitePool, entry: &LogEntry, max_wait_ms: u64) -> Result<()> {
    let run_id = entry.run_id.map(|id| id.to_string());
    let input = entry.input.as_ref().map(|v| v.to_string());
    let output = entry.output.as_ref().map(|v| v.to_string());
    let started_at = to_db_timestamp(entry.started_at);
    let finished_at = to_db_timestamp(entry.finished_at);
    let duration = entry.duration_seconds();

    retry_on_lock("record_processing_log", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO processing_logs (
                process_kind, run_id, proposal_id, legislator_id, status, message,
                input_data, output_data, started_at, finished_at, duration_seconds
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.kind.as_str())
        .bind(&run_id)
        .bind(entry.proposal_id)
        .bind(entry.legislator_id)
        .bind(entry.status.as_str())
        .bind(&entry.message)
        .bind(&input)
        .bind(&output)
        .bind(&started_at)
        .bind(&finished_at)
        .bind(duration)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

/// Count of log rows per (kind, status), optionally since a timestamp
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogCount {
    pub process_kind: String,
    pub status: String,
    pub count: i64,
    pub average_duration_seconds: Option<f64>,
}

pub async fn count_by_kind_and_status(pool: &SqlitePool, since: Option<&str>) -> Result<Vec<LogCount>> {
    let rows: Vec<(String, String, i64, Option<f64>)> = sqlx::query_as(
        r#"
        SELECT process_kind, status, COUNT(*), AVG(duration_seconds)
        FROM processing_logs
        WHERE (? IS NULL OR started_at >= ?)
        GROUP BY process_kind, status
        ORDER BY process_kind, status
        "#,
    )
    .bind(since)
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(process_kind, status, count, average_duration_seconds)| LogCount {
            process_kind,
            status,
            count,
            average_duration_seconds,
        })
        .collect())
}

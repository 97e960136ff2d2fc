use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

use gantry_core::models::{
    ExecOutcome, GradingStatus, GradingTask, QueuedTask, SchedulerLease, Submission,
    SubmissionStatus, TaskDef, Testbed, TestbedStatus,
};

/// Timestamp format used for every bound datetime parameter, matching the
/// STRFTIME defaults in the migrations so SQLite's datetime() can compare them.
pub(super) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(super) fn parse_field_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(super) fn encode_field_list(fields: &[String]) -> String {
    serde_json::to_string(fields).unwrap_or_else(|_| "[]".to_string())
}

pub(super) fn parse_path_map(raw: &str) -> HashMap<String, String> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(super) fn encode_path_map(paths: &HashMap<String, String>) -> String {
    serde_json::to_string(paths).unwrap_or_else(|_| "{}".to_string())
}

pub(super) fn parse_token(raw: Option<String>) -> Option<Uuid> {
    raw.and_then(|value| Uuid::parse_str(&value).ok())
}

#[derive(sqlx::FromRow)]
pub(super) struct TestbedRow {
    pub id: String,
    pub address: String,
    pub capability: String,
    pub status: String,
    pub assigned_task: Option<i64>,
    pub deadline: Option<DateTime<Utc>>,
    pub session_token: Option<String>,
    pub last_report_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub(super) struct TaskDefRow {
    pub id: i64,
    pub name: String,
    pub capability: String,
    pub execution_secs: i64,
    pub points: f64,
    pub input_fields: String,
    pub output_fields: String,
    pub score_command: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub(super) struct SubmissionRow {
    pub id: i64,
    pub reference: String,
    pub artifacts: String,
    pub scope_width: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub graded_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
pub(super) struct GradingTaskRow {
    pub id: i64,
    pub submission_id: i64,
    pub task_def_id: i64,
    pub status: String,
    pub outcome: String,
    pub points: f64,
    pub detail: Option<String>,
    pub output_paths: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub(super) struct QueuedTaskRow {
    pub task_id: i64,
    pub submission_id: i64,
    pub task_def_id: i64,
    pub def_name: String,
    pub capability: String,
    pub execution_secs: i64,
    pub scope_width: i64,
    pub input_fields: String,
    pub artifacts: String,
}

#[derive(sqlx::FromRow)]
pub(super) struct LeaseRow {
    pub owner_pid: i64,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

pub struct SqliteStore {
    pub(super) pool: SqlitePool,
}

fn sqlite_file_path(database_url: &str) -> Option<PathBuf> {
    let raw = if let Some(rest) = database_url.strip_prefix("sqlite://") {
        rest
    } else if let Some(rest) = database_url.strip_prefix("sqlite:") {
        rest
    } else {
        return None;
    };

    let path = raw.split('?').next().unwrap_or(raw);
    if path.is_empty() || path == ":memory:" || path.starts_with("file:") {
        return None;
    }

    Some(PathBuf::from(path))
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::new_with_pool_size(database_url, 5).await
    }

    pub async fn new_with_pool_size(database_url: &str, pool_size: u32) -> Result<Self> {
        if let Some(path) = sqlite_file_path(database_url) {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!(
                            "Failed to create SQLite database directory: {}",
                            parent.display()
                        )
                    })?;
                }
            }
        }

        // Every pooled connection to an in-memory URL opens its own empty
        // database, so those must stay on a single connection.
        let max_connections = if is_memory_url(database_url) {
            1
        } else {
            pool_size.max(1)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await?;

        // Enable foreign keys
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await?;

        // Enable WAL mode for better concurrency (allows concurrent reads during writes)
        sqlx::query("PRAGMA journal_mode = WAL;")
            .execute(&pool)
            .await?;

        // Reduce fsync overhead - NORMAL is safe and much faster than FULL
        sqlx::query("PRAGMA synchronous = NORMAL;")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations_impl(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub(super) fn map_testbed(row: TestbedRow) -> Testbed {
        Testbed {
            id: row.id,
            address: row.address,
            capability: row.capability,
            status: TestbedStatus::parse(&row.status).unwrap_or(TestbedStatus::Unknown),
            assigned_task: row.assigned_task,
            deadline: row.deadline,
            session_token: parse_token(row.session_token),
            last_report_at: row.last_report_at,
            created_at: row.created_at,
        }
    }

    pub(super) fn map_task_def(row: TaskDefRow) -> TaskDef {
        TaskDef {
            id: row.id,
            name: row.name,
            capability: row.capability,
            execution_secs: row.execution_secs,
            points: row.points,
            input_fields: parse_field_list(&row.input_fields),
            output_fields: parse_field_list(&row.output_fields),
            score_command: row.score_command,
            created_at: row.created_at,
        }
    }

    pub(super) fn map_submission(row: SubmissionRow) -> Submission {
        Submission {
            id: row.id,
            reference: row.reference,
            artifacts: parse_path_map(&row.artifacts),
            scope_width: row.scope_width,
            status: SubmissionStatus::parse(&row.status).unwrap_or(SubmissionStatus::Pending),
            created_at: row.created_at,
            graded_at: row.graded_at,
        }
    }

    pub(super) fn map_grading_task(row: GradingTaskRow) -> GradingTask {
        GradingTask {
            id: row.id,
            submission_id: row.submission_id,
            task_def_id: row.task_def_id,
            status: GradingStatus::parse(&row.status).unwrap_or(GradingStatus::Pending),
            outcome: ExecOutcome::parse(&row.outcome).unwrap_or(ExecOutcome::Unknown),
            points: row.points,
            detail: row.detail,
            output_paths: row.output_paths.map(|raw| parse_path_map(&raw)),
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }

    pub(super) fn map_queued_task(row: QueuedTaskRow) -> QueuedTask {
        QueuedTask {
            task_id: row.task_id,
            submission_id: row.submission_id,
            task_def_id: row.task_def_id,
            def_name: row.def_name,
            capability: row.capability,
            execution_secs: row.execution_secs,
            scope_width: row.scope_width,
            input_fields: parse_field_list(&row.input_fields),
            artifacts: parse_path_map(&row.artifacts),
        }
    }

    pub(super) fn map_lease(row: LeaseRow) -> SchedulerLease {
        SchedulerLease {
            owner_pid: row.owner_pid,
            hostname: row.hostname,
            started_at: row.started_at,
            heartbeat_at: row.heartbeat_at,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

use std::collections::HashMap;

use anyhow::Result;
use sqlx::Row;
use uuid::Uuid;

use gantry_core::models::{ExecOutcome, GradingTask, QueuedTask};

use super::core::{GradingTaskRow, QueuedTaskRow, SqliteStore, encode_path_map};

impl SqliteStore {
    /// The scheduler's assignment queue: pending tasks with their definition
    /// and submission, narrowest submission scope first, then arrival order.
    pub(super) async fn queued_tasks_impl(&self) -> Result<Vec<QueuedTask>> {
        let rows = sqlx::query_as::<_, QueuedTaskRow>(
            r#"SELECT t.id AS task_id, t.submission_id, t.task_def_id,
            d.name AS def_name, d.capability, d.execution_secs, d.input_fields,
            s.scope_width, s.artifacts
            FROM grading_tasks t
            JOIN submissions s ON t.submission_id = s.id
            JOIN task_defs d ON t.task_def_id = d.id
            WHERE t.status = 'pending'
            ORDER BY s.scope_width ASC, t.submission_id ASC, t.id ASC"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Self::map_queued_task).collect())
    }

    pub(super) async fn output_pending_tasks_impl(&self) -> Result<Vec<GradingTask>> {
        let rows = sqlx::query_as::<_, GradingTaskRow>(
            "SELECT * FROM grading_tasks WHERE status = 'output_pending' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Self::map_grading_task).collect())
    }

    pub(super) async fn get_task_impl(&self, id: i64) -> Result<Option<GradingTask>> {
        let row = sqlx::query_as::<_, GradingTaskRow>("SELECT * FROM grading_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Self::map_grading_task))
    }

    pub(super) async fn list_tasks_for_submission_impl(
        &self,
        submission_id: i64,
    ) -> Result<Vec<GradingTask>> {
        let rows = sqlx::query_as::<_, GradingTaskRow>(
            "SELECT * FROM grading_tasks WHERE submission_id = ? ORDER BY id",
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Self::map_grading_task).collect())
    }

    /// Records a board's output callback and frees the testbed in the same
    /// transaction. A stale token or an already-released assignment makes
    /// this a no-op returning false.
    pub(super) async fn store_task_output_impl(
        &self,
        task_id: i64,
        token: Uuid,
        outcome: ExecOutcome,
        outputs: &HashMap<String, String>,
        note: Option<&str>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let holder = sqlx::query("SELECT id FROM testbeds WHERE assigned_task = ? AND session_token = ?")
            .bind(task_id)
            .bind(token.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(holder) = holder else {
            tx.rollback().await?;
            return Ok(false);
        };
        let testbed_id: String = holder.get("id");

        let task = sqlx::query(
            r#"UPDATE grading_tasks SET status = 'output_pending', outcome = ?,
            output_paths = ?, detail = ?, updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ','now')
            WHERE id = ? AND status = 'executing'"#,
        )
        .bind(outcome.as_str())
        .bind(encode_path_map(outputs))
        .bind(note)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;
        if task.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        // The callback is proof of life, so the watchdog resets too.
        sqlx::query(
            r#"UPDATE testbeds SET status = 'available', assigned_task = NULL, deadline = NULL,
            session_token = NULL, last_report_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ','now')
            WHERE id = ?"#,
        )
        .bind(&testbed_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    pub(super) async fn finalize_task_impl(
        &self,
        task_id: i64,
        points: f64,
        detail: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE grading_tasks SET status = 'finished', points = ?, detail = ?, error = NULL,
            updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ','now')
            WHERE id = ? AND status = 'output_pending'"#,
        )
        .bind(points)
        .bind(detail)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(super) async fn reset_task_pending_impl(&self, task_id: i64, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE grading_tasks SET status = 'pending', outcome = 'unknown',
            output_paths = NULL, points = 0, error = ?,
            updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ','now')
            WHERE id = ? AND status = 'output_pending'"#,
        )
        .bind(reason)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(super) async fn mark_task_internal_error_impl(
        &self,
        task_id: i64,
        error: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE grading_tasks SET status = 'internal_error', error = ?,
            updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ','now')
            WHERE id = ? AND status IN ('pending', 'executing')"#,
        )
        .bind(error)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(super) async fn task_status_counts_impl(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM grading_tasks GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("status"), row.get("n")))
            .collect())
    }
}

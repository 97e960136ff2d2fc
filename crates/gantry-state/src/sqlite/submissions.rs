use std::collections::HashSet;

use anyhow::Result;

use gantry_core::GantryError;
use gantry_core::models::{GradingTask, Submission};
use gantry_core::store::EnqueueRequest;

use super::core::{GradingTaskRow, SqliteStore, SubmissionRow, encode_path_map};

impl SqliteStore {
    /// Creates a submission plus one grading task per existing definition.
    /// Requested definitions start pending, the rest are skipped outright.
    pub(super) async fn enqueue_submission_impl(
        &self,
        request: EnqueueRequest,
    ) -> Result<(Submission, Vec<GradingTask>)> {
        let defs = self.list_task_defs_impl().await?;

        let requested: HashSet<String> = if request.tasks.is_empty() {
            defs.iter().map(|def| def.name.clone()).collect()
        } else {
            request.tasks.iter().cloned().collect()
        };

        for name in &requested {
            let Some(def) = defs.iter().find(|def| &def.name == name) else {
                return Err(GantryError::UnknownTaskDef(name.clone()).into());
            };
            for field in &def.input_fields {
                if !request.artifacts.contains_key(field) {
                    return Err(GantryError::IncompleteArtifacts {
                        task: def.name.clone(),
                        field: field.clone(),
                    }
                    .into());
                }
            }
        }

        let mut tx = self.pool.begin().await?;
        let submission_row = sqlx::query_as::<_, SubmissionRow>(
            r#"INSERT INTO submissions (reference, artifacts, scope_width, status)
            VALUES (?, ?, ?, 'pending') RETURNING *"#,
        )
        .bind(&request.reference)
        .bind(encode_path_map(&request.artifacts))
        .bind(requested.len() as i64)
        .fetch_one(&mut *tx)
        .await?;

        let mut tasks = Vec::with_capacity(defs.len());
        for def in &defs {
            let status = if requested.contains(&def.name) {
                "pending"
            } else {
                "skipped"
            };
            let row = sqlx::query_as::<_, GradingTaskRow>(
                r#"INSERT INTO grading_tasks (submission_id, task_def_id, status, outcome, points)
                VALUES (?, ?, ?, 'unknown', 0) RETURNING *"#,
            )
            .bind(submission_row.id)
            .bind(def.id)
            .bind(status)
            .fetch_one(&mut *tx)
            .await?;
            tasks.push(Self::map_grading_task(row));
        }
        tx.commit().await?;
        Ok((Self::map_submission(submission_row), tasks))
    }

    pub(super) async fn get_submission_impl(&self, id: i64) -> Result<Option<Submission>> {
        let row = sqlx::query_as::<_, SubmissionRow>("SELECT * FROM submissions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Self::map_submission))
    }

    pub(super) async fn list_submissions_impl(&self) -> Result<Vec<Submission>> {
        let rows = sqlx::query_as::<_, SubmissionRow>("SELECT * FROM submissions ORDER BY id DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Self::map_submission).collect())
    }

    /// Flips a submission to graded once every task of it is terminal.
    /// Guarded so the flip happens exactly once.
    pub(super) async fn mark_submission_graded_if_complete_impl(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE submissions SET status = 'graded',
            graded_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ','now')
            WHERE id = ? AND status = 'pending'
            AND NOT EXISTS (
                SELECT 1 FROM grading_tasks WHERE submission_id = ?
                AND status NOT IN ('finished', 'internal_error', 'skipped')
            )"#,
        )
        .bind(id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use gantry_core::models::{ProbeOutcome, ReportKind, ReportedStatus, Testbed, TestbedStatus};
use gantry_core::store::SweepAction;

use super::core::{SqliteStore, TestbedRow, fmt_ts};

impl SqliteStore {
    pub(super) async fn upsert_testbed_report_impl(
        &self,
        id: &str,
        address: &str,
        capability: &str,
    ) -> Result<ReportKind> {
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query("SELECT status FROM testbeds WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        let kind = match existing {
            None => {
                sqlx::query(
                    r#"INSERT INTO testbeds (id, address, capability, status) VALUES (?, ?, ?, 'unknown')"#,
                )
                .bind(id)
                .bind(address)
                .bind(capability)
                .execute(&mut *tx)
                .await?;
                ReportKind::New
            }
            Some(row) => {
                let status: String = row.get("status");
                sqlx::query(
                    r#"UPDATE testbeds SET address = ?, capability = ?,
                    last_report_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?"#,
                )
                .bind(address)
                .bind(capability)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                if status == TestbedStatus::Offline.as_str() {
                    ReportKind::WasOffline
                } else {
                    ReportKind::Known
                }
            }
        };
        tx.commit().await?;
        Ok(kind)
    }

    pub(super) async fn record_status_report_impl(
        &self,
        id: &str,
        reported: ReportedStatus,
    ) -> Result<bool> {
        let result = match reported {
            ReportedStatus::Idle => {
                sqlx::query(
                    r#"UPDATE testbeds SET
                    status = CASE WHEN status IN ('unknown', 'offline') THEN 'available' ELSE status END,
                    last_report_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ','now')
                    WHERE id = ?"#,
                )
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            ReportedStatus::Testing => {
                sqlx::query(
                    "UPDATE testbeds SET last_report_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ','now') WHERE id = ?",
                )
                .bind(id)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    pub(super) async fn apply_probe_outcome_impl(
        &self,
        id: &str,
        outcome: ProbeOutcome,
    ) -> Result<()> {
        match outcome {
            ProbeOutcome::Idle => {
                sqlx::query(
                    "UPDATE testbeds SET status = 'available' WHERE id = ? AND status IN ('unknown', 'offline')",
                )
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            // A board running stale work stays out of the pool until it
            // reports IDLE on its own.
            ProbeOutcome::Testing => {}
            ProbeOutcome::Unreachable => {
                sqlx::query(
                    "UPDATE testbeds SET status = 'offline' WHERE id = ? AND status != 'busy'",
                )
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    pub(super) async fn get_testbed_impl(&self, id: &str) -> Result<Option<Testbed>> {
        let row = sqlx::query_as::<_, TestbedRow>("SELECT * FROM testbeds WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Self::map_testbed))
    }

    pub(super) async fn list_testbeds_impl(&self) -> Result<Vec<Testbed>> {
        let rows = sqlx::query_as::<_, TestbedRow>("SELECT * FROM testbeds ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Self::map_testbed).collect())
    }

    pub(super) async fn available_testbeds_impl(&self) -> Result<Vec<Testbed>> {
        let rows = sqlx::query_as::<_, TestbedRow>(
            "SELECT * FROM testbeds WHERE status = 'available' AND assigned_task IS NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Self::map_testbed).collect())
    }

    pub(super) async fn stale_testbeds_impl(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Testbed>> {
        let rows = sqlx::query_as::<_, TestbedRow>(
            r#"SELECT * FROM testbeds WHERE status != 'offline'
            AND datetime(last_report_at) <= datetime(?) ORDER BY id"#,
        )
        .bind(fmt_ts(cutoff))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Self::map_testbed).collect())
    }

    /// Marks one stale testbed offline. The staleness guard is re-checked
    /// inside the transaction so a report that lands between the sweep's
    /// snapshot and this call wins.
    pub(super) async fn mark_testbed_offline_impl(
        &self,
        id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<SweepAction> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"SELECT assigned_task FROM testbeds WHERE id = ? AND status != 'offline'
            AND datetime(last_report_at) <= datetime(?)"#,
        )
        .bind(id)
        .bind(fmt_ts(cutoff))
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(SweepAction::skipped());
        };
        let assigned: Option<i64> = row.get("assigned_task");

        sqlx::query(
            r#"UPDATE testbeds SET status = 'offline', assigned_task = NULL,
            deadline = NULL, session_token = NULL WHERE id = ?"#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let freed_task = match assigned {
            Some(task_id) => {
                let updated = sqlx::query(
                    r#"UPDATE grading_tasks SET status = 'pending', error = ?,
                    updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ','now')
                    WHERE id = ? AND status = 'executing'"#,
                )
                .bind("testbed went offline mid-execution")
                .bind(task_id)
                .execute(&mut *tx)
                .await?;
                (updated.rows_affected() > 0).then_some(task_id)
            }
            None => None,
        };
        tx.commit().await?;
        Ok(SweepAction {
            applied: true,
            freed_task,
        })
    }

    pub(super) async fn abandoned_testbeds_impl(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Testbed>> {
        let rows = sqlx::query_as::<_, TestbedRow>(
            "SELECT * FROM testbeds WHERE datetime(last_report_at) <= datetime(?) ORDER BY id",
        )
        .bind(fmt_ts(cutoff))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Self::map_testbed).collect())
    }

    pub(super) async fn purge_testbed_impl(
        &self,
        id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<SweepAction> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"SELECT assigned_task FROM testbeds WHERE id = ?
            AND datetime(last_report_at) <= datetime(?)"#,
        )
        .bind(id)
        .bind(fmt_ts(cutoff))
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(SweepAction::skipped());
        };
        let assigned: Option<i64> = row.get("assigned_task");

        let freed_task = match assigned {
            Some(task_id) => {
                let updated = sqlx::query(
                    r#"UPDATE grading_tasks SET status = 'pending', error = ?,
                    updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ','now')
                    WHERE id = ? AND status = 'executing'"#,
                )
                .bind("testbed record purged mid-execution")
                .bind(task_id)
                .execute(&mut *tx)
                .await?;
                (updated.rows_affected() > 0).then_some(task_id)
            }
            None => None,
        };

        sqlx::query("DELETE FROM testbeds WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(SweepAction {
            applied: true,
            freed_task,
        })
    }

    pub(super) async fn expired_assignments_impl(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Testbed>> {
        let rows = sqlx::query_as::<_, TestbedRow>(
            r#"SELECT * FROM testbeds WHERE status = 'busy'
            AND deadline IS NOT NULL AND datetime(deadline) <= datetime(?) ORDER BY id"#,
        )
        .bind(fmt_ts(now))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Self::map_testbed).collect())
    }

    pub(super) async fn release_expired_assignment_impl(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<SweepAction> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"SELECT assigned_task FROM testbeds WHERE id = ? AND status = 'busy'
            AND deadline IS NOT NULL AND datetime(deadline) <= datetime(?)"#,
        )
        .bind(id)
        .bind(fmt_ts(now))
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(SweepAction::skipped());
        };
        let assigned: Option<i64> = row.get("assigned_task");

        sqlx::query(
            r#"UPDATE testbeds SET status = 'available', assigned_task = NULL,
            deadline = NULL, session_token = NULL WHERE id = ?"#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let freed_task = match assigned {
            Some(task_id) => {
                let updated = sqlx::query(
                    r#"UPDATE grading_tasks SET status = 'pending', error = ?,
                    updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ','now')
                    WHERE id = ? AND status = 'executing'"#,
                )
                .bind("execution deadline expired")
                .bind(task_id)
                .execute(&mut *tx)
                .await?;
                (updated.rows_affected() > 0).then_some(task_id)
            }
            None => None,
        };
        tx.commit().await?;
        Ok(SweepAction {
            applied: true,
            freed_task,
        })
    }

    /// The assignment CAS: both the testbed and the task must still be in
    /// their pre-assignment states or the whole transaction rolls back.
    pub(super) async fn begin_assignment_impl(
        &self,
        testbed_id: &str,
        task_id: i64,
        deadline: DateTime<Utc>,
        token: Uuid,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let bed = sqlx::query(
            r#"UPDATE testbeds SET status = 'busy', assigned_task = ?, deadline = ?, session_token = ?
            WHERE id = ? AND status = 'available' AND assigned_task IS NULL"#,
        )
        .bind(task_id)
        .bind(fmt_ts(deadline))
        .bind(token.to_string())
        .bind(testbed_id)
        .execute(&mut *tx)
        .await?;
        if bed.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        let task = sqlx::query(
            r#"UPDATE grading_tasks SET status = 'executing', outcome = 'unknown', points = 0,
            detail = NULL, output_paths = NULL, error = NULL,
            updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ','now')
            WHERE id = ? AND status = 'pending'"#,
        )
        .bind(task_id)
        .execute(&mut *tx)
        .await?;
        if task.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }

    /// Undoes an assignment whose dispatch failed. Guarded by the session
    /// token so a later assignment generation is never clobbered.
    pub(super) async fn revert_assignment_impl(
        &self,
        testbed_id: &str,
        token: Uuid,
        to_status: TestbedStatus,
        reason: &str,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT assigned_task FROM testbeds WHERE id = ? AND session_token = ? AND status = 'busy'",
        )
        .bind(testbed_id)
        .bind(token.to_string())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };
        let assigned: Option<i64> = row.get("assigned_task");

        sqlx::query(
            r#"UPDATE testbeds SET status = ?, assigned_task = NULL,
            deadline = NULL, session_token = NULL WHERE id = ?"#,
        )
        .bind(to_status.as_str())
        .bind(testbed_id)
        .execute(&mut *tx)
        .await?;

        if let Some(task_id) = assigned {
            sqlx::query(
                r#"UPDATE grading_tasks SET status = 'pending', error = ?,
                updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ','now')
                WHERE id = ? AND status = 'executing'"#,
            )
            .bind(reason)
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(true)
    }
}

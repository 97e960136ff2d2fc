use anyhow::Result;
use chrono::{Duration, Utc};

use gantry_core::models::SchedulerLease;
use gantry_core::store::LeaseAcquire;

use super::core::{LeaseRow, SqliteStore};

impl SqliteStore {
    /// Takes the singleton scheduler lease. A fresh lease held by somebody
    /// else wins; a lease whose heartbeat is older than the TTL is taken over.
    pub(super) async fn acquire_lease_impl(
        &self,
        owner_pid: i64,
        hostname: &str,
        ttl_secs: i64,
    ) -> Result<LeaseAcquire> {
        let mut tx = self.pool.begin().await?;
        let holder = sqlx::query_as::<_, LeaseRow>("SELECT * FROM scheduler_lease WHERE id = 1")
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(row) = holder {
            let holder = Self::map_lease(row);
            let fresh = holder.heartbeat_at > Utc::now() - Duration::seconds(ttl_secs);
            let same_owner = holder.owner_pid == owner_pid && holder.hostname == hostname;
            if fresh && !same_owner {
                tx.rollback().await?;
                return Ok(LeaseAcquire::Held(holder));
            }
        }

        let row = sqlx::query_as::<_, LeaseRow>(
            r#"INSERT INTO scheduler_lease (id, owner_pid, hostname, started_at, heartbeat_at)
            VALUES (1, ?, ?, STRFTIME('%Y-%m-%dT%H:%M:%fZ','now'), STRFTIME('%Y-%m-%dT%H:%M:%fZ','now'))
            ON CONFLICT(id) DO UPDATE SET owner_pid = excluded.owner_pid,
            hostname = excluded.hostname, started_at = excluded.started_at,
            heartbeat_at = excluded.heartbeat_at
            RETURNING *"#,
        )
        .bind(owner_pid)
        .bind(hostname)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(LeaseAcquire::Acquired(Self::map_lease(row)))
    }

    pub(super) async fn renew_lease_impl(&self, owner_pid: i64, hostname: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE scheduler_lease SET heartbeat_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ','now')
            WHERE id = 1 AND owner_pid = ? AND hostname = ?"#,
        )
        .bind(owner_pid)
        .bind(hostname)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(super) async fn get_lease_impl(&self) -> Result<Option<SchedulerLease>> {
        let row = sqlx::query_as::<_, LeaseRow>("SELECT * FROM scheduler_lease WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Self::map_lease))
    }

    pub(super) async fn release_lease_impl(&self, owner_pid: i64, hostname: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM scheduler_lease WHERE id = 1 AND owner_pid = ? AND hostname = ?")
                .bind(owner_pid)
                .bind(hostname)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

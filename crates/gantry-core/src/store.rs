use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    ExecOutcome, GradingTask, ProbeOutcome, QueuedTask, ReportKind, ReportedStatus, SchedulerLease,
    Submission, TaskDef, Testbed, TestbedStatus,
};

#[derive(Debug, Clone)]
pub struct NewTaskDef {
    pub name: String,
    pub capability: String,
    pub execution_secs: i64,
    pub points: f64,
    pub input_fields: Vec<String>,
    pub output_fields: Vec<String>,
    pub score_command: String,
}

#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub reference: String,
    pub artifacts: HashMap<String, String>,
    /// Definition names to grade; empty means every known definition.
    pub tasks: Vec<String>,
}

/// Outcome of one guarded sweep action against a single testbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepAction {
    pub applied: bool,
    pub freed_task: Option<i64>,
}

impl SweepAction {
    pub fn skipped() -> Self {
        Self {
            applied: false,
            freed_task: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LeaseAcquire {
    Acquired(SchedulerLease),
    Held(SchedulerLease),
}

#[async_trait]
pub trait TestbedRepository: Send + Sync {
    /// Registration callback. Creates unknown boards in UNKNOWN state,
    /// refreshes address/capability/liveness for known ones.
    async fn upsert_testbed_report(
        &self,
        id: &str,
        address: &str,
        capability: &str,
    ) -> Result<ReportKind>;

    /// Heartbeat callback. Returns false for ids never registered.
    async fn record_status_report(&self, id: &str, reported: ReportedStatus) -> Result<bool>;

    async fn apply_probe_outcome(&self, id: &str, outcome: ProbeOutcome) -> Result<()>;

    async fn get_testbed(&self, id: &str) -> Result<Option<Testbed>>;

    async fn list_testbeds(&self) -> Result<Vec<Testbed>>;

    async fn available_testbeds(&self) -> Result<Vec<Testbed>>;

    async fn stale_testbeds(&self, cutoff: DateTime<Utc>) -> Result<Vec<Testbed>>;

    async fn mark_testbed_offline(&self, id: &str, cutoff: DateTime<Utc>) -> Result<SweepAction>;

    async fn abandoned_testbeds(&self, cutoff: DateTime<Utc>) -> Result<Vec<Testbed>>;

    /// Deletes a testbed regardless of state; a still-assigned task is
    /// requeued first. The cutoff re-check keeps the delete idempotent.
    async fn purge_testbed(&self, id: &str, cutoff: DateTime<Utc>) -> Result<SweepAction>;

    async fn expired_assignments(&self, now: DateTime<Utc>) -> Result<Vec<Testbed>>;

    async fn release_expired_assignment(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<SweepAction>;

    /// Compare-and-set assignment: requires the testbed AVAILABLE and the
    /// task PENDING, flips them to BUSY/EXECUTING with a fresh deadline and
    /// session token in one transaction. Returns false when either side
    /// changed underneath the sweep.
    async fn begin_assignment(
        &self,
        testbed_id: &str,
        task_id: i64,
        deadline: DateTime<Utc>,
        token: Uuid,
    ) -> Result<bool>;

    /// Token-guarded rollback of an assignment whose dispatch failed. A
    /// stale token makes this a no-op returning false.
    async fn revert_assignment(
        &self,
        testbed_id: &str,
        token: Uuid,
        to_status: TestbedStatus,
        reason: &str,
    ) -> Result<bool>;
}

#[async_trait]
pub trait TaskDefRepository: Send + Sync {
    async fn create_task_def(&self, def: NewTaskDef) -> Result<TaskDef>;

    async fn get_task_def(&self, id: i64) -> Result<Option<TaskDef>>;

    async fn get_task_def_by_name(&self, name: &str) -> Result<Option<TaskDef>>;

    async fn list_task_defs(&self) -> Result<Vec<TaskDef>>;
}

#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    /// Creates a submission plus one grading task per known definition:
    /// requested ones PENDING, the rest SKIPPED.
    async fn enqueue_submission(
        &self,
        request: EnqueueRequest,
    ) -> Result<(Submission, Vec<GradingTask>)>;

    async fn get_submission(&self, id: i64) -> Result<Option<Submission>>;

    async fn list_submissions(&self) -> Result<Vec<Submission>>;

    /// Flips the submission to GRADED iff every task reached a terminal
    /// state; true only on the flip itself.
    async fn mark_submission_graded_if_complete(&self, id: i64) -> Result<bool>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// PENDING tasks with definition and submission context, ordered by
    /// (scope_width, submission_id, task_id).
    async fn queued_tasks(&self) -> Result<Vec<QueuedTask>>;

    async fn output_pending_tasks(&self) -> Result<Vec<GradingTask>>;

    async fn get_task(&self, id: i64) -> Result<Option<GradingTask>>;

    async fn list_tasks_for_submission(&self, submission_id: i64) -> Result<Vec<GradingTask>>;

    /// Records returned outputs in the same transaction that frees the
    /// testbed. Guarded by the session token; false means the callback was
    /// stale or duplicated.
    async fn store_task_output(
        &self,
        task_id: i64,
        token: Uuid,
        outcome: ExecOutcome,
        outputs: &HashMap<String, String>,
        note: Option<&str>,
    ) -> Result<bool>;

    async fn finalize_task(&self, task_id: i64, points: f64, detail: &str) -> Result<bool>;

    async fn reset_task_pending(&self, task_id: i64, reason: &str) -> Result<bool>;

    async fn mark_task_internal_error(&self, task_id: i64, error: &str) -> Result<bool>;

    async fn task_status_counts(&self) -> Result<Vec<(String, i64)>>;
}

#[async_trait]
pub trait LeaseRepository: Send + Sync {
    /// Takes the singleton scheduler lease. Refused while another holder's
    /// heartbeat is younger than the TTL.
    async fn acquire_lease(
        &self,
        owner_pid: i64,
        hostname: &str,
        ttl_secs: i64,
    ) -> Result<LeaseAcquire>;

    async fn renew_lease(&self, owner_pid: i64, hostname: &str) -> Result<bool>;

    async fn get_lease(&self) -> Result<Option<SchedulerLease>>;

    async fn release_lease(&self, owner_pid: i64, hostname: &str) -> Result<bool>;
}

#[async_trait]
pub trait Store:
    TestbedRepository + TaskDefRepository + SubmissionRepository + TaskRepository + LeaseRepository
{
    async fn run_migrations(&self) -> Result<()>;
}

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::dispatch::{DispatchJob, DispatchOutcome, TestbedClient};
use crate::error::{GantryError, GantryResult};
use crate::evaluate::{Evaluator, ScoreRunner};
use crate::models::{QueuedTask, TestbedStatus, assignment_deadline};
use crate::store::Store;

/// What one sweep did, phase by phase.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub purged: usize,
    pub offlined: usize,
    pub expired: usize,
    pub assigned: usize,
    pub evaluated: usize,
}

impl SweepSummary {
    fn any(&self) -> bool {
        self.purged + self.offlined + self.expired + self.assigned + self.evaluated > 0
    }
}

/// The single writer over testbeds and grading tasks. Every interval it runs
/// the sweep phases in a fixed order: purge abandoned boards, mark stale
/// boards offline, reclaim expired assignments, hand out queued tasks, then
/// evaluate returned outputs. Board callbacks only ever touch their own
/// assignment generation (via session tokens), so phases stay correct even
/// with the web API writing concurrently.
pub struct Scheduler<S, C, R> {
    store: Arc<S>,
    client: Arc<C>,
    evaluator: Evaluator<S, R>,
    config: SchedulerConfig,
}

impl<S, C, R> Scheduler<S, C, R>
where
    S: Store + 'static,
    C: TestbedClient + 'static,
    R: ScoreRunner + 'static,
{
    pub fn new(store: Arc<S>, client: Arc<C>, runner: Arc<R>) -> Self {
        Self::new_with_config(store, client, runner, SchedulerConfig::default())
    }

    pub fn new_with_config(
        store: Arc<S>,
        client: Arc<C>,
        runner: Arc<R>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            evaluator: Evaluator::new(store.clone(), runner),
            store,
            client,
            config,
        }
    }

    /// Sweep forever. The caller must already hold the scheduler lease; the
    /// loop renews it each tick and stops if another scheduler takes it.
    pub async fn run(&self) -> Result<()> {
        let pid = std::process::id() as i64;
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        info!(
            interval_secs = self.config.sweep_interval_secs,
            "scheduler loop starting"
        );
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs_f64(
            self.config.sweep_interval_secs.max(0.001),
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            match self.store.renew_lease(pid, &host).await {
                Ok(true) => {}
                Ok(false) => {
                    let holder = self.store.get_lease().await.ok().flatten();
                    error!(holder = ?holder, "scheduler lease lost, stopping");
                    match holder {
                        Some(lease) => {
                            bail!(GantryError::LeaseHeld {
                                pid: lease.owner_pid,
                                hostname: lease.hostname,
                            })
                        }
                        None => bail!("scheduler lease disappeared"),
                    }
                }
                Err(err) => {
                    // Without a renewed lease this tick does not get to act.
                    warn!(error = %format!("{err:#}"), "lease renewal failed, skipping sweep");
                    continue;
                }
            }

            match self.sweep_once().await {
                Ok(summary) if summary.any() => {
                    info!(
                        purged = summary.purged,
                        offlined = summary.offlined,
                        expired = summary.expired,
                        assigned = summary.assigned,
                        evaluated = summary.evaluated,
                        "sweep done"
                    );
                }
                Ok(_) => {}
                Err(err) => error!(error = %format!("{err:#}"), "sweep failed"),
            }
        }
    }

    /// One full pass over the five phases, in order. Public so operators and
    /// tests can drive the scheduler tick by tick.
    pub async fn sweep_once(&self) -> Result<SweepSummary> {
        let now = Utc::now();
        Ok(SweepSummary {
            purged: self.purge_abandoned(now).await?,
            offlined: self.sweep_stale(now).await?,
            expired: self.sweep_deadlines(now).await?,
            assigned: self.assign_pending(now).await?,
            evaluated: self.check_outputs().await?,
        })
    }

    async fn purge_abandoned(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::seconds(self.config.purge_after_secs);
        let abandoned = self.store.abandoned_testbeds(cutoff).await?;
        let mut purged = 0;
        for testbed in abandoned {
            let action = self.store.purge_testbed(&testbed.id, cutoff).await?;
            if action.applied {
                purged += 1;
                warn!(
                    testbed = %testbed.id,
                    requeued_task = ?action.freed_task,
                    "testbed silent too long, record purged"
                );
            }
        }
        Ok(purged)
    }

    async fn sweep_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::seconds(self.config.offline_after_secs);
        let stale = self.store.stale_testbeds(cutoff).await?;
        let mut offlined = 0;
        for testbed in stale {
            let action = self.store.mark_testbed_offline(&testbed.id, cutoff).await?;
            if action.applied {
                offlined += 1;
                warn!(
                    testbed = %testbed.id,
                    requeued_task = ?action.freed_task,
                    "testbed stopped reporting, marked offline"
                );
            }
        }
        Ok(offlined)
    }

    async fn sweep_deadlines(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.store.expired_assignments(now).await?;
        let mut released = 0;
        for testbed in expired {
            // Ask the board to stop before detaching; best effort, the
            // release below does not wait for it.
            if let Some(token) = testbed.session_token {
                let client = self.client.clone();
                let address = testbed.address.clone();
                let id = testbed.id.clone();
                tokio::spawn(async move {
                    if let Err(err) = client.abort(&address, token).await {
                        debug!(testbed = %id, error = %format!("{err:#}"), "abort request failed");
                    }
                });
            }

            let action = self
                .store
                .release_expired_assignment(&testbed.id, now)
                .await?;
            if action.applied {
                released += 1;
                warn!(
                    testbed = %testbed.id,
                    requeued_task = ?action.freed_task,
                    "assignment deadline expired, task requeued"
                );
            }
        }
        Ok(released)
    }

    async fn assign_pending(&self, now: DateTime<Utc>) -> Result<usize> {
        let available = self.store.available_testbeds().await?;
        if available.is_empty() {
            return Ok(0);
        }
        let queue = self.store.queued_tasks().await?;
        if queue.is_empty() {
            return Ok(0);
        }

        let mut taken: HashSet<i64> = HashSet::new();
        let mut jobs: Vec<DispatchJob> = Vec::new();

        'testbeds: for testbed in &available {
            for task in &queue {
                if task.capability != testbed.capability || taken.contains(&task.task_id) {
                    continue;
                }

                let inputs = match resolve_inputs(task).await {
                    Ok(inputs) => inputs,
                    Err(err) => {
                        warn!(
                            task = task.task_id,
                            error = %err,
                            "input artifacts unresolvable, task failed"
                        );
                        self.store
                            .mark_task_internal_error(task.task_id, &err.to_string())
                            .await?;
                        if self
                            .store
                            .mark_submission_graded_if_complete(task.submission_id)
                            .await?
                        {
                            info!(submission = task.submission_id, "submission fully graded");
                        }
                        taken.insert(task.task_id);
                        continue;
                    }
                };

                let token = Uuid::new_v4();
                let deadline =
                    assignment_deadline(now, task.execution_secs, self.config.grace_period_secs);
                if !self
                    .store
                    .begin_assignment(&testbed.id, task.task_id, deadline, token)
                    .await?
                {
                    // The testbed or the task changed under us; callbacks
                    // may land between the snapshot and the CAS.
                    debug!(
                        testbed = %testbed.id,
                        task = task.task_id,
                        "assignment lost to a concurrent update"
                    );
                    continue 'testbeds;
                }

                taken.insert(task.task_id);
                info!(
                    testbed = %testbed.id,
                    task = task.task_id,
                    submission = task.submission_id,
                    deadline = %deadline,
                    "task assigned"
                );
                jobs.push(DispatchJob {
                    testbed_id: testbed.id.clone(),
                    address: testbed.address.clone(),
                    task_id: task.task_id,
                    def_name: task.def_name.clone(),
                    execution_secs: task.execution_secs,
                    token,
                    inputs,
                });
                continue 'testbeds;
            }
        }

        let assigned = jobs.len();
        if assigned > 0 {
            // Dispatch after the assignments are committed; the sweep does
            // not wait for the HTTP calls.
            let store = self.store.clone();
            let client = self.client.clone();
            let limit = self.config.max_concurrent_dispatches.max(1);
            tokio::spawn(async move {
                stream::iter(jobs)
                    .for_each_concurrent(limit, |job| {
                        dispatch_and_settle(store.clone(), client.clone(), job)
                    })
                    .await;
            });
        }
        Ok(assigned)
    }

    async fn check_outputs(&self) -> Result<usize> {
        let tasks = self.store.output_pending_tasks().await?;
        let mut evaluated = 0;
        for task in tasks {
            match self.evaluator.evaluate(&task).await {
                Ok(_) => evaluated += 1,
                Err(err) => {
                    error!(
                        task = task.id,
                        error = %format!("{err:#}"),
                        "evaluation failed, task left for inspection"
                    );
                }
            }
        }
        Ok(evaluated)
    }
}

async fn resolve_inputs(task: &QueuedTask) -> GantryResult<Vec<(String, String)>> {
    let mut inputs = Vec::with_capacity(task.input_fields.len());
    for field in &task.input_fields {
        let path = task
            .artifacts
            .get(field)
            .ok_or_else(|| GantryError::MissingArtifact {
                submission: task.submission_id,
                field: field.clone(),
            })?;
        let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
        if !exists {
            return Err(GantryError::MissingArtifact {
                submission: task.submission_id,
                field: field.clone(),
            });
        }
        inputs.push((field.clone(), path.clone()));
    }
    Ok(inputs)
}

async fn dispatch_and_settle<S, C>(store: Arc<S>, client: Arc<C>, job: DispatchJob)
where
    S: Store,
    C: TestbedClient,
{
    match client.dispatch(&job).await {
        DispatchOutcome::Accepted => {
            debug!(testbed = %job.testbed_id, task = job.task_id, "dispatch accepted");
        }
        DispatchOutcome::Rejected { status, body } => {
            warn!(
                testbed = %job.testbed_id,
                task = job.task_id,
                status,
                body = %body,
                "dispatch rejected, reverting assignment"
            );
            settle_revert(&store, &job, TestbedStatus::Available, "dispatch rejected by testbed")
                .await;
        }
        DispatchOutcome::Unreachable { error } => {
            warn!(
                testbed = %job.testbed_id,
                task = job.task_id,
                error = %error,
                "testbed unreachable, marking offline"
            );
            settle_revert(&store, &job, TestbedStatus::Offline, "testbed unreachable at dispatch")
                .await;
        }
    }
}

async fn settle_revert<S: Store>(store: &Arc<S>, job: &DispatchJob, to: TestbedStatus, reason: &str) {
    match store
        .revert_assignment(&job.testbed_id, job.token, to, reason)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            debug!(
                testbed = %job.testbed_id,
                task = job.task_id,
                "revert skipped, assignment already superseded"
            );
        }
        Err(err) => {
            error!(
                testbed = %job.testbed_id,
                task = job.task_id,
                error = %format!("{err:#}"),
                "failed to revert assignment"
            );
        }
    }
}

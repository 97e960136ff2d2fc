use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::GantryError;
use crate::models::{ExecOutcome, GradingTask, TaskDef, clamp_score};
use crate::store::Store;

/// What a score command must print on stdout: one JSON object line with the
/// normalized score and a free-text explanation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoreReport {
    pub score: f64,
    #[serde(default)]
    pub detail: String,
}

#[async_trait]
pub trait ScoreRunner: Send + Sync {
    async fn run(&self, command: &str, outputs: &[(String, String)]) -> Result<ScoreReport>;
}

/// Runs the score command as a child process through `sh -c`, passing each
/// returned output as `--<field> <path>`. The last stdout line that parses
/// as a report wins, so scorers may log freely above it.
pub struct SubprocessScoreRunner {
    timeout: Duration,
}

impl SubprocessScoreRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ScoreRunner for SubprocessScoreRunner {
    async fn run(&self, command: &str, outputs: &[(String, String)]) -> Result<ScoreReport> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(format!("{command} \"$@\"")).arg("sh");
        for (field, path) in outputs {
            cmd.arg(format!("--{field}")).arg(path);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .with_context(|| format!("spawn score command '{command}'"))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.with_context(|| format!("run score command '{command}'"))?,
            Err(_) => {
                bail!(
                    "score command '{command}' timed out after {}s",
                    self.timeout.as_secs_f64()
                );
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "score command '{command}' exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str::<ScoreReport>(line.trim()).ok())
            .ok_or_else(|| {
                GantryError::ScoreReport {
                    command: command.to_string(),
                    reason: "no stdout line parsed as a score report".to_string(),
                }
                .into()
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evaluation {
    Finalized { points: f64 },
    Requeued,
}

/// Settles OUTPUT_PENDING tasks: faults finish with zero points, everything
/// else goes through the score command. Scorer trouble is transient and
/// requeues the task; a broken output record is not and stays put.
pub struct Evaluator<S, R> {
    store: Arc<S>,
    runner: Arc<R>,
}

impl<S, R> Evaluator<S, R>
where
    S: Store,
    R: ScoreRunner,
{
    pub fn new(store: Arc<S>, runner: Arc<R>) -> Self {
        Self { store, runner }
    }

    pub async fn evaluate(&self, task: &GradingTask) -> Result<Evaluation> {
        let def = self
            .store
            .get_task_def(task.task_def_id)
            .await?
            .with_context(|| {
                format!(
                    "task {} references unknown definition {}",
                    task.id, task.task_def_id
                )
            })?;

        if task.outcome == ExecOutcome::Fault {
            let detail = task
                .detail
                .clone()
                .unwrap_or_else(|| "execution fault reported by testbed".to_string());
            self.store.finalize_task(task.id, 0.0, &detail).await?;
            info!(task = task.id, "execution fault, finished without points");
            self.close_out(task.submission_id).await?;
            return Ok(Evaluation::Finalized { points: 0.0 });
        }

        let outputs = ordered_outputs(task, &def)?;
        match self.runner.run(&def.score_command, &outputs).await {
            Ok(report) => {
                let points = def.points * clamp_score(report.score);
                self.store
                    .finalize_task(task.id, points, &report.detail)
                    .await?;
                info!(task = task.id, points, score = report.score, "task scored");
                self.close_out(task.submission_id).await?;
                Ok(Evaluation::Finalized { points })
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(task = task.id, error = %reason, "scoring failed, task requeued");
                self.store.reset_task_pending(task.id, &reason).await?;
                Ok(Evaluation::Requeued)
            }
        }
    }

    async fn close_out(&self, submission_id: i64) -> Result<()> {
        if self
            .store
            .mark_submission_graded_if_complete(submission_id)
            .await?
        {
            info!(submission = submission_id, "submission fully graded");
        }
        Ok(())
    }
}

/// Output paths in the definition's declared order. A missing field means
/// the record no longer matches its definition, which only configuration
/// drift can cause; that is surfaced instead of retried.
fn ordered_outputs(task: &GradingTask, def: &TaskDef) -> Result<Vec<(String, String)>> {
    let paths = task.output_paths.as_ref().ok_or(GantryError::OutputSchemaMismatch {
        task: task.id,
        field: "*".to_string(),
    })?;
    def.output_fields
        .iter()
        .map(|field| {
            paths
                .get(field)
                .map(|path| (field.clone(), path.clone()))
                .ok_or_else(|| {
                    GantryError::OutputSchemaMismatch {
                        task: task.id,
                        field: field.clone(),
                    }
                    .into()
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, body).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
        path.to_string_lossy().to_string()
    }

    fn outputs_one() -> Vec<(String, String)> {
        vec![("wave".to_string(), "/tmp/wave.vcd".to_string())]
    }

    #[tokio::test]
    async fn parses_report_from_stdout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_script(
            dir.path(),
            "score.sh",
            "#!/bin/sh\necho '{\"score\": 0.75, \"detail\": \"3/4 checks passed\"}'\n",
        );

        let runner = SubprocessScoreRunner::new(Duration::from_secs(5));
        let report = runner.run(&script, &outputs_one()).await.expect("report");
        assert_eq!(report.score, 0.75);
        assert_eq!(report.detail, "3/4 checks passed");
    }

    #[tokio::test]
    async fn last_parseable_line_wins_over_log_noise() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_script(
            dir.path(),
            "noisy.sh",
            "#!/bin/sh\necho 'loading waveform'\necho '{\"score\": 0.1}'\necho '{\"score\": 0.9, \"detail\": \"final\"}'\necho 'done'\n",
        );

        let runner = SubprocessScoreRunner::new(Duration::from_secs(5));
        let report = runner.run(&script, &outputs_one()).await.expect("report");
        assert_eq!(report.score, 0.9);
        assert_eq!(report.detail, "final");
    }

    #[tokio::test]
    async fn outputs_become_flag_arguments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_script(
            dir.path(),
            "args.sh",
            "#!/bin/sh\nprintf '{\"score\": 1.0, \"detail\": \"%s\"}\\n' \"$*\"\n",
        );

        let runner = SubprocessScoreRunner::new(Duration::from_secs(5));
        let report = runner.run(&script, &outputs_one()).await.expect("report");
        assert_eq!(report.detail, "--wave /tmp/wave.vcd");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_script(
            dir.path(),
            "broken.sh",
            "#!/bin/sh\necho 'simulator crashed' 1>&2\nexit 2\n",
        );

        let runner = SubprocessScoreRunner::new(Duration::from_secs(5));
        let err = runner.run(&script, &outputs_one()).await.expect_err("error");
        let message = format!("{err:#}");
        assert!(message.contains("exited with"), "got: {message}");
        assert!(message.contains("simulator crashed"), "got: {message}");
    }

    #[tokio::test]
    async fn garbage_stdout_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_script(
            dir.path(),
            "garbage.sh",
            "#!/bin/sh\necho 'score: lots'\n",
        );

        let runner = SubprocessScoreRunner::new(Duration::from_secs(5));
        let err = runner.run(&script, &outputs_one()).await.expect_err("error");
        assert!(format!("{err:#}").contains("no stdout line parsed"));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_script(dir.path(), "slow.sh", "#!/bin/sh\nsleep 5\n");

        let runner = SubprocessScoreRunner::new(Duration::from_millis(200));
        let err = runner.run(&script, &outputs_one()).await.expect_err("error");
        assert!(format!("{err:#}").contains("timed out"));
    }
}

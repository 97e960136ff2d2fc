use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use gantry_core::store::Store;

#[derive(Args)]
pub struct Tasks {
    /// Submission to inspect
    pub submission_id: i64,
}

impl Tasks {
    pub async fn execute(self, store: Arc<dyn Store>) -> Result<()> {
        let Some(submission) = store.get_submission(self.submission_id).await? else {
            println!("Submission {} not found", self.submission_id);
            return Ok(());
        };

        let tasks = store.list_tasks_for_submission(submission.id).await?;
        if tasks.is_empty() {
            println!("No tasks found for submission {}", submission.id);
            return Ok(());
        }

        let def_names: HashMap<i64, String> = store
            .list_task_defs()
            .await?
            .into_iter()
            .map(|def| (def.id, def.name))
            .collect();

        println!(
            "Tasks for submission {} ({}, {}):",
            submission.id,
            submission.reference,
            submission.status.as_str()
        );
        println!(
            "{:<8} {:<24} {:<16} {:<9} {:<8} {:<20} {:<30}",
            "ID", "Task", "Status", "Outcome", "Points", "Updated", "Detail"
        );
        println!("{}", "-".repeat(120));
        for task in tasks {
            let name = def_names
                .get(&task.task_def_id)
                .cloned()
                .unwrap_or_else(|| task.task_def_id.to_string());
            let updated = task.updated_at.format("%Y-%m-%d %H:%M:%S").to_string();
            let detail = task
                .detail
                .or(task.error)
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<8} {:<24} {:<16} {:<9} {:<8} {:<20} {:<30}",
                task.id,
                name,
                task.status.as_str(),
                task.outcome.as_str(),
                task.points,
                updated,
                detail,
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use gantry_core::store::{EnqueueRequest, NewTaskDef, SubmissionRepository, TaskDefRepository};
    use gantry_state::SqliteStore;

    #[tokio::test]
    async fn test_tasks_command_handles_missing_and_existing_submissions() {
        let store = Arc::new(SqliteStore::new(":memory:").await.expect("create store"));
        store.run_migrations().await.expect("migrate");

        Tasks { submission_id: 404 }
            .execute(store.clone())
            .await
            .expect("missing submission");

        store
            .create_task_def(NewTaskDef {
                name: "smoke".to_string(),
                capability: "fpga-xc7".to_string(),
                execution_secs: 120,
                points: 10.0,
                input_fields: vec!["bitstream".to_string()],
                output_fields: vec!["log".to_string()],
                score_command: "scorer".to_string(),
            })
            .await
            .expect("seed def");
        let (submission, _) = store
            .enqueue_submission(EnqueueRequest {
                reference: "student-42".to_string(),
                artifacts: HashMap::from([(
                    "bitstream".to_string(),
                    "/data/design.bit".to_string(),
                )]),
                tasks: vec![],
            })
            .await
            .expect("enqueue");

        Tasks {
            submission_id: submission.id,
        }
        .execute(store)
        .await
        .expect("existing submission");
    }
}

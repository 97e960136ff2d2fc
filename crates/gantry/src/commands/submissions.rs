use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use gantry_core::store::Store;

#[derive(Args)]
pub struct Submissions;

impl Submissions {
    pub async fn execute(self, store: Arc<dyn Store>) -> Result<()> {
        let submissions = store.list_submissions().await?;
        if submissions.is_empty() {
            println!("No submissions found");
            return Ok(());
        }

        println!("Submissions:");
        println!(
            "{:<8} {:<28} {:<10} {:<6} {:<20} {:<20}",
            "ID", "Reference", "Status", "Scope", "Created", "Graded"
        );
        println!("{}", "-".repeat(97));
        for submission in submissions {
            let created = submission.created_at.format("%Y-%m-%d %H:%M:%S").to_string();
            let graded = submission
                .graded_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<8} {:<28} {:<10} {:<6} {:<20} {:<20}",
                submission.id,
                submission.reference,
                submission.status.as_str(),
                submission.scope_width,
                created,
                graded,
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use gantry_core::store::{EnqueueRequest, NewTaskDef, SubmissionRepository, TaskDefRepository};
    use gantry_state::SqliteStore;

    #[tokio::test]
    async fn test_submissions_command_handles_empty_and_populated_queue() {
        let store = Arc::new(SqliteStore::new(":memory:").await.expect("create store"));
        store.run_migrations().await.expect("migrate");

        Submissions.execute(store.clone()).await.expect("empty queue");

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
        store
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

        Submissions.execute(store).await.expect("populated queue");
    }
}

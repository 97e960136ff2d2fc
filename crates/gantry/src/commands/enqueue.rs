use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Args;

use gantry_core::store::{EnqueueRequest, Store};

#[derive(Args)]
pub struct Enqueue {
    /// What is being graded (student id, commit hash, ...)
    #[arg(short, long)]
    pub reference: String,

    /// Artifact as field=path; repeat for several
    #[arg(short, long = "artifact")]
    pub artifacts: Vec<String>,

    /// Definition name to grade; repeat for several, every definition when omitted
    #[arg(short, long = "task")]
    pub tasks: Vec<String>,
}

impl Enqueue {
    pub async fn execute(self, store: Arc<dyn Store>) -> Result<()> {
        let mut artifacts = HashMap::new();
        for raw in &self.artifacts {
            let Some((field, path)) = raw.split_once('=') else {
                bail!("artifact must look like field=path, got '{raw}'");
            };
            artifacts.insert(field.to_string(), path.to_string());
        }

        let (submission, tasks) = store
            .enqueue_submission(EnqueueRequest {
                reference: self.reference,
                artifacts,
                tasks: self.tasks,
            })
            .await?;

        println!(
            "✓ Queued submission {} ({})",
            submission.id, submission.reference
        );

        let def_names: HashMap<i64, String> = store
            .list_task_defs()
            .await?
            .into_iter()
            .map(|def| (def.id, def.name))
            .collect();
        println!("{:<8} {:<24} {:<16}", "ID", "Task", "Status");
        println!("{}", "-".repeat(50));
        for task in tasks {
            let name = def_names
                .get(&task.task_def_id)
                .cloned()
                .unwrap_or_else(|| task.task_def_id.to_string());
            println!("{:<8} {:<24} {:<16}", task.id, name, task.status.as_str());
        }
        Ok(())
    }
}

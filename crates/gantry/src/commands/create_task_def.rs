use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Args;

use gantry_core::store::{NewTaskDef, Store};

#[derive(Args)]
pub struct CreateTaskDef {
    /// Definition name, unique across the fleet
    #[arg(short, long)]
    pub name: String,

    /// Capability tag a testbed must advertise to run this task
    #[arg(short, long)]
    pub capability: String,

    /// Expected execution time in seconds
    #[arg(short, long)]
    pub execution_secs: i64,

    /// Points a perfect score is worth
    #[arg(short, long)]
    pub points: f64,

    /// Artifact field shipped to the testbed; repeat for several
    #[arg(long = "input")]
    pub input_fields: Vec<String>,

    /// Output file field the testbed must return; repeat for several
    #[arg(long = "output")]
    pub output_fields: Vec<String>,

    /// Command that turns returned outputs into a score report
    #[arg(short, long)]
    pub score_command: String,
}

impl CreateTaskDef {
    pub async fn execute(self, store: Arc<dyn Store>) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("definition name must not be empty");
        }
        if self.execution_secs <= 0 {
            bail!("execution time must be positive");
        }
        if self.points < 0.0 {
            bail!("points must not be negative");
        }

        let def = store
            .create_task_def(NewTaskDef {
                name: self.name,
                capability: self.capability,
                execution_secs: self.execution_secs,
                points: self.points,
                input_fields: self.input_fields,
                output_fields: self.output_fields,
                score_command: self.score_command,
            })
            .await?;

        println!("✓ Created task definition: {}", def.name);
        println!("  ID: {}", def.id);
        println!("  Capability: {}", def.capability);
        println!("  Execution time: {}s", def.execution_secs);
        println!("  Points: {}", def.points);
        println!("  Inputs: {}", def.input_fields.join(", "));
        println!("  Outputs: {}", def.output_fields.join(", "));
        Ok(())
    }
}

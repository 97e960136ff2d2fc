use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use gantry_core::store::Store;

#[derive(Args)]
pub struct Testbeds;

impl Testbeds {
    pub async fn execute(self, store: Arc<dyn Store>) -> Result<()> {
        let testbeds = store.list_testbeds().await?;
        if testbeds.is_empty() {
            println!("No testbeds registered");
            return Ok(());
        }

        println!("Testbeds:");
        println!(
            "{:<20} {:<22} {:<14} {:<10} {:<8} {:<20}",
            "ID", "Address", "Capability", "Status", "Task", "Last report"
        );
        println!("{}", "-".repeat(99));
        for bed in testbeds {
            let task = bed
                .assigned_task
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            let last_report = bed.last_report_at.format("%Y-%m-%d %H:%M:%S").to_string();
            println!(
                "{:<20} {:<22} {:<14} {:<10} {:<8} {:<20}",
                bed.id,
                bed.address,
                bed.capability,
                bed.status.as_str(),
                task,
                last_report,
            );
        }
        Ok(())
    }
}

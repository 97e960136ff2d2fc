use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use gantry_core::models::TestbedStatus;
use gantry_core::store::Store;

#[derive(Args)]
pub struct Status;

impl Status {
    pub async fn execute(self, store: Arc<dyn Store>) -> Result<()> {
        let counts = store.task_status_counts().await?;
        if counts.is_empty() {
            println!("No grading tasks yet");
        } else {
            println!("Grading tasks:");
            println!("{:<16} {:>6}", "Status", "Count");
            println!("{}", "-".repeat(23));
            for (status, count) in &counts {
                println!("{:<16} {:>6}", status, count);
            }
        }

        let testbeds = store.list_testbeds().await?;
        let tally = |status: TestbedStatus| {
            testbeds.iter().filter(|bed| bed.status == status).count()
        };
        println!(
            "\nTestbeds: {} available, {} busy, {} offline, {} unknown",
            tally(TestbedStatus::Available),
            tally(TestbedStatus::Busy),
            tally(TestbedStatus::Offline),
            tally(TestbedStatus::Unknown),
        );

        match store.get_lease().await? {
            Some(lease) => {
                let heartbeat = lease.heartbeat_at.format("%Y-%m-%d %H:%M:%S").to_string();
                println!(
                    "Scheduler lease: pid {} on {} (heartbeat {})",
                    lease.owner_pid, lease.hostname, heartbeat
                );
            }
            None => println!("Scheduler lease: unheld"),
        }
        Ok(())
    }
}

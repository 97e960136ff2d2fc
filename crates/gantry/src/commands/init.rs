use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::info;

use gantry_core::store::Store;

#[derive(Args)]
pub struct Init;

impl Init {
    pub async fn execute(self, store: Arc<dyn Store>) -> Result<()> {
        info!("Running database migrations...");
        store.run_migrations().await?;
        println!("✓ Database initialized");
        Ok(())
    }
}

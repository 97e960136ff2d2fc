use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::dispatch::TestbedClient;
use crate::models::{ProbeOutcome, ReportKind, ReportedStatus, Testbed};
use crate::store::Store;

/// Handles the callbacks boards send about themselves. New and previously
/// offline boards must pass a live status probe before rejoining the pool.
pub struct Registry {
    store: Arc<dyn Store>,
    client: Arc<dyn TestbedClient>,
}

impl Registry {
    pub fn new(store: Arc<dyn Store>, client: Arc<dyn TestbedClient>) -> Self {
        Self { store, client }
    }

    pub async fn report(&self, id: &str, address: &str, capability: &str) -> Result<Testbed> {
        let kind = self
            .store
            .upsert_testbed_report(id, address, capability)
            .await?;

        match kind {
            ReportKind::Known => {}
            ReportKind::New | ReportKind::WasOffline => {
                let outcome = match self.client.probe(address).await {
                    Ok(ReportedStatus::Idle) => ProbeOutcome::Idle,
                    Ok(ReportedStatus::Testing) => {
                        // Board is mid-run with work we no longer track; it
                        // stays out of the pool until it reports idle.
                        ProbeOutcome::Testing
                    }
                    Err(err) => {
                        warn!(testbed = id, error = %format!("{err:#}"), "status probe failed");
                        ProbeOutcome::Unreachable
                    }
                };
                self.store.apply_probe_outcome(id, outcome).await?;
                info!(testbed = id, kind = ?kind, outcome = ?outcome, "testbed probed");
            }
        }

        self.store
            .get_testbed(id)
            .await?
            .context("testbed vanished after report upsert")
    }

    /// Returns false when the id was never registered.
    pub async fn record_status(&self, id: &str, reported: ReportedStatus) -> Result<bool> {
        self.store.record_status_report(id, reported).await
    }
}

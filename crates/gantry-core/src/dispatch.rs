use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::ReportedStatus;

/// Everything needed to hand one assigned task to a board.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub testbed_id: String,
    pub address: String,
    pub task_id: i64,
    pub def_name: String,
    pub execution_secs: i64,
    pub token: Uuid,
    /// field -> artifact path, in the definition's declared order.
    pub inputs: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Accepted,
    /// The board answered but refused the work. Status 0 means the request
    /// could not be built and was never sent.
    Rejected { status: u16, body: String },
    Unreachable { error: String },
}

#[async_trait]
pub trait TestbedClient: Send + Sync {
    async fn dispatch(&self, job: &DispatchJob) -> DispatchOutcome;

    async fn probe(&self, address: &str) -> Result<ReportedStatus>;

    async fn abort(&self, address: &str, token: Uuid) -> Result<()>;
}

/// Talks to the boards' own HTTP servers: `POST /run` multipart for
/// dispatch, `GET /status` for probes, `POST /abort` to stop stale work.
pub struct HttpTestbedClient {
    dispatch_client: reqwest::Client,
    probe_client: reqwest::Client,
}

impl HttpTestbedClient {
    pub fn new(dispatch_timeout: Duration, probe_timeout: Duration) -> Result<Self> {
        let dispatch_client = reqwest::Client::builder()
            .timeout(dispatch_timeout)
            .build()
            .context("build dispatch http client")?;
        let probe_client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .build()
            .context("build probe http client")?;
        Ok(Self {
            dispatch_client,
            probe_client,
        })
    }

    async fn build_run_form(job: &DispatchJob) -> Result<multipart::Form> {
        let mut form = multipart::Form::new()
            .text("token", job.token.to_string())
            .text("task", job.def_name.clone())
            .text("execution_time", job.execution_secs.to_string());
        for (field, path) in &job.inputs {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("read input artifact {path}"))?;
            let part = multipart::Part::bytes(bytes).file_name(field.clone());
            form = form.part(field.clone(), part);
        }
        Ok(form)
    }
}

#[async_trait]
impl TestbedClient for HttpTestbedClient {
    async fn dispatch(&self, job: &DispatchJob) -> DispatchOutcome {
        let form = match Self::build_run_form(job).await {
            Ok(form) => form,
            Err(err) => {
                return DispatchOutcome::Rejected {
                    status: 0,
                    body: format!("{err:#}"),
                };
            }
        };

        let url = format!("http://{}/run", job.address);
        match self.dispatch_client.post(&url).multipart(form).send().await {
            Ok(response) if response.status().is_success() => DispatchOutcome::Accepted,
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                DispatchOutcome::Rejected { status, body }
            }
            Err(err) => DispatchOutcome::Unreachable {
                error: err.to_string(),
            },
        }
    }

    async fn probe(&self, address: &str) -> Result<ReportedStatus> {
        #[derive(Deserialize)]
        struct StatusBody {
            status: ReportedStatus,
        }

        let url = format!("http://{address}/status");
        let response = self
            .probe_client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("probe {address}"))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("probe {address} returned {status}: {body}");
        }
        let body: StatusBody = response
            .json()
            .await
            .with_context(|| format!("decode probe response from {address}"))?;
        Ok(body.status)
    }

    async fn abort(&self, address: &str, token: Uuid) -> Result<()> {
        let url = format!("http://{address}/abort");
        let response = self
            .probe_client
            .post(&url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .with_context(|| format!("abort request to {address}"))?;
        if !response.status().is_success() {
            anyhow::bail!("abort request to {address} returned {}", response.status());
        }
        Ok(())
    }
}

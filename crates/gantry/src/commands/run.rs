use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use gantry_core::GantryError;
use gantry_core::config::SchedulerConfig;
use gantry_core::dispatch::HttpTestbedClient;
use gantry_core::evaluate::SubprocessScoreRunner;
use gantry_core::scheduler::Scheduler;
use gantry_core::store::{LeaseAcquire, Store};
use gantry_web::api::{ApiServer, build_router};

#[derive(Args)]
pub struct Run {
    /// Optional config file path (YAML)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Address to bind the callback API (e.g., 127.0.0.1:8080)
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub addr: String,

    /// Directory for the rolling scheduler log; stderr only when unset
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl Run {
    pub async fn execute<S>(self, store: Arc<S>) -> Result<()>
    where
        S: Store + 'static,
    {
        let addr: SocketAddr = self.addr.parse()?;

        store.run_migrations().await?;

        let config = if let Some(config_path) = self.config {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Missing config file: {config_path}"))?;
            serde_yaml::from_str::<SchedulerConfig>(&content)
                .with_context(|| format!("Invalid config file: {config_path}"))?
        } else {
            SchedulerConfig::default()
        };

        // The lease is taken before anything starts; a second scheduler on
        // the same database must refuse to run.
        let pid = std::process::id() as i64;
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        match store.acquire_lease(pid, &host, config.lease_ttl_secs).await? {
            LeaseAcquire::Acquired(_) => {
                info!(pid, host = %host, "scheduler lease acquired");
            }
            LeaseAcquire::Held(lease) => {
                return Err(GantryError::LeaseHeld {
                    pid: lease.owner_pid,
                    hostname: lease.hostname,
                }
                .into());
            }
        }

        let client = Arc::new(HttpTestbedClient::new(
            Duration::from_secs(config.dispatch_timeout_secs),
            Duration::from_secs(config.probe_timeout_secs),
        )?);
        let runner = Arc::new(SubprocessScoreRunner::new(Duration::from_secs(
            config.scoring_timeout_secs,
        )));
        let scheduler =
            Scheduler::new_with_config(store.clone(), client.clone(), runner, config.clone());

        // Callback API in the background
        let api = ApiServer::new(store.clone(), client, PathBuf::from(&config.data_dir));
        let web_handle = tokio::spawn(async move {
            let app = build_router(api);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            println!("Callback API listening on http://{}", addr);
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await?;
            Ok::<(), anyhow::Error>(())
        });

        // Sweep loop in the main task
        let scheduler_result = scheduler.run().await;

        web_handle.abort();
        if let Err(err) = store.release_lease(pid, &host).await {
            warn!(error = %format!("{err:#}"), "failed to release scheduler lease");
        }

        scheduler_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::store::LeaseRepository;
    use gantry_state::SqliteStore;
    use tokio::time::sleep;
    use uuid::Uuid;

    fn free_local_addr() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
        listener.local_addr().expect("local addr").to_string()
    }

    async fn setup_store() -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::new(":memory:").await.expect("create store"));
        store.run_migrations().await.expect("migrate");
        store
    }

    #[tokio::test]
    async fn test_run_command_errors_on_missing_config_file() {
        let store = setup_store().await;

        let result = Run {
            config: Some("/tmp/does-not-exist-config.yaml".to_string()),
            addr: free_local_addr(),
            log_dir: None,
        }
        .execute(store)
        .await;

        let err = result.err().expect("missing config should error");
        assert!(err.to_string().contains("Missing config file"));
    }

    #[tokio::test]
    async fn test_run_command_errors_on_invalid_yaml_config() {
        let store = setup_store().await;

        let path = std::env::temp_dir().join(format!("gantry-run-invalid-{}.yaml", Uuid::new_v4()));
        std::fs::write(&path, "this: [is: not-valid-yaml").expect("write invalid yaml");

        let result = Run {
            config: Some(path.to_string_lossy().to_string()),
            addr: free_local_addr(),
            log_dir: None,
        }
        .execute(store)
        .await;

        let _ = std::fs::remove_file(path);
        let err = result.err().expect("invalid config should error");
        assert!(err.to_string().contains("Invalid config file"));
    }

    #[tokio::test]
    async fn test_run_command_refuses_a_held_lease() {
        let store = setup_store().await;
        store
            .acquire_lease(999_999, "other-host", 3600)
            .await
            .expect("pre-acquire lease");

        let result = Run {
            config: None,
            addr: free_local_addr(),
            log_dir: None,
        }
        .execute(store)
        .await;

        let err = result.err().expect("held lease should refuse startup");
        match err.downcast_ref::<GantryError>() {
            Some(GantryError::LeaseHeld { pid, hostname }) => {
                assert_eq!(*pid, 999_999);
                assert_eq!(hostname, "other-host");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_command_uses_default_config() {
        let store = setup_store().await;

        let handle = tokio::spawn(async move {
            Run {
                config: None,
                addr: free_local_addr(),
                log_dir: None,
            }
            .execute(store)
            .await
        });
        sleep(Duration::from_millis(100)).await;
        handle.abort();
        let join = handle.await;
        assert!(join.is_err(), "aborted run should cancel task");
    }

    #[tokio::test]
    async fn test_run_command_uses_config_file() {
        let store = setup_store().await;

        let path = std::env::temp_dir().join(format!("gantry-run-valid-{}.yaml", Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"
sweep_interval_secs: 0.05
offline_after_secs: 60
grace_period_secs: 10
lease_ttl_secs: 30
max_concurrent_dispatches: 2
db_pool_size: 1
"#,
        )
        .expect("write valid yaml");

        let cfg_path = path.to_string_lossy().to_string();
        let handle = tokio::spawn(async move {
            Run {
                config: Some(cfg_path),
                addr: free_local_addr(),
                log_dir: None,
            }
            .execute(store)
            .await
        });
        sleep(Duration::from_millis(100)).await;
        handle.abort();
        let join = handle.await;
        let _ = std::fs::remove_file(path);
        assert!(join.is_err(), "aborted run should cancel task");
    }

    #[tokio::test]
    async fn test_run_command_starts_callback_api() {
        let store = setup_store().await;

        let addr = free_local_addr();
        let test_addr = addr.clone();
        let handle = tokio::spawn(async move {
            Run {
                config: None,
                addr,
                log_dir: None,
            }
            .execute(store)
            .await
        });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(response) = reqwest::get(format!("http://{}/health", test_addr)).await {
                assert!(response.status().is_success());
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("callback API never came up on {test_addr}");
            }
            sleep(Duration::from_millis(25)).await;
        }

        handle.abort();
    }
}

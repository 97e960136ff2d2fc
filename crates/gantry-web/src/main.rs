use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gantry_core::config::SchedulerConfig;
use gantry_core::dispatch::HttpTestbedClient;
use gantry_core::store::Store;
use gantry_state::SqliteStore;
use gantry_web::api::ApiServer;

#[derive(Parser, Debug)]
#[command(name = "gantry-web", about = "Serve the gantry callback and operator API")]
struct Args {
    /// Database connection string
    #[arg(long, default_value = "sqlite://gantry.db?mode=rwc")]
    database_url: String,
    /// Address to bind (e.g., 127.0.0.1:8080)
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let database_url = std::env::var("GANTRY_DATABASE_URL").unwrap_or(args.database_url);
    let config = SchedulerConfig::default();

    let store = Arc::new(SqliteStore::new_with_pool_size(&database_url, config.db_pool_size).await?);
    store.run_migrations().await?;

    let client = Arc::new(HttpTestbedClient::new(
        Duration::from_secs(config.dispatch_timeout_secs),
        Duration::from_secs(config.probe_timeout_secs),
    )?);
    let server = ApiServer::new(store, client, PathBuf::from(&config.data_dir));

    let addr: SocketAddr = args.addr.parse()?;
    server.serve(addr).await;
    println!("Callback API on http://{}", addr);
    futures::future::pending::<()>().await;
    Ok(())
}

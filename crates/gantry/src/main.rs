mod commands;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::Commands;
use gantry_core::config::SchedulerConfig;
use gantry_core::store::Store;
use gantry_state::SqliteStore;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Gantry - a grading-task scheduler for fleets of hardware testbeds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, default_value = "sqlite://gantry.db?mode=rwc")]
    database_url: String,
}

fn resolve_database_url(default_url: String) -> String {
    std::env::var("GANTRY_DATABASE_URL").unwrap_or(default_url)
}

/// With a log directory the daemon tees its output into a daily-rotated
/// file; plain commands log to stderr only.
fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "gantry.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(writer.and(std::io::stderr))
                .with_ansi(false)
                .finish();
            // Tests may initialize tracing multiple times; it's fine once a
            // global subscriber is already installed.
            let _ = tracing::subscriber::set_global_default(subscriber);
            Ok(Some(guard))
        }
        None => {
            let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
            Ok(None)
        }
    }
}

async fn dispatch_command<S>(command: Commands, store: Arc<S>) -> Result<()>
where
    S: Store + 'static,
{
    match command {
        Commands::Init(cmd) => cmd.execute(store).await?,
        Commands::Run(cmd) => cmd.execute(store).await?,
        Commands::CreateTaskDef(cmd) => cmd.execute(store).await?,
        Commands::Enqueue(cmd) => cmd.execute(store).await?,
        Commands::Testbeds(cmd) => cmd.execute(store).await?,
        Commands::Submissions(cmd) => cmd.execute(store).await?,
        Commands::Tasks(cmd) => cmd.execute(store).await?,
        Commands::Status(cmd) => cmd.execute(store).await?,
    }
    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    let Cli {
        command,
        database_url,
    } = cli;

    let database_url = resolve_database_url(database_url);
    let store = Arc::new(
        SqliteStore::new_with_pool_size(&database_url, SchedulerConfig::default().db_pool_size)
            .await?,
    );
    dispatch_command(command, store).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.command.log_dir())?;
    run_cli(cli).await
}

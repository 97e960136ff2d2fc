use std::path::Path;

use clap::Subcommand;

pub mod create_task_def;
pub mod enqueue;
pub mod init;
pub mod run;
pub mod status;
pub mod submissions;
pub mod tasks;
pub mod testbeds;

pub use create_task_def::CreateTaskDef;
pub use enqueue::Enqueue;
pub use init::Init;
pub use run::Run;
pub use status::Status;
pub use submissions::Submissions;
pub use tasks::Tasks;
pub use testbeds::Testbeds;

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database schema (or bring it up to date)
    Init(Init),

    /// Run the scheduler together with the callback API
    Run(Run),

    /// Register a grading-task definition
    CreateTaskDef(CreateTaskDef),

    /// Queue a submission for grading
    Enqueue(Enqueue),

    /// List the testbed fleet
    Testbeds(Testbeds),

    /// List submissions
    Submissions(Submissions),

    /// Show the grading tasks of one submission
    Tasks(Tasks),

    /// Show queue depth, fleet health and the scheduler lease
    Status(Status),
}

impl Commands {
    /// Only the run daemon writes a log file.
    pub fn log_dir(&self) -> Option<&Path> {
        match self {
            Commands::Run(cmd) => cmd.log_dir.as_deref(),
            _ => None,
        }
    }
}

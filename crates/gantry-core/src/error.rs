use thiserror::Error;

#[derive(Debug, Error)]
pub enum GantryError {
    #[error("unknown task definition '{0}'")]
    UnknownTaskDef(String),

    #[error("artifact map lacks field '{field}' required by task '{task}'")]
    IncompleteArtifacts { task: String, field: String },

    #[error("submission {submission} has no readable artifact for field '{field}'")]
    MissingArtifact { submission: i64, field: String },

    #[error("task {task} outputs are missing declared field '{field}'")]
    OutputSchemaMismatch { task: i64, field: String },

    #[error("score command '{command}' produced no usable report: {reason}")]
    ScoreReport { command: String, reason: String },

    #[error("scheduler lease held by pid {pid} on {hostname}")]
    LeaseHeld { pid: i64, hostname: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type GantryResult<T> = Result<T, GantryError>;

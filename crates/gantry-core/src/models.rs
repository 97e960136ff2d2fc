// Domain models shared by the scheduler, the state backend and the web API.
// Status strings are the persisted form; enums carry the transition rules.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestbedStatus {
    Unknown,
    Available,
    Busy,
    Offline,
}

impl TestbedStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "available" => Some(Self::Available),
            "busy" => Some(Self::Busy),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Available => "available",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }
}

impl std::str::FromStr for TestbedStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(())
    }
}

/// Liveness state a board reports about itself in a status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportedStatus {
    Idle,
    Testing,
}

impl ReportedStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "IDLE" => Some(Self::Idle),
            "TESTING" => Some(Self::Testing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Testing => "TESTING",
        }
    }
}

/// Result of probing a board that just registered or resurfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Idle,
    Testing,
    Unreachable,
}

/// How a registration callback related to the existing fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    New,
    Known,
    WasOffline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Testbed {
    pub id: String,
    pub address: String,
    pub capability: String,
    pub status: TestbedStatus,
    pub assigned_task: Option<i64>,
    pub deadline: Option<DateTime<Utc>>,
    pub session_token: Option<Uuid>,
    pub last_report_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDef {
    pub id: i64,
    pub name: String,
    pub capability: String,
    pub execution_secs: i64,
    pub points: f64,
    pub input_fields: Vec<String>,
    pub output_fields: Vec<String>,
    pub score_command: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Graded,
}

impl SubmissionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "graded" => Some(Self::Graded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Graded => "graded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub reference: String,
    pub artifacts: HashMap<String, String>,
    pub scope_width: i64,
    pub status: SubmissionStatus,
    pub created_at: DateTime<Utc>,
    pub graded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingStatus {
    Pending,
    Executing,
    OutputPending,
    Finished,
    InternalError,
    Skipped,
}

impl GradingStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "executing" => Some(Self::Executing),
            "output_pending" => Some(Self::OutputPending),
            "finished" => Some(Self::Finished),
            "internal_error" => Some(Self::InternalError),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::OutputPending => "output_pending",
            Self::Finished => "finished",
            Self::InternalError => "internal_error",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::InternalError | Self::Skipped)
    }
}

impl std::str::FromStr for GradingStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecOutcome {
    Unknown,
    Ok,
    Fault,
}

impl ExecOutcome {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "ok" => Some(Self::Ok),
            "fault" => Some(Self::Fault),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Ok => "ok",
            Self::Fault => "fault",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingTask {
    pub id: i64,
    pub submission_id: i64,
    pub task_def_id: i64,
    pub status: GradingStatus,
    pub outcome: ExecOutcome,
    pub points: f64,
    pub detail: Option<String>,
    pub output_paths: Option<HashMap<String, String>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pending task joined with its definition and submission so the assignment
/// phase needs a single query per sweep.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task_id: i64,
    pub submission_id: i64,
    pub task_def_id: i64,
    pub def_name: String,
    pub capability: String,
    pub execution_secs: i64,
    pub scope_width: i64,
    pub input_fields: Vec<String>,
    pub artifacts: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerLease {
    pub owner_pid: i64,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

pub fn assignment_deadline(
    now: DateTime<Utc>,
    execution_secs: i64,
    grace_period_secs: i64,
) -> DateTime<Utc> {
    now + Duration::seconds(execution_secs + grace_period_secs)
}

/// Scores outside [0, 1] are clamped; anything non-finite awards nothing.
pub fn clamp_score(score: f64) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    score.clamp(0.0, 1.0)
}

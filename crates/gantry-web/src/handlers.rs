use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use gantry_core::GantryError;
use gantry_core::models::{GradingTask, Submission, Testbed};
use gantry_core::store::{EnqueueRequest, Store};

use crate::api::{ApiServer, fmt_time};

#[derive(Serialize)]
pub(crate) struct TestbedInfo {
    pub id: String,
    pub address: String,
    pub capability: String,
    pub status: String,
    pub assigned_task: Option<i64>,
    pub deadline: Option<String>,
    pub last_report_at: String,
    pub created_at: String,
}

/// The session token is the write credential for output callbacks and never
/// leaves the server.
pub(crate) fn testbed_info(bed: Testbed) -> TestbedInfo {
    TestbedInfo {
        id: bed.id,
        address: bed.address,
        capability: bed.capability,
        status: bed.status.as_str().to_string(),
        assigned_task: bed.assigned_task,
        deadline: bed.deadline.map(fmt_time),
        last_report_at: fmt_time(bed.last_report_at),
        created_at: fmt_time(bed.created_at),
    }
}

#[derive(Serialize)]
pub(crate) struct SubmissionInfo {
    pub id: i64,
    pub reference: String,
    pub scope_width: i64,
    pub status: String,
    pub created_at: String,
    pub graded_at: Option<String>,
}

pub(crate) fn submission_info(submission: Submission) -> SubmissionInfo {
    SubmissionInfo {
        id: submission.id,
        reference: submission.reference,
        scope_width: submission.scope_width,
        status: submission.status.as_str().to_string(),
        created_at: fmt_time(submission.created_at),
        graded_at: submission.graded_at.map(fmt_time),
    }
}

#[derive(Serialize)]
pub(crate) struct GradingTaskInfo {
    pub id: i64,
    pub submission_id: i64,
    pub task: String,
    pub status: String,
    pub outcome: String,
    pub points: f64,
    pub detail: Option<String>,
    pub error: Option<String>,
    pub updated_at: String,
}

pub(crate) fn grading_task_info(task: GradingTask, def_names: &HashMap<i64, String>) -> GradingTaskInfo {
    GradingTaskInfo {
        id: task.id,
        submission_id: task.submission_id,
        task: def_names
            .get(&task.task_def_id)
            .cloned()
            .unwrap_or_else(|| task.task_def_id.to_string()),
        status: task.status.as_str().to_string(),
        outcome: task.outcome.as_str().to_string(),
        points: task.points,
        detail: task.detail,
        error: task.error,
        updated_at: fmt_time(task.updated_at),
    }
}

#[derive(Serialize)]
pub(crate) struct SubmissionDetail {
    pub submission: SubmissionInfo,
    pub tasks: Vec<GradingTaskInfo>,
}

pub(crate) async fn load_def_names(store: &dyn Store) -> anyhow::Result<HashMap<i64, String>> {
    let defs = store.list_task_defs().await?;
    Ok(defs.into_iter().map(|def| (def.id, def.name)).collect())
}

#[derive(Deserialize)]
pub(crate) struct EnqueueBody {
    reference: String,
    artifacts: HashMap<String, String>,
    #[serde(default)]
    tasks: Vec<String>,
}

pub(crate) async fn enqueue_submission(
    State(api): State<ApiServer>,
    Json(payload): Json<EnqueueBody>,
) -> impl IntoResponse {
    let request = EnqueueRequest {
        reference: payload.reference,
        artifacts: payload.artifacts,
        tasks: payload.tasks,
    };
    let (submission, tasks) = match api.store.enqueue_submission(request).await {
        Ok(created) => created,
        Err(err) => {
            return match err.downcast_ref::<GantryError>() {
                Some(GantryError::UnknownTaskDef(_))
                | Some(GantryError::IncompleteArtifacts { .. }) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()).into_response()
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            };
        }
    };

    let def_names = match load_def_names(&*api.store).await {
        Ok(map) => map,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    let tasks = tasks
        .into_iter()
        .map(|task| grading_task_info(task, &def_names))
        .collect();
    (
        StatusCode::CREATED,
        Json(SubmissionDetail {
            submission: submission_info(submission),
            tasks,
        }),
    )
        .into_response()
}

pub(crate) async fn submission_tasks(
    State(api): State<ApiServer>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let submission = match api.store.get_submission(id).await {
        Ok(Some(submission)) => submission,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    let task_rows = match api.store.list_tasks_for_submission(id).await {
        Ok(tasks) => tasks,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    let def_names = match load_def_names(&*api.store).await {
        Ok(map) => map,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    let tasks = task_rows
        .into_iter()
        .map(|task| grading_task_info(task, &def_names))
        .collect();
    Json(SubmissionDetail {
        submission: submission_info(submission),
        tasks,
    })
    .into_response()
}

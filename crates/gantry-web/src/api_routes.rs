use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};

use gantry_core::store::NewTaskDef;

use crate::api::{ApiServer, fmt_time, is_unique_violation};
use crate::handlers::{submission_info, testbed_info};

pub(crate) async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub(crate) async fn list_testbeds(State(api): State<ApiServer>) -> impl IntoResponse {
    match api.store.list_testbeds().await {
        Ok(beds) => Json(
            beds.into_iter()
                .map(testbed_info)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Serialize)]
struct TaskDefInfo {
    id: i64,
    name: String,
    capability: String,
    execution_secs: i64,
    points: f64,
    input_fields: Vec<String>,
    output_fields: Vec<String>,
    score_command: String,
    created_at: String,
}

fn task_def_info(def: gantry_core::models::TaskDef) -> TaskDefInfo {
    TaskDefInfo {
        id: def.id,
        name: def.name,
        capability: def.capability,
        execution_secs: def.execution_secs,
        points: def.points,
        input_fields: def.input_fields,
        output_fields: def.output_fields,
        score_command: def.score_command,
        created_at: fmt_time(def.created_at),
    }
}

pub(crate) async fn list_task_defs(State(api): State<ApiServer>) -> impl IntoResponse {
    match api.store.list_task_defs().await {
        Ok(defs) => Json(defs.into_iter().map(task_def_info).collect::<Vec<_>>()).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Deserialize)]
pub(crate) struct CreateTaskDefRequest {
    name: String,
    capability: String,
    execution_secs: i64,
    points: f64,
    #[serde(default)]
    input_fields: Vec<String>,
    #[serde(default)]
    output_fields: Vec<String>,
    score_command: String,
}

pub(crate) async fn create_task_def(
    State(api): State<ApiServer>,
    Json(payload): Json<CreateTaskDefRequest>,
) -> impl IntoResponse {
    if payload.name.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            "name must not be empty".to_string(),
        )
            .into_response();
    }
    if payload.execution_secs <= 0 {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            "execution_secs must be positive".to_string(),
        )
            .into_response();
    }
    if payload.points < 0.0 {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            "points must not be negative".to_string(),
        )
            .into_response();
    }

    let def = NewTaskDef {
        name: payload.name,
        capability: payload.capability,
        execution_secs: payload.execution_secs,
        points: payload.points,
        input_fields: payload.input_fields,
        output_fields: payload.output_fields,
        score_command: payload.score_command,
    };
    match api.store.create_task_def(def).await {
        Ok(created) => (StatusCode::CREATED, Json(task_def_info(created))).into_response(),
        Err(err) if is_unique_violation(&err) => {
            (StatusCode::CONFLICT, "definition name already taken".to_string()).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

pub(crate) async fn list_submissions(State(api): State<ApiServer>) -> impl IntoResponse {
    match api.store.list_submissions().await {
        Ok(submissions) => Json(
            submissions
                .into_iter()
                .map(submission_info)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Method, Request, StatusCode};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use gantry_core::dispatch::{DispatchJob, DispatchOutcome, TestbedClient};
use gantry_core::models::{ExecOutcome, GradingStatus, ProbeOutcome, ReportedStatus, TestbedStatus};
use gantry_core::store::{
    EnqueueRequest, NewTaskDef, Store, SubmissionRepository, TaskDefRepository, TaskRepository,
    TestbedRepository,
};
use gantry_state::SqliteStore;
use gantry_web::api::{ApiServer, build_router};

struct IdleProbe;

#[async_trait]
impl TestbedClient for IdleProbe {
    async fn dispatch(&self, _job: &DispatchJob) -> DispatchOutcome {
        DispatchOutcome::Accepted
    }

    async fn probe(&self, _address: &str) -> Result<ReportedStatus> {
        Ok(ReportedStatus::Idle)
    }

    async fn abort(&self, _address: &str, _token: Uuid) -> Result<()> {
        Ok(())
    }
}

async fn setup() -> (axum::Router, Arc<SqliteStore>, TempDir) {
    let store = Arc::new(SqliteStore::new(":memory:").await.expect("store"));
    store.run_migrations().await.expect("migrations");
    let dir = TempDir::new().expect("tempdir");
    let api = ApiServer::new(store.clone(), Arc::new(IdleProbe), dir.path().to_path_buf());
    let app = build_router(api).layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 9], 41000))));
    (app, store, dir)
}

async fn request_json(
    app: &axum::Router,
    method: Method,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, String) {
    let mut builder = Request::builder().method(method).uri(path);
    let body = if let Some(payload) = body {
        builder = builder.header("content-type", "application/json");
        Body::from(payload.to_string())
    } else {
        Body::empty()
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).expect("request body"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

fn multipart_body(boundary: &str, fields: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, bytes) in fields {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

async fn post_multipart(
    app: &axum::Router,
    path: &str,
    fields: &[(&str, Option<&str>, &[u8])],
) -> (StatusCode, String) {
    let boundary = "gantryboundary";
    let request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(multipart_body(boundary, fields)))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

async fn seed_executing_task(store: &SqliteStore) -> (i64, Uuid) {
    store
        .create_task_def(NewTaskDef {
            name: "smoke".to_string(),
            capability: "fpga-xc7".to_string(),
            execution_secs: 120,
            points: 10.0,
            input_fields: vec!["bitstream".to_string()],
            output_fields: vec!["log".to_string()],
            score_command: "scorer".to_string(),
        })
        .await
        .expect("task def");
    let (_, tasks) = store
        .enqueue_submission(EnqueueRequest {
            reference: "student-7".to_string(),
            artifacts: HashMap::from([("bitstream".to_string(), "/tmp/design.bit".to_string())]),
            tasks: vec!["smoke".to_string()],
        })
        .await
        .expect("submission");
    let task_id = tasks[0].id;
    store
        .upsert_testbed_report("bed-1", "10.0.0.7:9000", "fpga-xc7")
        .await
        .expect("report");
    store
        .apply_probe_outcome("bed-1", ProbeOutcome::Idle)
        .await
        .expect("probe");
    let token = Uuid::new_v4();
    assert!(
        store
            .begin_assignment("bed-1", task_id, Utc::now() + Duration::seconds(3600), token)
            .await
            .expect("assignment")
    );
    (task_id, token)
}

#[tokio::test]
async fn test_output_for_unknown_task_is_not_found() {
    let (app, _store, _dir) = setup().await;
    let token = Uuid::new_v4().to_string();
    let (status, _) = post_multipart(
        &app,
        "/api/tasks/999/output",
        &[("token", None, token.as_bytes()), ("outcome", None, b"ok")],
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_output_with_stale_token_conflicts() {
    let (app, store, _dir) = setup().await;
    let (task_id, _token) = seed_executing_task(&store).await;
    let wrong = Uuid::new_v4().to_string();

    let (status, _) = post_multipart(
        &app,
        &format!("/api/tasks/{task_id}/output"),
        &[
            ("token", None, wrong.as_bytes()),
            ("outcome", None, b"ok"),
            ("log", Some("log"), b"PASS\n"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // The callback changed nothing.
    let task = store.get_task(task_id).await.expect("get").expect("task");
    assert_eq!(task.status, GradingStatus::Executing);
}

#[tokio::test]
async fn test_output_stale_token_cannot_overwrite_current_files() {
    let (app, store, _dir) = setup().await;
    let (task_id, first_token) = seed_executing_task(&store).await;

    // First assignment dies at dispatch; the board keeps running anyway.
    assert!(
        store
            .revert_assignment("bed-1", first_token, TestbedStatus::Available, "dispatch failed")
            .await
            .expect("revert")
    );
    let current_token = Uuid::new_v4();
    assert!(
        store
            .begin_assignment(
                "bed-1",
                task_id,
                Utc::now() + Duration::seconds(3600),
                current_token,
            )
            .await
            .expect("reassignment")
    );

    let current = current_token.to_string();
    let (status, _) = post_multipart(
        &app,
        &format!("/api/tasks/{task_id}/output"),
        &[
            ("token", None, current.as_bytes()),
            ("outcome", None, b"ok"),
            ("log", Some("log"), b"PASS 6/6\n"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let task = store.get_task(task_id).await.expect("get").expect("task");
    let log_path = task
        .output_paths
        .as_ref()
        .and_then(|paths| paths.get("log"))
        .expect("recorded log path")
        .clone();
    assert_eq!(
        std::fs::read_to_string(&log_path).expect("log file"),
        "PASS 6/6\n"
    );

    // The dead first assignment reports in late.
    let stale = first_token.to_string();
    let (status, _) = post_multipart(
        &app,
        &format!("/api/tasks/{task_id}/output"),
        &[
            ("token", None, stale.as_bytes()),
            ("outcome", None, b"fault"),
            ("log", Some("log"), b"FAIL 0/6 bogus\n"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // The current generation's record and bytes both survive.
    let task = store.get_task(task_id).await.expect("get").expect("task");
    assert_eq!(task.status, GradingStatus::OutputPending);
    assert_eq!(task.outcome, ExecOutcome::Ok);
    assert_eq!(
        std::fs::read_to_string(&log_path).expect("log file"),
        "PASS 6/6\n"
    );
}

#[tokio::test]
async fn test_output_missing_declared_field_is_rejected() {
    let (app, store, _dir) = setup().await;
    let (task_id, token) = seed_executing_task(&store).await;
    let token_text = token.to_string();

    let (status, body) = post_multipart(
        &app,
        &format!("/api/tasks/{task_id}/output"),
        &[
            ("token", None, token_text.as_bytes()),
            ("outcome", None, b"ok"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body.contains("log"), "body: {body}");

    let task = store.get_task(task_id).await.expect("get").expect("task");
    assert_eq!(task.status, GradingStatus::Executing);
}

#[tokio::test]
async fn test_output_with_undeclared_field_is_rejected() {
    let (app, store, _dir) = setup().await;
    let (task_id, token) = seed_executing_task(&store).await;
    let token_text = token.to_string();

    let (status, body) = post_multipart(
        &app,
        &format!("/api/tasks/{task_id}/output"),
        &[
            ("token", None, token_text.as_bytes()),
            ("outcome", None, b"ok"),
            ("log", Some("log"), b"PASS\n"),
            ("waveform", Some("waveform"), b"vcd data"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("waveform"), "body: {body}");
}

#[tokio::test]
async fn test_output_fault_may_omit_files() {
    let (app, store, _dir) = setup().await;
    let (task_id, token) = seed_executing_task(&store).await;
    let token_text = token.to_string();

    let (status, _) = post_multipart(
        &app,
        &format!("/api/tasks/{task_id}/output"),
        &[
            ("token", None, token_text.as_bytes()),
            ("outcome", None, b"fault"),
            ("note", None, b"power rail sagged"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let task = store.get_task(task_id).await.expect("get").expect("task");
    assert_eq!(task.status, GradingStatus::OutputPending);
    assert_eq!(task.outcome, ExecOutcome::Fault);
    assert_eq!(task.detail.as_deref(), Some("power rail sagged"));
}

#[tokio::test]
async fn test_output_rejects_bogus_outcome_and_token() {
    let (app, store, _dir) = setup().await;
    let (task_id, token) = seed_executing_task(&store).await;
    let token_text = token.to_string();

    let (status, body) = post_multipart(
        &app,
        &format!("/api/tasks/{task_id}/output"),
        &[
            ("token", None, token_text.as_bytes()),
            ("outcome", None, b"exploded"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("outcome"), "body: {body}");

    let (status, _) = post_multipart(
        &app,
        &format!("/api/tasks/{task_id}/output"),
        &[
            ("token", None, b"not-a-uuid"),
            ("outcome", None, b"ok"),
            ("log", Some("log"), b"PASS\n"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_enqueue_rejects_unknown_defs_and_missing_artifacts() {
    let (app, store, _dir) = setup().await;

    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/submissions",
        Some(json!({
            "reference": "alice/lab3",
            "artifacts": { "bitstream": "/srv/uploads/alice.bit" },
            "tasks": ["ghost"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body.contains("unknown task definition"), "body: {body}");

    store
        .create_task_def(NewTaskDef {
            name: "smoke".to_string(),
            capability: "fpga-xc7".to_string(),
            execution_secs: 120,
            points: 10.0,
            input_fields: vec!["bitstream".to_string(), "vector".to_string()],
            output_fields: vec!["log".to_string()],
            score_command: "scorer".to_string(),
        })
        .await
        .expect("task def");

    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/submissions",
        Some(json!({
            "reference": "alice/lab3",
            "artifacts": { "bitstream": "/srv/uploads/alice.bit" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body.contains("vector"), "body: {body}");
}

#[tokio::test]
async fn test_status_report_error_paths() {
    let (app, _store, _dir) = setup().await;

    let (status, _) = request_json(
        &app,
        Method::POST,
        "/api/testbeds/status",
        Some(json!({ "id": "nobody", "status": "IDLE" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = request_json(
        &app,
        Method::POST,
        "/api/testbeds/status",
        Some(json!({ "id": "nobody", "status": "SLEEPING" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("SLEEPING"), "body: {body}");
}

#[tokio::test]
async fn test_create_task_def_validation() {
    let (app, _store, _dir) = setup().await;

    let base = json!({
        "name": "smoke",
        "capability": "fpga-xc7",
        "execution_secs": 120,
        "points": 10.0,
        "output_fields": ["log"],
        "score_command": "scorer"
    });

    let mut bad = base.clone();
    bad["execution_secs"] = json!(0);
    let (status, _) = request_json(&app, Method::POST, "/api/task-defs", Some(bad)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let mut bad = base.clone();
    bad["points"] = json!(-1.0);
    let (status, _) = request_json(&app, Method::POST, "/api/task-defs", Some(bad)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let mut bad = base.clone();
    bad["name"] = json!("  ");
    let (status, _) = request_json(&app, Method::POST, "/api/task-defs", Some(bad)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_submission_tasks_unknown_id_is_not_found() {
    let (app, _store, _dir) = setup().await;
    let (status, _) = request_json(&app, Method::GET, "/api/submissions/999/tasks", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

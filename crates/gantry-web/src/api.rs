use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::error;
use uuid::Uuid;

use gantry_core::dispatch::TestbedClient;
use gantry_core::models::{ExecOutcome, ReportedStatus};
use gantry_core::registry::Registry;
use gantry_core::store::Store;

use crate::api_routes;
use crate::handlers::{self, testbed_info};

#[derive(Clone)]
pub struct ApiServer {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) data_dir: PathBuf,
}

impl ApiServer {
    pub fn new(store: Arc<dyn Store>, client: Arc<dyn TestbedClient>, data_dir: PathBuf) -> Self {
        let registry = Arc::new(Registry::new(store.clone(), client));
        Self {
            store,
            registry,
            data_dir,
        }
    }

    pub async fn serve(self, addr: SocketAddr) -> JoinHandle<()> {
        let router = build_router(self);
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .expect("bind address");
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("server error");
        })
    }
}

pub fn build_router(api: ApiServer) -> Router {
    let cors = tower_http::cors::CorsLayer::very_permissive();
    Router::new()
        .route("/health", get(api_routes::health))
        .route("/api/testbeds", get(api_routes::list_testbeds))
        .route("/api/testbeds/report", post(report_testbed))
        .route("/api/testbeds/status", post(record_testbed_status))
        .route("/api/tasks/{id}/output", post(task_output))
        .route("/api/task-defs", get(api_routes::list_task_defs).post(api_routes::create_task_def))
        .route(
            "/api/submissions",
            get(api_routes::list_submissions).post(handlers::enqueue_submission),
        )
        .route("/api/submissions/{id}/tasks", get(handlers::submission_tasks))
        // Boards return full UART logs and waveform dumps; the 2 MiB axum
        // default is far too small for those.
        .layer(DefaultBodyLimit::max(64 * 1024 * 1024))
        .with_state(api)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
}

#[derive(Deserialize)]
struct ReportRequest {
    id: String,
    localport: u16,
    capability: String,
}

/// Registration callback. The board only knows its listening port; the
/// routable address is its peer IP plus that port.
async fn report_testbed(
    State(api): State<ApiServer>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(payload): Json<ReportRequest>,
) -> impl IntoResponse {
    let address = format!("{}:{}", peer.ip(), payload.localport);
    match api
        .registry
        .report(&payload.id, &address, &payload.capability)
        .await
    {
        Ok(testbed) => Json(testbed_info(testbed)).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Deserialize)]
struct StatusRequest {
    id: String,
    status: String,
}

async fn record_testbed_status(
    State(api): State<ApiServer>,
    Json(payload): Json<StatusRequest>,
) -> impl IntoResponse {
    let reported = match ReportedStatus::parse(&payload.status) {
        Some(reported) => reported,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                format!("unknown status '{}'", payload.status),
            )
                .into_response();
        }
    };
    match api.registry.record_status(&payload.id, reported).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Output callback a board posts when it finishes a task: `token`, `outcome`
/// (`ok`/`fault`), optional `note`, and one file part per declared output
/// field. A clean run must return every declared field; a fault may return
/// none. Nothing is written to disk until the token has matched the live
/// assignment.
async fn task_output(
    State(api): State<ApiServer>,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let task = match api.store.get_task(id).await {
        Ok(Some(task)) => task,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    let def = match api.store.get_task_def(task.task_def_id).await {
        Ok(Some(def)) => def,
        Ok(None) | Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let task_dir = api.data_dir.join("outputs").join(format!("task_{id}"));
    let mut token: Option<Uuid> = None;
    let mut outcome: Option<ExecOutcome> = None;
    let mut note: Option<String> = None;
    let mut saved: HashMap<String, String> = HashMap::new();
    let mut pending: Vec<(PathBuf, Bytes)> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "token" => {
                let raw = match field.text().await {
                    Ok(raw) => raw,
                    Err(_) => return StatusCode::BAD_REQUEST.into_response(),
                };
                token = match Uuid::parse_str(raw.trim()) {
                    Ok(token) => Some(token),
                    Err(_) => {
                        return (StatusCode::BAD_REQUEST, "malformed token".to_string())
                            .into_response();
                    }
                };
            }
            "outcome" => {
                let raw = match field.text().await {
                    Ok(raw) => raw,
                    Err(_) => return StatusCode::BAD_REQUEST.into_response(),
                };
                outcome = match ExecOutcome::parse(raw.trim()) {
                    Some(ExecOutcome::Ok) => Some(ExecOutcome::Ok),
                    Some(ExecOutcome::Fault) => Some(ExecOutcome::Fault),
                    _ => {
                        return (
                            StatusCode::BAD_REQUEST,
                            "outcome must be 'ok' or 'fault'".to_string(),
                        )
                            .into_response();
                    }
                };
            }
            "note" => {
                note = match field.text().await {
                    Ok(raw) => Some(raw),
                    Err(_) => return StatusCode::BAD_REQUEST.into_response(),
                };
            }
            other if def.output_fields.iter().any(|f| f == other) => {
                let bytes = match field.bytes().await {
                    Ok(bytes) => bytes,
                    Err(_) => return StatusCode::BAD_REQUEST.into_response(),
                };
                let path = task_dir.join(&name);
                saved.insert(name, path.display().to_string());
                // Stays in memory until the token check passes; these paths
                // belong to whatever assignment generation is current.
                pending.push((path, bytes));
            }
            _ => {
                return (StatusCode::BAD_REQUEST, format!("unexpected field '{name}'"))
                    .into_response();
            }
        }
    }

    let (Some(token), Some(outcome)) = (token, outcome) else {
        return (
            StatusCode::BAD_REQUEST,
            "token and outcome are required".to_string(),
        )
            .into_response();
    };

    if outcome == ExecOutcome::Ok {
        for field in &def.output_fields {
            if !saved.contains_key(field) {
                return (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    format!("missing declared output field '{field}'"),
                )
                    .into_response();
            }
        }
    }

    match api
        .store
        .store_task_output(id, token, outcome, &saved, note.as_deref())
        .await
    {
        Ok(true) => {}
        // Stale token or the task is not executing anymore; either way this
        // callback lost to a newer assignment generation and gets nowhere
        // near its files.
        Ok(false) => return StatusCode::CONFLICT.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }

    for (path, bytes) in &pending {
        if let Err(err) = save_output(&task_dir, path, bytes).await {
            error!(task = id, path = %path.display(), error = %format!("{err:#}"), "failed to store output file");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    StatusCode::OK.into_response()
}

async fn save_output(dir: &FsPath, path: &FsPath, bytes: &[u8]) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

pub(crate) fn fmt_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn is_unique_violation(err: &anyhow::Error) -> bool {
    format!("{err:#}").to_lowercase().contains("unique constraint")
}

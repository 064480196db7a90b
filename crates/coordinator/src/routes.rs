use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;

use taskgrid_common::api::{self, DiscoveryResponse, RETRY_AFTER_SECS, SESSION_COOKIE};
use taskgrid_common::{codec, net, ConnectionId, JobInfo, Task};

use crate::job::Coordinator;
use crate::tasks::TaskPoolError;

/// Shared application state accessible from axum handlers.
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub metrics_handle: PrometheusHandle,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(api::DISCOVERY, get(discovery_handler))
        .route(api::JOB, get(job_handler))
        .route("/file/{job_id}/{file_name}", get(file_handler))
        .route("/get_tasks/{job_id}/{num_tasks}", get(get_tasks_handler))
        .route("/tasks_done/{job_id}", post(tasks_done_handler))
        .route(api::HEARTBEAT, get(heartbeat_handler))
        .route(api::HEALTH, get(health_handler))
        .route(api::METRICS, get(metrics_handler))
        .with_state(state)
}

/// Pull the worker's session identity out of the `id` cookie.
/// Anything missing or malformed is rejected, never auto-registered.
fn connection_id_from(headers: &HeaderMap) -> Result<ConnectionId, (StatusCode, String)> {
    let cookies = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .ok_or((StatusCode::BAD_REQUEST, "missing id cookie".to_string()))?;

    for pair in cookies.split(';') {
        if let Some((name, value)) = pair.trim().split_once('=') {
            if name == SESSION_COOKIE {
                return value.parse().map_err(|_| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("malformed id cookie: {value}"),
                    )
                });
            }
        }
    }
    Err((StatusCode::BAD_REQUEST, "missing id cookie".to_string()))
}

/// 403 on a job id that does not match the loaded job, or when no job is
/// loaded at all.
async fn validate_job(
    coordinator: &Coordinator,
    job_id: i64,
) -> Result<JobInfo, (StatusCode, String)> {
    match coordinator.job_info().await {
        None => Err((StatusCode::FORBIDDEN, "no job loaded".to_string())),
        Some(info) if info.job_id != job_id => Err((
            StatusCode::FORBIDDEN,
            format!("wrong job id {job_id}, current job is {}", info.job_id),
        )),
        Some(info) => Ok(info),
    }
}

/// GET /discovery — tell a scanning worker who we are.
async fn discovery_handler() -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        ip: net::local_ipv4().to_string(),
    })
}

/// GET /job — the job handshake. Registers the caller's connection.
async fn job_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<JobInfo>, (StatusCode, String)> {
    let connection_id = connection_id_from(&headers)?;

    if state.coordinator.status.is_job_done().await {
        return Err((StatusCode::NOT_FOUND, "job is finished".to_string()));
    }
    let Some(info) = state.coordinator.job_info().await else {
        return Err((StatusCode::NOT_FOUND, "no job loaded".to_string()));
    };

    state.coordinator.connections.register(connection_id).await;
    Ok(Json(info))
}

/// GET /file/{job_id}/{file_name} — a shared job file, compressed.
async fn file_handler(
    State(state): State<Arc<AppState>>,
    Path((job_id, file_name)): Path<(i64, String)>,
) -> Result<Vec<u8>, (StatusCode, String)> {
    let info = validate_job(&state.coordinator, job_id).await?;

    if file_name.contains("..") || file_name.contains('/') {
        return Err((StatusCode::NOT_FOUND, format!("no such file {file_name}")));
    }

    let path = std::path::Path::new(&info.job_path).join(&file_name);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| (StatusCode::NOT_FOUND, format!("no such file {file_name}")))?;

    codec::compress(&bytes).map_err(|e| {
        tracing::error!(error = %e, file = %file_name, "Failed to compress job file");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

/// GET /get_tasks/{job_id}/{num_tasks} — hand out up to n tasks.
///
/// An exhausted-but-running job answers 503 with Retry-After; a finished
/// job answers a single JOB_END sentinel task.
async fn get_tasks_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((job_id, num_tasks)): Path<(i64, usize)>,
) -> Result<Response, (StatusCode, String)> {
    let connection_id = connection_id_from(&headers)?;
    validate_job(&state.coordinator, job_id).await?;

    let tasks = match state
        .coordinator
        .tasks
        .connect_available(num_tasks, connection_id)
        .await
    {
        Ok(tasks) => tasks,
        Err(TaskPoolError::NoMoreTasks) => vec![Task::end_sentinel(job_id)],
        Err(TaskPoolError::NoMoreAvailable { in_progress }) => {
            tracing::debug!(
                connection_id = %connection_id,
                in_progress,
                "No tasks free, telling worker to back off"
            );
            return Ok((
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())],
                "tasks outstanding, retry later",
            )
                .into_response());
        }
        Err(e) => return Err((StatusCode::NOT_IMPLEMENTED, e.to_string())),
    };

    let body = codec::encode_tasks(&tasks).map_err(|e| {
        tracing::error!(error = %e, "Failed to encode task frame");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(body.into_response())
}

/// POST /tasks_done/{job_id} — apply a worker's finished report.
async fn tasks_done_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<i64>,
    body: Bytes,
) -> Result<StatusCode, (StatusCode, String)> {
    validate_job(&state.coordinator, job_id).await?;

    let finished = codec::decode_tasks(&body).map_err(|e| {
        tracing::error!(error = %e, "Failed to decode finished report");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    match state.coordinator.tasks.tasks_finished(finished).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(e @ TaskPoolError::UnexpectedMessageType(_)) => {
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
        Err(e) => Err((StatusCode::NOT_IMPLEMENTED, e.to_string())),
    }
}

/// GET /heartbeat — renew the caller's deadline. Unknown connections are
/// ignored on purpose: a heartbeat that lost the race with the cleanup
/// sweep must not resurrect anything.
async fn heartbeat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, (StatusCode, String)> {
    let connection_id = connection_id_from(&headers)?;
    state.coordinator.connections.heartbeat(connection_id).await;
    Ok(StatusCode::OK)
}

async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "healthy" })),
    )
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

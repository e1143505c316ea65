use axum::body::Body;
use axum::extract::{Multipart, Path as AxumPath, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use log::{error, info, warn};
use serde_json::json;
use std::sync::Arc;
use sttq_common::{TaskError, is_allowed_model, is_valid_task_id};
use sttq_protocol::{PoolStatus, SubmitAccepted};
use tokio_util::io::ReaderStream;
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::ServerConfig;
use crate::registry::{AdmitOutcome, TaskRegistry};
use crate::store::ArtifactStore;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TaskRegistry>,
    pub store: ArtifactStore,
    pub config: Arc<ServerConfig>,
}

pub fn router(state: AppState) -> Router {
    let max_body = state.config.max_upload_bytes as usize;
    Router::new()
        .route("/health", get(health))
        .route("/pool/status", get(pool_status))
        .route("/tasks/submit", post(submit))
        .route("/tasks/:id/status", get(task_status))
        .route("/tasks/:id/result", get(task_result).delete(delete_result))
        .route("/tasks/:id/result/download", get(download_result))
        .route("/tasks/:id", delete(delete_task))
        .layer(RequestBodyLimitLayer::new(max_body))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn pool_status(State(state): State<AppState>) -> Json<PoolStatus> {
    Json(state.registry.pool_view())
}

struct SubmitForm {
    task_id: Option<String>,
    model: Option<String>,
    password: Option<String>,
    bundle: Option<Vec<u8>>,
}

async fn submit(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut form = SubmitForm {
        task_id: None,
        model: None,
        password: None,
        bundle: None,
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return bad_request(format!("malformed multipart body: {e}")),
        };
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "task_id" => match field.text().await {
                Ok(v) => form.task_id = Some(v),
                Err(e) => return bad_request(format!("invalid task_id field: {e}")),
            },
            "model" => match field.text().await {
                Ok(v) => form.model = Some(v),
                Err(e) => return bad_request(format!("invalid model field: {e}")),
            },
            "password" => match field.text().await {
                Ok(v) => form.password = Some(v),
                Err(e) => return bad_request(format!("invalid password field: {e}")),
            },
            "audio_file" | "task_file" => match field.bytes().await {
                Ok(bytes) => form.bundle = Some(bytes.to_vec()),
                Err(e) => return bad_request(format!("invalid bundle field: {e}")),
            },
            _ => {}
        }
    }

    let Some(task_id) = form.task_id else {
        return bad_request("missing task_id");
    };
    let Some(password) = form.password else {
        return bad_request("missing password");
    };
    let Some(bundle) = form.bundle else {
        return bad_request("missing audio_file/task_file");
    };

    if !is_valid_task_id(&task_id) {
        return bad_request("task_id must be non-empty, printable ASCII, length <= 128");
    }
    let model = form.model.unwrap_or_else(|| state.config.default_model.clone());
    if !is_allowed_model(&model) {
        return bad_request(format!("unknown model '{model}'"));
    }
    if bundle.len() as u64 > state.config.max_upload_bytes {
        return bad_request("bundle exceeds maximum upload size");
    }
    if password.is_empty() {
        return bad_request("missing password");
    }

    let bundle_path = match state.store.put_bundle(&task_id, &bundle) {
        Ok(path) => path,
        Err(e) => {
            error!("failed to persist bundle for '{task_id}': {e}");
            return internal_error();
        }
    };

    match state.registry.admit(&task_id, &model, bundle_path) {
        Ok(AdmitOutcome::Accepted { evicted_result }) => {
            if evicted_result {
                state.store.remove_result(&task_id);
            }
            info!("admitted task '{task_id}' (model={model})");
            let body = SubmitAccepted {
                task_id,
                accepted_at: Utc::now(),
            };
            (StatusCode::ACCEPTED, Json(body)).into_response()
        }
        Err(TaskError::Conflict(_)) => {
            state.store.remove_bundle(&task_id);
            (StatusCode::CONFLICT, Json(json!({ "error": "conflict" }))).into_response()
        }
        Err(TaskError::Capacity) => {
            state.store.remove_bundle(&task_id);
            let pool = state.registry.pool_view();
            (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": "pool_full", "pool": pool }))).into_response()
        }
        Err(e) => {
            state.store.remove_bundle(&task_id);
            error!("admission failed for '{task_id}': {e}");
            internal_error()
        }
    }
}

async fn task_status(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> Response {
    match state.registry.status(&id) {
        Ok(status) => Json(status).into_response(),
        Err(TaskError::NotFound(_)) => not_found(),
        Err(e) => {
            error!("status lookup failed for '{id}': {e}");
            internal_error()
        }
    }
}

async fn task_result(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> Response {
    match state.registry.result_descriptor(&id) {
        Ok(descriptor) => Json(descriptor).into_response(),
        Err(TaskError::NotFound(_)) => not_found(),
        Err(TaskError::State(_)) => StatusCode::CONFLICT.into_response(),
        Err(e) => {
            error!("result lookup failed for '{id}': {e}");
            internal_error()
        }
    }
}

async fn download_result(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> Response {
    if let Err(e) = state.registry.result_descriptor(&id) {
        return match e {
            TaskError::NotFound(_) => not_found(),
            TaskError::State(_) => StatusCode::CONFLICT.into_response(),
            _ => internal_error(),
        };
    }

    let path = state.store.result_file_path(&id);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("result file missing for completed task '{id}': {e}");
            return not_found();
        }
    };
    let stream = ReaderStream::new(file);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-subrip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{id}.srt\""),
        )
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| internal_error())
}

async fn delete_result(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> StatusCode {
    state.store.remove_result(&id);
    let _ = state.registry.remove_result(&id);
    StatusCode::NO_CONTENT
}

async fn delete_task(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> StatusCode {
    state.registry.evict_or_cancel(&id);
    state.store.remove_result(&id);
    StatusCode::NO_CONTENT
}

fn bad_request(detail: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": "bad_request", "detail": detail.into() }))).into_response()
}

fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

fn internal_error() -> Response {
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::multipart;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    /// Spins up the real router on an ephemeral port, backed by temp-dir
    /// artifact storage. Nothing drains the queue (no worker loop is
    /// spawned), so submitted tasks stay `QUEUED` for the life of the test.
    async fn spawn_test_server(capacity: usize) -> SocketAddr {
        let uploads = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let results = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(uploads.path(), work.path(), results.path(), 24).unwrap();
        let registry = Arc::new(TaskRegistry::new(capacity));
        let config = Arc::new(ServerConfig {
            capacity,
            host: "127.0.0.1".to_string(),
            port: 0,
            default_model: "small".to_string(),
            retention_hours: 24,
            max_upload_bytes: 10 * 1024 * 1024,
            log_level: "error".to_string(),
            uploads_dir: uploads.path().to_path_buf(),
            work_dir: work.path().to_path_buf(),
            results_dir: results.path().to_path_buf(),
            transcriber_bin: "true".to_string(),
            bundle_password: "pw".to_string(),
        });
        let state = AppState { registry, store, config };
        let app = router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Keep the backing directories alive for the rest of the test process.
        std::mem::forget(uploads);
        std::mem::forget(work);
        std::mem::forget(results);
        addr
    }

    fn submit_form(task_id: &str, model: &str, password: &str) -> multipart::Form {
        multipart::Form::new()
            .text("task_id", task_id.to_string())
            .text("model", model.to_string())
            .text("password", password.to_string())
            .part(
                "audio_file",
                multipart::Part::bytes(b"not-a-real-bundle".to_vec()).file_name("bundle.bin"),
            )
    }

    #[tokio::test]
    async fn submit_accepts_then_rejects_duplicate_as_conflict() {
        let addr = spawn_test_server(4).await;
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/tasks/submit");

        let resp = client.post(&url).multipart(submit_form("t1", "small", "pw")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

        let resp = client.post(&url).multipart(submit_form("t1", "small", "pw")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn submit_rejects_when_pool_is_full() {
        let addr = spawn_test_server(1).await;
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/tasks/submit");

        let resp = client.post(&url).multipart(submit_form("a", "small", "pw")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

        let resp = client.post(&url).multipart(submit_form("b", "small", "pw")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "pool_full");
    }

    #[tokio::test]
    async fn cancel_queued_task_then_status_reports_cancelled() {
        let addr = spawn_test_server(4).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("http://{addr}/tasks/submit"))
            .multipart(submit_form("c1", "small", "pw"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

        let resp = client.delete(format!("http://{addr}/tasks/c1")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);

        let resp = client.get(format!("http://{addr}/tasks/c1/status")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let status: sttq_protocol::StatusResponse = resp.json().await.unwrap();
        assert_eq!(status.state, sttq_protocol::TaskState::Cancelled);
    }

    #[tokio::test]
    async fn status_for_unknown_task_is_not_found() {
        let addr = spawn_test_server(4).await;
        let client = reqwest::Client::new();
        let resp = client.get(format!("http://{addr}/tasks/nope/status")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }
}


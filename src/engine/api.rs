//! Backstop API Module
//! REST surface for the administrative operations, with OpenAPI documentation

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;
use utoipa::OpenApi;

use crate::engine::identity::Actor;
use crate::engine::restore::RestoreError;
use crate::engine::retention::store::artifact_filename;
use crate::engine::retention::BackupStoreError;
use crate::engine::service::{Backstop, ServiceError};
use crate::engine::snapshot::{BackupKind, SnapshotError};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";

/// Artifacts are whole-store exports, well past axum's default body limit
const MAX_ARTIFACT_BYTES: usize = 512 * 1024 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub backstop: Arc<Backstop>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        create_backup,
        list_auto_backups,
        restore_backup,
        list_audit_log,
    ),
    tags(
        (name = "backups", description = "Snapshot and restore"),
        (name = "audit", description = "Audit log"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/backups", post(create_backup))
        .route("/api/backups/auto", get(list_auto_backups))
        .route(
            "/api/backups/restore",
            post(restore_backup).layer(DefaultBodyLimit::max(MAX_ARTIFACT_BYTES)),
        )
        .route("/api/audit", get(list_audit_log))
        .route("/api/openapi.json", get(openapi_spec))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Service errors as HTTP responses with a JSON `error` body
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::Snapshot(SnapshotError::Decode(_)) => StatusCode::BAD_REQUEST,
            ServiceError::Restore(e) if e.is_rejection() => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Restore(RestoreError::TimedOut { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::BackupStore(BackupStoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServiceError::BackupStore(BackupStoreError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Run blocking storage work off the async executor
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(ApiError),
        Err(e) => {
            error!(error = %e, "blocking task failed");
            Err(ApiError(ServiceError::Task(e.to_string())))
        }
    }
}

fn actor_from_headers(headers: &HeaderMap) -> Actor {
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    Actor::from_parts(get(ACTOR_ID_HEADER), get(ACTOR_NAME_HEADER))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    post,
    path = "/api/backups",
    responses(
        (status = 200, description = "Snapshot artifact of the whole store", body = Value)
    ),
    tag = "backups"
)]
async fn create_backup(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let backstop = state.backstop.clone();
    let snapshot = blocking(move || backstop.create_snapshot(BackupKind::Manual)).await?;
    let bytes = snapshot.to_bytes().map_err(ServiceError::from)?;

    let filename = artifact_filename(BackupKind::Manual, snapshot.schema_version, snapshot.created_at);
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/api/backups/auto",
    responses(
        (status = 200, description = "Automatic backups, newest first", body = Value)
    ),
    tag = "backups"
)]
async fn list_auto_backups(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    let manifests = state.backstop.list_auto_backups()?;
    Ok(Json(json!({
        "data": manifests,
        "count": manifests.len(),
    })))
}

#[utoipa::path(
    post,
    path = "/api/backups/restore",
    request_body(content = Value, description = "Snapshot artifact", content_type = "application/json"),
    responses(
        (status = 200, description = "Restore report", body = Value),
        (status = 400, description = "Body is not a snapshot artifact"),
        (status = 422, description = "Artifact rejected before any write")
    ),
    tag = "backups"
)]
async fn restore_backup(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let actor = actor_from_headers(&headers);
    let backstop = state.backstop.clone();
    let restored = blocking(move || backstop.restore_backup(&actor, &body)).await?;

    Ok(Json(json!({
        "report": restored.value,
        "auditWarning": restored.warning,
    })))
}

#[derive(Deserialize)]
pub struct AuditParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

#[utoipa::path(
    get,
    path = "/api/audit",
    params(
        ("limit" = Option<usize>, Query, description = "Maximum entries to return"),
    ),
    responses(
        (status = 200, description = "Audit entries, newest first", body = Value)
    ),
    tag = "audit"
)]
async fn list_audit_log(
    State(state): State<ApiState>,
    Query(params): Query<AuditParams>,
) -> Result<Json<Value>, ApiError> {
    let entries = state.backstop.list_audit_log(params.limit)?;
    Ok(Json(json!({
        "data": entries,
        "count": entries.len(),
        "limit": params.limit,
    })))
}

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_stream::stream;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use forge_build::{ChannelSink, CompileMode};
use forge_kernel::{ForgeKernel, KernelBuilder};
use forge_protocol::{
    BuildId, BuildTask, DirectoryNode, FileContent, FileOperation, FileRecord, ForgeError,
    LogEntry, Message, MessageId, MessageRole, ProjectId, ProjectRecord, QueueStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "forge-api")]
#[command(about = "Project workspace, history and build API")]
struct Cli {
    #[arg(long, default_value = ".forge")]
    root: PathBuf,
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: SocketAddr,
    /// Per-command bound for streaming compiles.
    #[arg(long, default_value_t = 60)]
    command_timeout_secs: u64,
    #[arg(long, default_value_t = 64)]
    queue_capacity: usize,
}

#[derive(Clone)]
struct AppState {
    kernel: ForgeKernel,
}

#[derive(Debug, Deserialize)]
struct CreateProjectRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NewMessage {
    message_id: Option<MessageId>,
    role: MessageRole,
    content: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AppendMessagesRequest {
    messages: Vec<NewMessage>,
}

#[derive(Debug, Deserialize)]
struct ApplyOperationsRequest {
    message_id: MessageId,
    operations: Vec<FileOperation>,
}

#[derive(Debug, Serialize)]
struct ApplyOperationsResponse {
    message_id: MessageId,
    applied: usize,
    snapshot: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RevertRequest {
    message_id: MessageId,
}

#[derive(Debug, Deserialize)]
struct FileContentQuery {
    path: String,
}

#[derive(Debug, Serialize)]
struct EnqueueBuildResponse {
    build_id: BuildId,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        let status = match error.downcast_ref::<ForgeError>() {
            Some(
                ForgeError::PathTraversal(_)
                | ForgeError::InvalidMessageId(_)
                | ForgeError::UnsupportedProject(_),
            ) => StatusCode::BAD_REQUEST,
            Some(ForgeError::ProjectNotFound(_) | ForgeError::SnapshotMissing(_)) => {
                StatusCode::NOT_FOUND
            }
            Some(ForgeError::Io(io)) if io.kind() == std::io::ErrorKind::NotFound => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: format!("{error:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let kernel = KernelBuilder::new(&cli.root)
        .command_timeout(Duration::from_secs(cli.command_timeout_secs))
        .queue_capacity(cli.queue_capacity)
        .build();

    let app = router(AppState { kernel })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(listen = %cli.listen, root = %cli.root.display(), "forge-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/projects", post(create_project))
        .route(
            "/projects/{project_id}",
            get(get_project).delete(delete_project),
        )
        .route("/projects/{project_id}/messages", post(append_messages))
        .route("/projects/{project_id}/operations", post(apply_operations))
        .route("/projects/{project_id}/revert", post(revert_to_message))
        .route("/projects/{project_id}/snapshots", get(list_snapshots))
        .route("/projects/{project_id}/files", get(scan_files))
        .route("/projects/{project_id}/files/content", get(read_file))
        .route("/projects/{project_id}/structure", get(directory_structure))
        .route("/projects/{project_id}/builds", post(enqueue_build))
        .route("/projects/{project_id}/compile", post(compile))
        .route("/builds/queue", get(queue_status))
        .route("/builds/{build_id}", get(build_task))
        .route("/builds/{build_id}/logs", get(build_logs))
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "forge-api"
    }))
}

async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<impl IntoResponse> {
    let manifest = state.kernel.create_project(request.name).await?;
    Ok((StatusCode::CREATED, Json(manifest)))
}

async fn get_project(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<ProjectRecord>> {
    let project = state.kernel.project(&ProjectId::from_string(project_id)).await?;
    Ok(Json(project))
}

async fn delete_project(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<StatusCode> {
    state
        .kernel
        .delete_project(&ProjectId::from_string(project_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn append_messages(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<AppendMessagesRequest>,
) -> ApiResult<Json<Vec<Message>>> {
    let messages = request
        .messages
        .into_iter()
        .map(|message| {
            Message::new(
                message.message_id,
                message.role,
                message.content,
                message.kind.unwrap_or_else(|| "text".to_owned()),
            )
        })
        .collect();
    let appended = state
        .kernel
        .append_messages(&ProjectId::from_string(project_id), messages)
        .await?;
    Ok(Json(appended))
}

async fn apply_operations(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<ApplyOperationsRequest>,
) -> ApiResult<Json<ApplyOperationsResponse>> {
    let snapshot = state
        .kernel
        .apply_operations(
            &ProjectId::from_string(project_id),
            &request.message_id,
            &request.operations,
        )
        .await?;
    Ok(Json(ApplyOperationsResponse {
        message_id: request.message_id,
        applied: request.operations.len(),
        snapshot: snapshot.map(|info| info.path.display().to_string()),
    }))
}

async fn revert_to_message(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<RevertRequest>,
) -> ApiResult<impl IntoResponse> {
    let report = state
        .kernel
        .revert_to_message(&ProjectId::from_string(project_id), &request.message_id)
        .await?;
    Ok(Json(report))
}

async fn list_snapshots(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<MessageId>>> {
    let snapshots = state
        .kernel
        .list_snapshots(&ProjectId::from_string(project_id))
        .await?;
    Ok(Json(snapshots))
}

async fn scan_files(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<FileRecord>>> {
    let files = state
        .kernel
        .scan_files(&ProjectId::from_string(project_id))
        .await?;
    Ok(Json(files))
}

async fn read_file(
    Path(project_id): Path<String>,
    Query(query): Query<FileContentQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<FileContent>> {
    let content = state
        .kernel
        .read_file(&ProjectId::from_string(project_id), &query.path)
        .await?;
    Ok(Json(content))
}

async fn directory_structure(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<DirectoryNode>> {
    let structure = state
        .kernel
        .directory_structure(&ProjectId::from_string(project_id))
        .await?;
    Ok(Json(structure))
}

async fn enqueue_build(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let queued = state
        .kernel
        .enqueue_build(&ProjectId::from_string(project_id))
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueBuildResponse {
            build_id: queued.into_build_id(),
        }),
    ))
}

async fn build_task(
    Path(build_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<BuildTask>> {
    let build_id = BuildId::from_string(build_id);
    let task = state
        .kernel
        .build_task(&build_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("build not found: {build_id}")))?;
    Ok(Json(task))
}

async fn build_logs(
    Path(build_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    let logs = state
        .kernel
        .build_logs(&BuildId::from_string(build_id))
        .await?;
    Ok(Json(logs))
}

async fn queue_status(State(state): State<AppState>) -> Json<QueueStatus> {
    Json(state.kernel.queue_status())
}

/// Streams compile frames as `text/event-stream`. The compile runs on its
/// own task so a client hanging up never cuts a command short.
async fn compile(
    Path(project_id): Path<String>,
    State(state): State<AppState>,
    Json(mode): Json<CompileMode>,
) -> Response {
    let project_id = ProjectId::from_string(project_id);
    let (mut sink, mut receiver) = ChannelSink::new(256);
    let kernel = state.kernel.clone();

    tokio::spawn(async move {
        match kernel.compile(&project_id, mode, &mut sink).await {
            Ok(report) => info!(
                project_id = %project_id,
                succeeded = report.compile.succeeded,
                consumer_connected = report.compile.consumer_connected,
                "compile finished"
            ),
            Err(error) => warn!(project_id = %project_id, error = %error, "compile rejected"),
        }
    });

    let frames = stream! {
        while let Some(frame) = receiver.recv().await {
            yield Ok::<String, Infallible>(frame);
        }
    };

    let mut response = Response::new(Body::from_stream(frames));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{Context, anyhow};
    use axum::http::StatusCode;
    use forge_protocol::ForgeError;

    use super::ApiError;
    use forge_build::CompileMode;

    #[test]
    fn forge_errors_map_to_client_statuses() {
        let traversal: anyhow::Error = ForgeError::PathTraversal("../etc".to_owned()).into();
        assert_eq!(ApiError::from(traversal).status, StatusCode::BAD_REQUEST);

        let missing = Err::<(), _>(ForgeError::ProjectNotFound("p1".to_owned()))
            .context("loading project")
            .unwrap_err();
        let error = ApiError::from(missing);
        assert_eq!(error.status, StatusCode::NOT_FOUND);
        assert!(error.message.contains("loading project"));

        let other = ApiError::from(anyhow!("disk on fire"));
        assert_eq!(other.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn compile_body_reads_mode_tags() {
        let mode: CompileMode =
            serde_json::from_str(r#"{"mode":"scratch_copy"}"#).expect("valid request");
        assert!(matches!(mode, CompileMode::ScratchCopy));

        let mode: CompileMode = serde_json::from_str(
            r#"{"mode":"materialized","files":{"package.json":"{}"}}"#,
        )
        .expect("valid request");
        let CompileMode::Materialized(files) = mode else {
            panic!("expected materialized mode");
        };
        assert_eq!(files.get("package.json").map(String::as_str), Some("{}"));
    }
}

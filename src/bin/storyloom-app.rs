use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use clap::Parser;
use serde::Serialize;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;

use storyloom::app::asset_store::{AssetStore, LocalFsAssetStore};
use storyloom::app::error::GenerationError;
use storyloom::app::model::{GenerationProgress, StoryInput, StoryStatus};
use storyloom::app::orchestrator::{PipelineOptions, StoryOrchestrator};
use storyloom::app::progress::BroadcastProgressSink;
use storyloom::app::queue::WorkerPool;
use storyloom::cli::{EngineArgs, PipelineArgs};
use storyloom::config::ProviderConfig;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    #[arg(long, default_value = "workspace-app")]
    data_dir: PathBuf,

    /// Stories generated concurrently.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Stories allowed to wait for a worker before requests are rejected.
    #[arg(long, default_value_t = 100)]
    queue_capacity: usize,

    #[command(flatten)]
    engines: EngineArgs,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<StoryOrchestrator>,
    store: Arc<dyn AssetStore>,
    progress: BroadcastProgressSink,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    storyloom::logging::init("info,tower_http=debug")?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting storyloom-app");

    let providers = ProviderConfig::from_env().providers(&args.engines)?;
    let store: Arc<dyn AssetStore> = Arc::new(LocalFsAssetStore::new(&args.data_dir));
    let progress = BroadcastProgressSink::new(1024);
    let orchestrator = Arc::new(StoryOrchestrator::new(
        providers,
        Arc::clone(&store),
        Arc::new(progress.clone()),
        WorkerPool::new(args.workers, args.queue_capacity),
        PipelineOptions::from(args.pipeline),
    ));
    let state = AppState {
        orchestrator,
        store,
        progress,
    };

    let app = Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/api/stories", get(list_stories))
        .route("/api/stories/generate", post(generate_story))
        .route("/api/stories/:story_id", get(get_story).delete(delete_story))
        .route("/api/stories/:story_id/status", get(story_status))
        .route("/api/stories/:story_id/progress", get(story_progress))
        .route("/api/stories/:story_id/assets/*path", get(download_asset))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

struct ApiError(GenerationError);

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

fn status_for(err: &GenerationError) -> StatusCode {
    match err {
        GenerationError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        GenerationError::NotFound(_) => StatusCode::NOT_FOUND,
        GenerationError::InProgress(_) => StatusCode::CONFLICT,
        GenerationError::QueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    story_id: String,
    status: StoryStatus,
    message: String,
}

async fn generate_story(
    State(state): State<AppState>,
    Json(input): Json<StoryInput>,
) -> Result<(StatusCode, Json<GenerateResponse>), ApiError> {
    let story_id = state.orchestrator.start(input).await?;
    state.orchestrator.dispatch(&story_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateResponse {
            story_id,
            status: StoryStatus::Pending,
            message: "Story generation started".to_string(),
        }),
    ))
}

async fn list_stories(State(state): State<AppState>) -> Result<Response, ApiError> {
    let summaries = state.orchestrator.list().await?;
    Ok(Json(summaries).into_response())
}

async fn get_story(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
) -> Result<Response, ApiError> {
    let story = state.orchestrator.get(story_id.trim()).await?;
    Ok(Json(story).into_response())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    story_id: String,
    status: StoryStatus,
    progress: u32,
}

async fn story_status(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let story = state.orchestrator.get(story_id.trim()).await?;
    Ok(Json(StatusResponse {
        story_id: story.id,
        status: story.status,
        progress: story.status.progress_percent(),
    }))
}

async fn story_progress(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
) -> Result<Response, ApiError> {
    let story_id = story_id.trim().to_string();
    let receiver = state.progress.subscribe();
    let story = state.orchestrator.get(&story_id).await?;

    let snapshot = GenerationProgress {
        story_id: story.id.clone(),
        status: story.status,
        progress_percentage: story.status.progress_percent(),
        stage: "Current Status".to_string(),
        message: story
            .error_message
            .clone()
            .unwrap_or_else(|| format!("Story is {}", story.status)),
    };
    let live = BroadcastStream::new(receiver).filter_map(move |item| match item {
        Ok(progress) if progress.story_id == story_id => Some(progress),
        Ok(_) => None,
        Err(err) => {
            tracing::warn!(%err, "progress subscriber lagged");
            None
        }
    });
    let events = tokio_stream::once(snapshot)
        .chain(live)
        .map(|progress| Event::default().event("progress").json_data(&progress));

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteResponse {
    success: bool,
    message: String,
    story_id: String,
}

async fn delete_story(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let story_id = story_id.trim().to_string();
    state.orchestrator.delete(&story_id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        message: "Story deleted".to_string(),
        story_id,
    }))
}

async fn download_asset(
    State(state): State<AppState>,
    Path((story_id, path)): Path<(String, String)>,
) -> Result<Response, StatusCode> {
    let file_path = state
        .store
        .asset_path(story_id.trim(), &path)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let file = tokio::fs::File::open(&file_path)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let body = axum::body::Body::from_stream(ReaderStream::new(file));

    let mut resp = Response::new(body);
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&path)),
    );
    resp.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=86400"),
    );
    Ok(resp)
}

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "mp3" => "audio/mpeg",
        Some(ext) if ext == "json" => "application/json",
        _ => "application/octet-stream",
    }
}

use std::{
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, State},
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tiktok_crawler::{
    DownloadRequest, MediaInfo, Orchestrator, YtDlp,
    config::{self, DEFAULT_CONFIG_PATH},
    error::RequestError,
    library,
    model::validate_url,
    tools,
};
use tokio::{fs::File, signal, task};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const INDEX_HTML: &str = include_str!("../../assets/index.html");
const ARCHIVE_NAME: &str = "tiktok_downloads.zip";
const NO_CACHE: &str = "no-cache, no-store, must-revalidate, public, max-age=0";

#[derive(Parser, Debug)]
#[command(author, version, about = "Web interface for the TikTok crawler.")]
struct Args {
    #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, help = "Path to the config file")]
    config: PathBuf,
    #[arg(long = "port", help = "Port to listen on (overrides PORT)")]
    port: Option<u16>,
}

#[derive(Clone)]
struct AppState {
    downloads_dir: Arc<PathBuf>,
    proxy: Option<String>,
    orchestrator: Arc<Orchestrator<YtDlp>>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// JSON failure with HTTP 200.
    fn failed(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<RequestError> for ApiError {
    fn from(err: RequestError) -> Self {
        Self::failed(err.to_string())
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadBody {
    #[serde(default)]
    url: String,
    #[serde(default)]
    proxy: Option<String>,
    #[serde(default)]
    custom_dir: Option<String>,
    #[serde(default)]
    limit: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct InfoBody {
    #[serde(default)]
    url: String,
    #[serde(default)]
    proxy: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteBody {
    #[serde(default)]
    filename: String,
}

#[derive(Debug, Serialize)]
struct DownloadResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_url: Option<String>,
    #[serde(rename = "localPath", skip_serializing_if = "Option::is_none")]
    local_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct UserVideosResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    download_location: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<MediaInfo>,
}

#[derive(Debug, Serialize)]
struct ListedFile {
    name: String,
    size: String,
    date: String,
    url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "tiktok_crawler=info,tiktok_crawler_web=info".into()
        }))
        .init();

    let args = Args::parse();
    let mut settings = config::load_settings_from(&args.config)
        .with_context(|| format!("loading settings from {}", args.config.display()))?;
    if let Some(port) = args.port {
        settings.port = port;
    }

    tokio::fs::create_dir_all(&settings.downloads_dir)
        .await
        .with_context(|| {
            format!(
                "creating downloads directory {}",
                settings.downloads_dir.display()
            )
        })?;

    if let Err(err) = tools::ensure_program_available(&settings.ytdlp_path) {
        warn!(error = %err, "yt-dlp is not usable; downloads will fail");
    }
    match tools::locate_ffmpeg(settings.ffmpeg_path.as_deref()) {
        Some(path) => info!(ffmpeg = %path.display(), "using ffmpeg"),
        None => warn!("ffmpeg not found; downloads will fail. {}", tools::ffmpeg_install_hint()),
    }

    let state = AppState {
        downloads_dir: Arc::new(settings.downloads_dir.clone()),
        proxy: settings.proxy.clone(),
        orchestrator: Arc::new(tiktok_crawler::orchestrator_from(&settings)),
    };
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .with_context(|| format!("parsing listen address {}:{}", settings.host, settings.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding web server to {addr}"))?;

    println!("Downloads directory: {}", settings.downloads_dir.display());
    println!("TikTok crawler listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running web server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/download", post(download))
        .route("/api/info", post(video_info))
        .route("/api/user-videos", post(user_videos))
        .route("/api/list-downloads", get(list_downloads))
        .route("/api/delete-file", post(delete_file))
        .route("/api/delete-all", post(delete_all))
        .route("/api/cleanup-non-mp4", post(cleanup))
        .route("/download-zip", get(download_zip))
        .route("/downloads/{name}", get(serve_download))
        .layer(middleware::map_response(disable_caching))
        .with_state(state)
}

async fn disable_caching(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn download(
    State(state): State<AppState>,
    Json(body): Json<DownloadBody>,
) -> ApiResult<Json<DownloadResponse>> {
    let url = validate_url(&body.url)?;
    let output_dir = output_dir_for(&state.downloads_dir, body.custom_dir.as_deref())
        .map_err(|err| ApiError::failed(format!("Directory error: {err}")))?;

    let request = DownloadRequest::new(url, &output_dir)?
        .with_proxy(body.proxy.or_else(|| state.proxy.clone()))
        .with_limit(parse_limit(body.limit.as_ref()))?;
    let orchestrator = Arc::clone(&state.orchestrator);
    let outcome = blocking(move || orchestrator.download_single(&request)).await?;

    let Some(filename) = outcome.primary_file().map(str::to_owned).filter(|_| outcome.success)
    else {
        return Ok(Json(DownloadResponse {
            success: outcome.success,
            message: outcome.message,
            filename: None,
            file_url: None,
            local_path: None,
        }));
    };

    let local_path = output_dir.join(&filename);
    let file_url = if same_dir(&output_dir, &state.downloads_dir) {
        Some(file_url(&filename))
    } else {
        match tokio::fs::copy(&local_path, state.downloads_dir.join(&filename)).await {
            Ok(_) => Some(file_url(&filename)),
            Err(err) => {
                warn!(file = %filename, error = %err, "could not copy download for preview");
                None
            }
        }
    };

    Ok(Json(DownloadResponse {
        success: true,
        message: outcome.message,
        filename: Some(filename),
        file_url,
        local_path: Some(local_path),
    }))
}

async fn video_info(
    State(state): State<AppState>,
    Json(body): Json<InfoBody>,
) -> ApiResult<Json<InfoResponse>> {
    let url = validate_url(&body.url)?.to_owned();
    let proxy = body.proxy.or_else(|| state.proxy.clone());
    let orchestrator = Arc::clone(&state.orchestrator);
    let outcome = blocking(move || orchestrator.video_info(&url, proxy.as_deref())).await?;
    Ok(Json(InfoResponse {
        success: outcome.success,
        message: outcome.message,
        info: outcome.info,
    }))
}

async fn user_videos(
    State(state): State<AppState>,
    Json(body): Json<DownloadBody>,
) -> ApiResult<Json<UserVideosResponse>> {
    let url = validate_url(&body.url)?;
    let output_dir = output_dir_for(&state.downloads_dir, body.custom_dir.as_deref())
        .map_err(|err| ApiError::failed(format!("Directory error: {err}")))?;

    let request = DownloadRequest::new(url, &output_dir)?
        .with_proxy(body.proxy.or_else(|| state.proxy.clone()))
        .with_limit(parse_limit(body.limit.as_ref()))?;
    let orchestrator = Arc::clone(&state.orchestrator);
    let outcome = blocking(move || orchestrator.download_many(&request)).await?;

    let (files, download_location) = if outcome.success {
        (outcome.files, Some(output_dir))
    } else {
        (None, None)
    };
    Ok(Json(UserVideosResponse {
        success: outcome.success,
        message: outcome.message,
        files,
        download_location,
    }))
}

async fn list_downloads(State(state): State<AppState>) -> Response {
    let dir = Arc::clone(&state.downloads_dir);
    match blocking(move || library::list_media(&dir)).await {
        Ok(Ok(files)) => {
            let files: Vec<ListedFile> = files
                .into_iter()
                .map(|file| ListedFile {
                    size: file.size_label(),
                    date: file.date_label(),
                    url: file_url(&file.name),
                    name: file.name,
                })
                .collect();
            Json(json!({ "files": files })).into_response()
        }
        Ok(Err(err)) => Json(json!({ "files": [], "error": err.to_string() })).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn delete_file(
    State(state): State<AppState>,
    Json(body): Json<DeleteBody>,
) -> ApiResult<Json<Value>> {
    let dir = Arc::clone(&state.downloads_dir);
    let name = body.filename.clone();
    blocking(move || library::delete_file(&dir, &name))
        .await?
        .map_err(|err| ApiError::failed(err.to_string()))?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Deleted {}", body.filename.trim()),
    })))
}

async fn delete_all(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let dir = Arc::clone(&state.downloads_dir);
    let deleted = blocking(move || library::delete_all(&dir))
        .await?
        .map_err(|err| ApiError::failed(err.to_string()))?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Deleted {deleted} file(s)"),
        "deleted": deleted,
    })))
}

async fn cleanup(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let dir = Arc::clone(&state.downloads_dir);
    let report = blocking(move || library::cleanup(&dir)).await?;
    let message = format!(
        "Converted {} file(s) to MP4 and removed {} other file(s)",
        report.renamed.len(),
        report.deleted.len()
    );
    Ok(Json(json!({
        "success": report.failures.is_empty(),
        "message": message,
        "renamed": report.renamed.len(),
        "deleted": report.deleted.len(),
        "conflicts": report.conflicts,
    })))
}

async fn download_zip(State(state): State<AppState>) -> ApiResult<Response> {
    let dir = Arc::clone(&state.downloads_dir);
    let (archive, count) = blocking(move || library::archive_to_tempfile(&dir))
        .await?
        .map_err(|err| ApiError::internal(err.to_string()))?;
    info!(count, "serving downloads archive");

    let stream = ReaderStream::new(File::from_std(archive));
    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    if let Ok(value) = format!("attachment; filename=\"{ARCHIVE_NAME}\"").parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

async fn serve_download(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> ApiResult<Response> {
    let path = library::resolve_file(&state.downloads_dir, &name)
        .map_err(|_| ApiError::not_found("file not found"))?;
    stream_file(path).await
}

async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;

    let stream = ReaderStream::new(file);
    let mut response = Body::from_stream(stream).into_response();
    if let Some(mime) = MimeGuess::from_path(&path).first() {
        if let Ok(value) = mime.to_string().parse() {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
    }
    Ok(response)
}

async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|err| ApiError::failed(format!("task join error: {err}")))
}

/// A JSON number or a string of digits; zero and anything else mean no limit.
fn parse_limit(value: Option<&Value>) -> Option<usize> {
    let limit = match value? {
        Value::Number(number) => number.as_u64()?,
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            text.parse().ok()?
        }
        _ => return None,
    };
    usize::try_from(limit).ok().filter(|limit| *limit > 0)
}

/// Expands a leading `~` and makes the path absolute.
fn expand_dir(raw: &str) -> io::Result<PathBuf> {
    let raw = raw.trim();
    let expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with(['/', '\\']) => {
            let home = dirs::home_dir().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "home directory is unknown")
            })?;
            home.join(rest.trim_start_matches(['/', '\\']))
        }
        _ => PathBuf::from(raw),
    };
    std::path::absolute(expanded)
}

/// The directory a request downloads into, created when missing.
fn output_dir_for(default: &Path, custom: Option<&str>) -> io::Result<PathBuf> {
    match custom.map(str::trim).filter(|dir| !dir.is_empty()) {
        Some(custom) => {
            let dir = expand_dir(custom)?;
            std::fs::create_dir_all(&dir)?;
            Ok(dir)
        }
        None => Ok(default.to_path_buf()),
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Preview URL for a file in the downloads directory, percent-encoded.
fn file_url(name: &str) -> String {
    let mut url = String::from("/downloads/");
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            url.push(byte as char);
        } else {
            url.push_str(&format!("%{byte:02X}"));
        }
    }
    url
}

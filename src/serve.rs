//! HTTP API
//!
//! `unai serve` → binds, then hands every request to a rayon worker pool
//!
//! | Route | Response |
//! |-------|----------|
//! | `POST /api/analyze` | verdict + `file_type` + `filename`, or `{"error": ...}` |
//! | `GET /api/health` | `{"status": "healthy", ...}` |
//! | `OPTIONS *` | 204 with CORS headers |
//! | anything else | 404 |
//!
//! Uploads are streamed into a named temporary file inside the upload
//! directory and deleted as soon as the request is answered.
//!
//! At most `max_pending` requests are held at once, running or waiting for a
//! worker. Past that the accept loop answers 503 itself.

use crate::analyzer::{Analyzer, Verdict};
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::media::{extension_of, secure_filename, MediaKind};
use multipart::server::Multipart;
use serde::Serialize;
use std::any::Any;
use std::fs;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, error, info, warn};

pub const HEALTH_MESSAGE: &str = "UnAI Detection API is running";

/// Form field carrying the upload
const FILE_FIELD: &str = "file";

/// Slack on top of the file limit for boundaries, part headers and small
/// form fields when judging a request by its Content-Length
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;

const CORS_HEADERS: &[(&str, &str)] = &[
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type"),
];

/// Shared by every worker
#[derive(Debug)]
pub struct AppState {
    pub config: ServerConfig,
    pub analyzer: Analyzer,
}

/// Successful `/api/analyze` body
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    #[serde(flatten)]
    pub verdict: Verdict,
    pub file_type: MediaKind,
    pub filename: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
}

/// Count of requests accepted but not yet answered
#[derive(Debug)]
struct Backlog {
    pending: AtomicUsize,
    capacity: usize,
}

/// Holds one place in the [`Backlog`] until dropped
struct BacklogSlot(Arc<Backlog>);

impl Backlog {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self { pending: AtomicUsize::new(0), capacity })
    }

    fn try_enter(self: &Arc<Self>) -> Option<BacklogSlot> {
        let before = self.pending.fetch_add(1, Ordering::AcqRel);
        if before >= self.capacity {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(BacklogSlot(Arc::clone(self)))
    }
}

impl Drop for BacklogSlot {
    fn drop(&mut self) {
        self.0.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct ApiServer {
    server: Server,
    state: Arc<AppState>,
    pool: rayon::ThreadPool,
    backlog: Arc<Backlog>,
}

impl ApiServer {
    /// Create the upload directory, bind the socket and build the worker pool
    pub fn bind(config: ServerConfig, analyzer: Analyzer) -> io::Result<Self> {
        fs::create_dir_all(&config.upload_dir)?;

        let server = Server::http(config.bind_addr()).map_err(|e| io::Error::other(e.to_string()))?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("unai-worker-{}", i))
            .panic_handler(|_| error!("worker panicked outside request handling"))
            .build()
            .map_err(|e| io::Error::other(e.to_string()))?;

        let backlog = Backlog::new(config.max_pending.max(1));
        Ok(Self { server, state: Arc::new(AppState { config, analyzer }), pool, backlog })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Serve until the listener shuts down
    pub fn run(self) {
        for request in self.server.incoming_requests() {
            let Some(slot) = self.backlog.try_enter() else {
                warn!("{} requests pending, answering 503", self.backlog.capacity);
                if let Err(e) = respond_error(request, &ApiError::Busy) {
                    warn!("failed to send response: {}", e);
                }
                continue;
            };
            let state = Arc::clone(&self.state);
            self.pool.spawn(move || {
                let _slot = slot;
                if let Err(e) = handle_request(request, &state) {
                    warn!("failed to send response: {}", e);
                }
            });
        }
    }
}

/// Bind and serve forever
pub fn start(config: ServerConfig, analyzer: Analyzer) -> io::Result<()> {
    let server = ApiServer::bind(config, analyzer)?;
    let state = &server.state;
    match server.local_addr() {
        Some(addr) => info!("UnAI listening on http://{}", addr),
        None => info!("UnAI listening on {}", state.config.bind_addr()),
    }
    info!(
        "uploads in {}, limit {} MiB, profile {:?}",
        state.config.upload_dir.display(),
        state.config.max_upload_bytes / (1024 * 1024),
        state.analyzer.config().profile
    );
    server.run();
    Ok(())
}

fn handle_request(mut request: Request, state: &AppState) -> io::Result<()> {
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or("/");
    let method = request.method().clone();
    debug!("{} {}", method, path);

    match (&method, path) {
        (&Method::Options, _) => respond(request, Response::empty(204)),

        (&Method::Get, "/api/health") => respond_json(
            request,
            200,
            &HealthResponse { status: "healthy", message: HEALTH_MESSAGE },
        ),

        (&Method::Post, "/api/analyze") => {
            if body_over_limit(request.body_length(), state.config.max_upload_bytes) {
                warn!("rejecting upload: Content-Length over limit");
                return respond_error(request, &ApiError::TooLarge);
            }

            let content_type = header_value(&request, "Content-Type");
            let started = Instant::now();
            match analyze_upload(state, content_type.as_deref(), request.as_reader()) {
                Ok(body) => {
                    info!(
                        "{} ({}) -> ai={} confidence={:.1} in {:.2?}",
                        body.filename,
                        body.file_type,
                        body.verdict.is_ai_generated,
                        body.verdict.confidence,
                        started.elapsed()
                    );
                    respond_json(request, 200, &body)
                }
                Err(e) => {
                    match &e {
                        ApiError::Internal(msg) => error!("analysis request failed: {}", msg),
                        other => info!("rejected upload: {}", other),
                    }
                    respond_error(request, &e)
                }
            }
        }

        _ => respond_json(request, 404, &ErrorResponse { error: "Not found" }),
    }
}

/// Whether a declared body length rules the request out before reading it.
///
/// The file part alone is held to the exact limit while streaming; this only
/// catches bodies that cannot possibly fit.
fn body_over_limit(body_length: Option<usize>, max_upload_bytes: u64) -> bool {
    body_length.is_some_and(|len| len as u64 > max_upload_bytes.saturating_add(MULTIPART_OVERHEAD))
}

fn header_value(request: &Request, name: &'static str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().to_string())
}

fn respond<R: Read>(request: Request, mut response: Response<R>) -> io::Result<()> {
    for (name, value) in CORS_HEADERS {
        if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            response.add_header(header);
        }
    }
    request.respond(response)
}

fn respond_json<T: Serialize>(request: Request, status: u16, body: &T) -> io::Result<()> {
    let json = serde_json::to_string(body)?;
    let mut response = Response::from_string(json).with_status_code(status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response.add_header(header);
    }
    respond(request, response)
}

fn respond_error(request: Request, err: &ApiError) -> io::Result<()> {
    let message = err.to_string();
    respond_json(request, err.status_code(), &ErrorResponse { error: &message })
}

/// `boundary` parameter of a `multipart/form-data` content type
pub fn multipart_boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("boundary")
                .then(|| value.trim().trim_matches('"').to_string())
        })
        .filter(|b| !b.is_empty())
}

/// Handle one `/api/analyze` body: find the `file` field, store it, detect
/// its kind and score it.
pub fn analyze_upload<R: Read>(
    state: &AppState,
    content_type: Option<&str>,
    body: R,
) -> Result<AnalyzeResponse, ApiError> {
    let boundary = content_type.and_then(multipart_boundary).ok_or(ApiError::NoFile)?;
    let mut form = Multipart::with_body(body, boundary);

    loop {
        let entry = form.read_entry().map_err(|e| {
            warn!("malformed multipart body: {}", e);
            ApiError::NoFile
        })?;
        let Some(mut field) = entry else {
            return Err(ApiError::NoFile);
        };
        if &*field.headers.name != FILE_FIELD {
            continue;
        }

        let original = field.headers.filename.clone().unwrap_or_default();
        let filename = secure_filename(&original);
        if filename.is_empty() {
            return Err(ApiError::NoFilename);
        }

        let upload = save_upload(&state.config, &filename, &mut field.data)?;
        return analyze_saved(state, upload, filename);
    }
}

/// Stream `data` into a temp file, failing once it exceeds the limit
fn save_upload<D: Read>(
    config: &ServerConfig,
    filename: &str,
    mut data: D,
) -> Result<NamedTempFile, ApiError> {
    let suffix = extension_of(filename).map(|ext| format!(".{}", ext)).unwrap_or_default();
    let mut file = tempfile::Builder::new()
        .prefix("unai-")
        .suffix(&suffix)
        .tempfile_in(&config.upload_dir)?;

    let limit = config.max_upload_bytes;
    let written = io::copy(&mut data.by_ref().take(limit.saturating_add(1)), &mut file)?;
    if written > limit {
        return Err(ApiError::TooLarge);
    }
    file.flush()?;
    debug!("stored {} bytes at {}", written, file.path().display());
    Ok(file)
}

fn analyze_saved(
    state: &AppState,
    upload: NamedTempFile,
    filename: String,
) -> Result<AnalyzeResponse, ApiError> {
    let kind = MediaKind::detect_path(upload.path(), &filename)?;
    if kind == MediaKind::Unknown {
        return Err(ApiError::UnsupportedType);
    }

    let analyzer = &state.analyzer;
    let path = upload.path();
    let verdict = panic::catch_unwind(AssertUnwindSafe(|| analyzer.analyze(path, kind)))
        .map_err(|payload| ApiError::Internal(panic_message(payload.as_ref())))?;

    // Dropping the handle deletes the upload
    drop(upload);
    Ok(AnalyzeResponse { verdict, file_type: kind, filename })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "analysis panicked".to_string()
    }
}

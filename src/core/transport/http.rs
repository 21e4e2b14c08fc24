//! HTTP transport implementation.
//!
//! REST-style JSON API over HTTP. Every API route passes the credential
//! check first and the per-client rate limiter second; `/` and `/health`
//! are open.

use axum::{
    Json, Router,
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use super::{TransportError, TransportResult, config::HttpConfig};
use crate::core::error::{Error, ErrorKind};
use crate::core::security::API_KEY_HEADER;
use crate::core::RwxServer;
use crate::domains::exec::ExecutionResult;

/// HTTP transport handler.
pub struct HttpTransport {
    config: HttpConfig,
}

/// Application state shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    server: RwxServer,
}

// ============================================================================
// Request / Response Bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateFileRequest {
    pub file_path: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct FilePathQuery {
    pub file_path: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameFileRequest {
    pub old_file_path: String,
    pub new_file_path: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DirectoryRequest {
    pub dir_path: String,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub command: String,
}

/// Body returned by mutating file operations.
#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub status: &'static str,
    pub message: String,
}

/// Body returned by a successful command run.
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub result: ExecutionResult,
}

impl OperationResponse {
    fn success(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            status: "success",
            message: message.into(),
        })
    }
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Status code for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden | ErrorKind::CommandNotAllowed => StatusCode::FORBIDDEN,
        ErrorKind::InvalidPath | ErrorKind::InvalidRequest | ErrorKind::CommandFailed => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Timeout | ErrorKind::ExecutionError | ErrorKind::InternalError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let mut body = serde_json::json!({
            "status": "error",
            "error": kind,
            "message": self.to_string(),
        });

        if let Error::Exec(e) = &self
            && let Some(result) = e.captured()
            && let Ok(serde_json::Value::Object(captured)) = serde_json::to_value(result)
        {
            for (key, value) in captured {
                body[key] = value;
            }
        }

        let mut response = (status_for(kind), Json(body)).into_response();

        if let Error::RateLimit(e) = &self {
            let secs = e.retry_after().as_secs_f64().ceil().max(1.0) as u64;
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

// ============================================================================
// Transport
// ============================================================================

impl HttpTransport {
    /// Create a new HTTP transport with the given config.
    pub fn new(config: HttpConfig) -> Self {
        Self { config }
    }

    /// Get the bind address.
    pub fn address(&self) -> String {
        self.config.address()
    }

    /// Run the HTTP transport until Ctrl-C.
    pub async fn run(self, server: RwxServer) -> TransportResult<()> {
        let addr = self.address();

        let sweeper = spawn_rate_limit_sweeper(&server);
        let app = build_router(server, self.config.enable_cors);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::bind(&addr, e))?;

        let cors_status = if self.config.enable_cors {
            "enabled"
        } else {
            "disabled"
        };
        info!("Ready - {} (CORS {})", self.config.description(), cors_status);
        info!("  → API:    authenticated with header '{}'", API_KEY_HEADER);
        info!("  → Health: GET /health");

        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }

        served.map_err(|e| TransportError::http(e.to_string()))
    }
}

/// Build the application router.
pub fn build_router(server: RwxServer, enable_cors: bool) -> Router {
    let state = AppState { server };

    let api = Router::new()
        .route("/create_file", post(create_file))
        .route("/delete_file", delete(delete_file))
        .route("/rename_file", put(rename_file))
        .route("/read", get(read_file))
        .route("/list", get(list_files))
        .route("/create_directory", post(create_directory))
        .route("/delete_directory", delete(delete_directory))
        .route("/execute", post(execute_command))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
                .layer(middleware::from_fn_with_state(state.clone(), enforce_rate_limit)),
        );

    let mut app = api
        .route("/health", get(health_check))
        .route("/", get(root_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

fn spawn_rate_limit_sweeper(server: &RwxServer) -> Option<JoinHandle<()>> {
    let limiter = server.rate_limiter().clone();
    if !limiter.config().enabled {
        return None;
    }

    let period = limiter.config().window().max(Duration::from_secs(1));
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            limiter.sweep(Instant::now());
        }
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// ============================================================================
// Middleware
// ============================================================================

fn client_identity(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Reject requests without the correct API key.
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, Error> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if let Err(e) = state.server.authenticator().verify(presented) {
        warn!(
            "Unauthorized access attempt from {} ({})",
            client_identity(&request),
            e
        );
        return Err(e.into());
    }

    Ok(next.run(request).await)
}

/// Reject clients that exhausted their request window.
async fn enforce_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, Error> {
    let client = client_identity(&request);
    state.server.rate_limiter().check(&client, Instant::now())?;
    Ok(next.run(request).await)
}

// ============================================================================
// Handlers
// ============================================================================

/// Root handler - provides API info.
async fn root_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": state.server.name(),
        "version": state.server.version(),
        "transport": "HTTP",
        "authentication": format!("header '{API_KEY_HEADER}'"),
        "endpoints": {
            "create_file": "POST /create_file",
            "delete_file": "DELETE /delete_file",
            "rename_file": "PUT /rename_file",
            "read": "GET /read",
            "list": "GET /list",
            "create_directory": "POST /create_directory",
            "delete_directory": "DELETE /delete_directory",
            "execute": "POST /execute",
            "health": "GET /health"
        }
    }))
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

#[instrument(skip_all, fields(file_path = %request.file_path))]
async fn create_file(
    State(state): State<AppState>,
    Json(request): Json<CreateFileRequest>,
) -> Result<Json<OperationResponse>, Error> {
    state
        .server
        .files()
        .create_file(&request.file_path, &request.content)
        .await?;
    Ok(OperationResponse::success("File created"))
}

#[instrument(skip_all, fields(file_path = %query.file_path))]
async fn delete_file(
    State(state): State<AppState>,
    Query(query): Query<FilePathQuery>,
) -> Result<Json<OperationResponse>, Error> {
    state.server.files().delete_file(&query.file_path).await?;
    Ok(OperationResponse::success("File deleted"))
}

#[instrument(skip_all, fields(old = %request.old_file_path, new = %request.new_file_path))]
async fn rename_file(
    State(state): State<AppState>,
    Json(request): Json<RenameFileRequest>,
) -> Result<Json<OperationResponse>, Error> {
    state
        .server
        .files()
        .rename_file(&request.old_file_path, &request.new_file_path)
        .await?;
    Ok(OperationResponse::success("File renamed"))
}

#[instrument(skip_all, fields(file_path = %query.file_path))]
async fn read_file(
    State(state): State<AppState>,
    Query(query): Query<FilePathQuery>,
) -> Result<impl IntoResponse, Error> {
    let content = state.server.files().read_file(&query.file_path).await?;
    Ok(Json(serde_json::json!({ "content": content })))
}

#[instrument(skip_all)]
async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, Error> {
    let files = state.server.files().list_dir(query.path.as_deref()).await?;
    Ok(Json(serde_json::json!({ "files": files })))
}

#[instrument(skip_all, fields(dir_path = %request.dir_path, recursive = request.recursive))]
async fn create_directory(
    State(state): State<AppState>,
    Json(request): Json<DirectoryRequest>,
) -> Result<Json<OperationResponse>, Error> {
    state
        .server
        .files()
        .create_directory(&request.dir_path, request.recursive)
        .await?;
    Ok(OperationResponse::success("Directory created"))
}

#[instrument(skip_all, fields(dir_path = %query.dir_path, recursive = query.recursive))]
async fn delete_directory(
    State(state): State<AppState>,
    Query(query): Query<DirectoryRequest>,
) -> Result<Json<OperationResponse>, Error> {
    state
        .server
        .files()
        .delete_directory(&query.dir_path, query.recursive)
        .await?;
    Ok(OperationResponse::success("Directory deleted"))
}

#[instrument(skip_all)]
async fn execute_command(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<impl IntoResponse, Error> {
    let result = state.server.exec().run(&request.command).await?;
    Ok(Json(ExecuteResponse {
        status: "success",
        result,
    }))
}

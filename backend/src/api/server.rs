//! HTTP Server for the mailmerge API.
//!
//! The caller's Gmail access token travels in the `Authorization: Bearer`
//! header of every request that delivers mail.
//!
//! # API Endpoints
//!
//! | Method | Path                     | Description                          |
//! |--------|--------------------------|--------------------------------------|
//! | GET    | `/health`                | Health check                         |
//! | POST   | `/api/recipients`        | Upload and validate a recipients CSV |
//! | POST   | `/api/preview`           | Render a template against rows       |
//! | POST   | `/api/send`              | Send one message now                 |
//! | POST   | `/api/send-bulk`         | Send or draft a batch                |
//! | GET    | `/api/templates`         | List stored templates                |
//! | PUT    | `/api/templates/{name}`  | Save a template                      |
//! | DELETE | `/api/templates/{name}`  | Delete a template                    |
//! | GET    | `/api/logs`              | SSE stream for logs and progress     |

use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::{get, post, put},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use super::logs::{log_error, log_info, log_success, LOG_BROADCASTER};
use super::types::{
    error_response, BulkSendRequest, BulkSendResponse, PreviewRequest, PreviewResponse,
    RecipientsResponse, SaveTemplateRequest, SendRequest, SendResponse, TemplateListResponse,
};
use crate::config::Config;
use crate::dispatch::check_batch_size;
use crate::error::{DeliveryError, PipelineError, ServerError, ServerResult, StoreError};
use crate::gmail::GmailDelivery;
use crate::parser::parse_bytes_auto;
use crate::personalize::{find_unbound_placeholders, personalize_all, unused_columns, PersonalizedMessage};
use crate::pipeline::{format_delimiter, run_batch, CsvInfo};
use crate::store::{FileTemplateStore, StoredTemplate, TemplateStore};
use crate::validation::{guess_address_column, is_valid_address, validate};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Mutex<FileTemplateStore>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = FileTemplateStore::with_path(&config.templates_path);
        Self {
            config: Arc::new(config),
            store: Arc::new(Mutex::new(store)),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    // Permissive CORS for local frontends
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/recipients", post(upload_recipients))
        .route("/api/preview", post(preview))
        .route("/api/send", post(send_one))
        .route("/api/send-bulk", post(send_bulk))
        .route("/api/templates", get(list_templates))
        .route("/api/templates/{name}", put(save_template).delete(delete_template))
        .route("/api/logs", get(sse_logs))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let port = config.port;
    let app = router(AppState::new(config));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("🚀 Mailmerge server running on http://localhost:{}", port);
    println!("   POST /api/recipients - Upload recipients CSV");
    println!("   POST /api/preview    - Preview personalized messages");
    println!("   POST /api/send-bulk  - Send or draft a batch");
    println!("   GET  /api/logs       - SSE log stream");
    println!("   GET  /health         - Health check");
    println!();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

impl ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::Delivery(DeliveryError::Unauthorized(_)) => StatusCode::UNAUTHORIZED,
            ServerError::Delivery(_) => StatusCode::BAD_GATEWAY,
            ServerError::Pipeline(PipelineError::Dispatch(_))
            | ServerError::Pipeline(PipelineError::Validation(_))
            | ServerError::Pipeline(PipelineError::Store(StoreError::InvalidName(_))) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Pipeline(PipelineError::Store(StoreError::NotFound(_))) => {
                StatusCode::NOT_FOUND
            }
            ServerError::Pipeline(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log_error(self.to_string());
        }
        (status, Json(error_response(&self.to_string()))).into_response()
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        ServerError::Pipeline(err.into())
    }
}

/// Extract the bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> ServerResult<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or(ServerError::Unauthorized)
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "mailmerge",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    // Lagged receivers just skip what they missed
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Parse and validate an uploaded recipients file.
async fn upload_recipients(mut multipart: Multipart) -> ServerResult<Json<RecipientsResponse>> {
    let mut file_data: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut email_column: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Read error: {}", e)))?;
                file_data = Some(bytes.to_vec());
            }
            "emailColumn" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Read error: {}", e)))?;
                email_column = Some(value.trim().to_string()).filter(|v| !v.is_empty());
            }
            _ => {}
        }
    }

    let bytes = file_data.ok_or_else(|| ServerError::BadRequest("No file provided".into()))?;

    log_info(format!(
        "📄 Recipients upload: {} ({} bytes)",
        file_name.as_deref().unwrap_or("unknown"),
        bytes.len()
    ));

    let parsed = parse_bytes_auto(&bytes);
    let csv_info = CsvInfo::describe(&parsed.table, &parsed.encoding, parsed.delimiter);
    log_success(format!(
        "Read {} rows, {} columns (separator '{}')",
        csv_info.row_count,
        csv_info.headers.len(),
        format_delimiter(parsed.delimiter)
    ));

    let email_column =
        email_column.or_else(|| guess_address_column(&parsed.table.headers).map(str::to_string));
    let validation = email_column
        .as_deref()
        .map(|column| validate(&parsed.table, column));

    Ok(Json(RecipientsResponse {
        csv_info,
        table: parsed.table,
        email_column,
        validation,
    }))
}

/// Render personalized messages without sending.
async fn preview(Json(request): Json<PreviewRequest>) -> ServerResult<Json<PreviewResponse>> {
    let columns = request.columns();

    Ok(Json(PreviewResponse {
        messages: personalize_all(&request.template, &request.rows, &request.email_column),
        unbound_placeholders: find_unbound_placeholders(&request.template, &columns),
        unused_columns: unused_columns(&request.template, &columns),
    }))
}

/// Send one message immediately.
async fn send_one(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SendRequest>,
) -> ServerResult<Json<SendResponse>> {
    let token = bearer_token(&headers)?;

    let to = request.to.trim();
    if !is_valid_address(to) {
        return Err(ServerError::BadRequest(format!(
            "Invalid email format \"{}\"",
            to
        )));
    }

    let html = request.body_format.render(&request.body);
    let message_id = state
        .config
        .gmail_client(&token)
        .send_now(to, &request.subject, &html)
        .await?;

    log_success(format!("Sent to {} ({})", to, message_id));
    Ok(Json(SendResponse {
        success: true,
        message_id,
    }))
}

/// Send or draft a batch of personalized messages.
async fn send_bulk(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BulkSendRequest>,
) -> ServerResult<Json<BulkSendResponse>> {
    let token = bearer_token(&headers)?;
    let options = state.config.dispatch_options();

    check_batch_size(request.emails.len(), options.max_batch_size).map_err(PipelineError::from)?;

    let mode = request.mode.effective(request.scheduled_time);
    let delivery = GmailDelivery::new(state.config.gmail_client(&token), mode)
        .with_body_format(request.body_format);
    let messages: Vec<PersonalizedMessage> = request.emails.into_iter().map(Into::into).collect();

    let batch_id = Uuid::new_v4().to_string();
    let summary = run_batch(&batch_id, &messages, &delivery, &options).await?;

    Ok(Json(BulkSendResponse::new(batch_id, mode, summary)))
}

async fn list_templates(State(state): State<AppState>) -> ServerResult<Json<TemplateListResponse>> {
    let store = state.store.lock().await;
    let templates = store.load_all()?.into_values().collect();
    Ok(Json(TemplateListResponse { templates }))
}

async fn save_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<SaveTemplateRequest>,
) -> ServerResult<Json<StoredTemplate>> {
    let mut store = state.store.lock().await;
    store.save(&name, request.template)?;

    let saved = store
        .get(name.trim())?
        .ok_or_else(|| ServerError::Internal(format!("Template \"{}\" vanished after save", name)))?;
    log_success(format!("💾 Template saved: {}", saved.name));
    Ok(Json(saved))
}

async fn delete_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ServerResult<Json<Value>> {
    let mut store = state.store.lock().await;
    store.delete(&name)?;

    log_info(format!("🗑️  Template deleted: {}", name));
    Ok(Json(json!({ "status": "deleted", "name": name })))
}

//! HTTP Server for the rules-matrix API.
//!
//! # API Endpoints
//!
//! | Method | Path                   | Description                        |
//! |--------|------------------------|------------------------------------|
//! | GET    | `/health`              | Health check                       |
//! | GET    | `/api/countries`       | Countries of the active matrix     |
//! | GET    | `/api/countries/{key}` | Matrix slice for one country       |
//! | POST   | `/api/evaluate`        | Notification-requirement decision  |
//! | GET    | `/api/rules/active`    | Active/latest version and history  |
//! | POST   | `/api/rules/upload`    | Upload a new matrix CSV (`file`)   |
//! | GET    | `/api/logs`            | SSE stream for operator logs       |

use std::{convert::Infallible, net::SocketAddr, time::Duration};

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderValue, Method},
    response::{sse::Event, Json, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use super::logs::{log_warning, LOG_BROADCASTER};
use super::types::{EvaluateBody, HealthResponse};
use crate::config::Config;
use crate::error::{EvaluationError, ServerError, ServerResult};
use crate::evaluation::{evaluate_current, Decision, EvaluationRequest};
use crate::models::{Country, CountryData};
use crate::registry::ActiveRulesInfo;
use crate::store::MatrixStore;
use crate::upload::{ActivationResult, RulesUpload, UploadWorkflow};

const MISSING_FILE_MESSAGE: &str = "No file uploaded (field name must be 'file').";

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: MatrixStore,
    pub uploads: UploadWorkflow,
}

impl AppState {
    pub fn new(store: MatrixStore, uploads: UploadWorkflow) -> Self {
        Self { store, uploads }
    }
}

/// Build the router without binding a socket.
pub fn router(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/countries", get(list_countries))
        .route("/api/countries/{key}", get(country_details))
        .route("/api/evaluate", post(evaluate))
        .route("/api/rules/active", get(active_rules))
        .route("/api/rules/upload", post(upload_rules))
        .route("/api/logs", get(sse_logs))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors_layer(&config.cors_origin))
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(config: Config, state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(state, &config);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("postcheck backend running on http://localhost:{}", config.port);

    axum::serve(listener, app).await?;
    Ok(())
}

fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = if origin == "*" {
        AllowOrigin::from(Any)
    } else {
        match HeaderValue::from_str(origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                log_warning(format!("Invalid CORS_ORIGIN '{}', allowing any origin", origin));
                AllowOrigin::from(Any)
            }
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}

/// Health check endpoint
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "postcheck",
        version: env!("CARGO_PKG_VERSION"),
        matrix_loaded: state.store.is_loaded(),
    })
}

async fn list_countries(State(state): State<AppState>) -> ServerResult<Json<Vec<Country>>> {
    let matrix = state.store.get()?;
    Ok(Json(matrix.countries.clone()))
}

async fn country_details(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ServerResult<Json<CountryData>> {
    let matrix = state.store.get()?;
    match matrix.country_data(&key) {
        Some(data) => Ok(Json(data.clone())),
        None if matrix.has_country(&key) => Ok(Json(CountryData::new())),
        None => Err(EvaluationError::UnknownCountry(key).into()),
    }
}

async fn evaluate(
    State(state): State<AppState>,
    Json(body): Json<EvaluateBody>,
) -> ServerResult<Json<Decision>> {
    let request = EvaluationRequest::try_from(body)?;
    Ok(Json(evaluate_current(&state.store, request)?))
}

async fn active_rules(State(state): State<AppState>) -> ServerResult<Json<ActiveRulesInfo>> {
    let registry = state.uploads.registry().clone();
    let info = tokio::task::spawn_blocking(move || registry.active_info())
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))??;
    Ok(Json(info))
}

/// Upload CSV endpoint
async fn upload_rules(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ServerResult<Json<ActivationResult>> {
    let mut upload: Option<RulesUpload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = field.file_name().unwrap_or_default().to_string();
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let content = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Read error: {}", e)))?;

        upload = Some(RulesUpload {
            original_name,
            mime_type,
            content: content.to_vec(),
        });
    }

    let upload = upload.ok_or_else(|| ServerError::BadRequest(MISSING_FILE_MESSAGE.to_string()))?;

    let workflow = state.uploads.clone();
    let result = tokio::task::spawn_blocking(move || workflow.upload_and_activate(upload))
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))??;

    Ok(Json(result))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| {
        let entry = result.ok()?;
        let json = serde_json::to_string(&entry).ok()?;
        Some(Ok(Event::default().data(json)))
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

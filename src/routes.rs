//! Route definitions and router setup
//!
//! The HTTP surface is thin plumbing around the engine: a trigger endpoint
//! the event router POSTs landed objects to, and the run-log query surface
//! the monitoring API consumes.

use crate::config::Settings;
use crate::error::{ApiResult, AppError};
use crate::orchestrator::ObjectRef;
use crate::runlog::IngestionRecord;
use crate::state::SharedState;
use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;
use validator::Validate;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    let cors = build_cors_layer(settings);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Trigger input: one landed object per delivery
        .route("/api/ingest", post(ingest))
        // Run log query surface
        .route("/api/runs", get(list_runs))
        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
            .max_age(Duration::from_secs(3600))
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
            .max_age(Duration::from_secs(3600))
    }
}

/// Trigger payload from the event-routing collaborator
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    #[validate(length(min = 1, message = "bucket is required"))]
    pub bucket: String,

    #[validate(length(min = 1, message = "key is required"))]
    pub key: String,

    #[validate(range(min = 0, message = "size must be non-negative"))]
    pub size: Option<i64>,

    pub content_type: Option<String>,
}

/// Run a single ingestion for a landed object. The run's outcome lives in
/// the returned record; only a log-write failure maps to an error status.
async fn ingest(
    State(state): State<SharedState>,
    Json(payload): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<IngestionRecord>)> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let object = ObjectRef {
        bucket: payload.bucket,
        key: payload.key,
        size: payload.size,
        content_type: payload.content_type,
    };

    let record = state
        .orchestrator
        .run(&object)
        .await
        .map_err(|e| AppError::LogUnavailable(e.to_string()))?;

    Ok((StatusCode::ACCEPTED, Json(record)))
}

/// Query parameters for the run log
#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub table: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
}

/// Response containing matching run records
#[derive(Debug, Serialize)]
pub struct RunsResponse {
    pub count: usize,
    pub runs: Vec<IngestionRecord>,
}

/// List run records for a table, optionally bounded by landed timestamp
async fn list_runs(
    State(state): State<SharedState>,
    Query(params): Query<RunsQuery>,
) -> ApiResult<Json<RunsResponse>> {
    let table = params
        .table
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest("table parameter is required".to_string()))?;

    let since = parse_timestamp(params.since.as_deref(), "since")?;
    let until = parse_timestamp(params.until.as_deref(), "until")?;

    let runs = state.run_log.query(&table, since, until).await?;
    Ok(Json(RunsResponse {
        count: runs.len(),
        runs,
    }))
}

fn parse_timestamp(raw: Option<&str>, name: &str) -> Result<Option<DateTime<Utc>>, AppError> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| {
                AppError::BadRequest(format!("{} must be an RFC 3339 timestamp", name))
            })
    })
    .transpose()
}

/// Health check endpoint
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

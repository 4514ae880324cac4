//! Error handling module
//!
//! `IngestError` is the run-level taxonomy: every variant except `LogWrite`
//! is absorbed into the run's IngestionRecord and never crosses the HTTP
//! boundary. `AppError` covers the thin API surface (query params, pool).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Ingestion run error taxonomy
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("MalformedKey: {0}")]
    MalformedKey(String),

    #[error("UnknownTable: no definition for {namespace}.{table}")]
    UnknownTable { namespace: String, table: String },

    #[error("ActionNotPermitted: {action} is not allowed on {namespace}.{table}")]
    ActionNotPermitted {
        namespace: String,
        table: String,
        action: String,
    },

    #[error("SchemaMismatch: {0}")]
    SchemaMismatch(String),

    #[error("InvalidDefinition: {0}")]
    InvalidDefinition(String),

    #[error("LoadError: {0}")]
    Load(String),

    #[error("SchemaApplyError: {0}")]
    SchemaApply(String),

    #[error("LogWriteError: {0}")]
    LogWrite(String),
}

impl IngestError {
    /// True for errors that reject the run before it touches the warehouse.
    /// `Load` and `SchemaApply` are mutation failures; `LogWrite` is neither
    /// and escapes to the trigger layer.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            IngestError::MalformedKey(_)
                | IngestError::UnknownTable { .. }
                | IngestError::ActionNotPermitted { .. }
                | IngestError::SchemaMismatch(_)
                | IngestError::InvalidDefinition(_)
        )
    }

    /// Short error-kind token recorded in the run log detail.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::MalformedKey(_) => "MalformedKey",
            IngestError::UnknownTable { .. } => "UnknownTable",
            IngestError::ActionNotPermitted { .. } => "ActionNotPermitted",
            IngestError::SchemaMismatch(_) => "SchemaMismatch",
            IngestError::InvalidDefinition(_) => "InvalidDefinition",
            IngestError::Load(_) => "LoadError",
            IngestError::SchemaApply(_) => "SchemaApplyError",
            IngestError::LogWrite(_) => "LogWriteError",
        }
    }
}

/// API-surface error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Run log unavailable: {0}")]
    LogUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            AppError::Database(e) => {
                error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Pool(e) => {
                error!("Pool error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "POOL_EXHAUSTED",
                    "Database connection pool exhausted".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
                None,
            ),
            AppError::LogUnavailable(msg) => {
                error!("Run log write failed: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "LOG_WRITE_ERROR",
                    "Run could not be recorded in the ingestion log".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(error_code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

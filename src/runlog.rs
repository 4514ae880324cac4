//! Ingestion run log
//!
//! Append-only audit trail: exactly one record per run attempt, written at
//! the terminal state and never updated or deleted. This module owns all
//! storage and query access to the log; nothing else reads or writes it.

use crate::classifier::Action;
use crate::error::{AppError, IngestError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Rejected,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Rejected => "REJECTED",
            RunStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for RunStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(RunStatus::Success),
            "REJECTED" => Ok(RunStatus::Rejected),
            "FAILED" => Ok(RunStatus::Failed),
            _ => Err(()),
        }
    }
}

/// One run attempt, as recorded in the audit trail. `namespace`, `table`,
/// and `action` are None only when classification itself failed and the key
/// gave no usable hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionRecord {
    pub run_id: Uuid,
    pub file_key: String,
    pub namespace: Option<String>,
    pub table: Option<String>,
    pub action: Option<Action>,
    pub status: RunStatus,
    pub rows_affected: Option<i64>,
    pub detail: String,
    pub file_size: Option<i64>,
    pub checksum: Option<String>,
    pub landed_timestamp: DateTime<Utc>,
    /// Set on SUCCESS only
    pub loaded_timestamp: Option<DateTime<Utc>>,
}

/// Write seam for the run log
#[async_trait]
pub trait RunLog: Send + Sync {
    /// Append one terminal record. Failure here is the one unrecoverable
    /// run condition and surfaces to the trigger layer.
    async fn append(&self, record: &IngestionRecord) -> Result<(), IngestError>;
}

/// PostgreSQL-backed run log
pub struct PgRunLog {
    pool: Pool,
}

const CREATE_LOG_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS ingestion_log (
        run_id UUID PRIMARY KEY,
        file_key TEXT NOT NULL,
        namespace TEXT,
        table_name TEXT,
        action TEXT,
        status TEXT NOT NULL,
        rows_affected BIGINT,
        detail TEXT NOT NULL,
        file_size BIGINT,
        checksum TEXT,
        landed_timestamp TIMESTAMPTZ NOT NULL,
        loaded_timestamp TIMESTAMPTZ
    )
"#;

const INSERT_RECORD: &str = r#"
    INSERT INTO ingestion_log (
        run_id, file_key, namespace, table_name, action, status,
        rows_affected, detail, file_size, checksum,
        landed_timestamp, loaded_timestamp
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
"#;

impl PgRunLog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create the log table and its query index if missing.
    pub async fn ensure_table(&self) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client.execute(CREATE_LOG_TABLE, &[]).await?;
        client
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_ingestion_log_table_landed \
                 ON ingestion_log (table_name, landed_timestamp)",
                &[],
            )
            .await?;
        Ok(())
    }

    /// Query records for one table, optionally bounded by landed timestamp,
    /// ordered by landed timestamp ascending. The caller paginates.
    pub async fn query(
        &self,
        table: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<IngestionRecord>, AppError> {
        let client = self.pool.get().await?;

        let mut sql = String::from(
            "SELECT run_id, file_key, namespace, table_name, action, status, \
             rows_affected, detail, file_size, checksum, landed_timestamp, loaded_timestamp \
             FROM ingestion_log WHERE table_name = $1",
        );
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = vec![&table];
        if let Some(ref s) = since {
            params.push(s);
            sql.push_str(&format!(" AND landed_timestamp >= ${}", params.len()));
        }
        if let Some(ref u) = until {
            params.push(u);
            sql.push_str(&format!(" AND landed_timestamp <= ${}", params.len()));
        }
        sql.push_str(" ORDER BY landed_timestamp ASC");

        let rows = client.query(sql.as_str(), &params).await?;
        rows.into_iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: tokio_postgres::Row) -> Result<IngestionRecord, AppError> {
    let status_raw: String = row.get("status");
    let status = status_raw
        .parse::<RunStatus>()
        .map_err(|_| AppError::Internal(format!("unreadable status '{}' in log", status_raw)))?;
    let action = row
        .get::<_, Option<String>>("action")
        .map(|a| {
            a.parse::<Action>()
                .map_err(|_| AppError::Internal(format!("unreadable action '{}' in log", a)))
        })
        .transpose()?;

    Ok(IngestionRecord {
        run_id: row.get("run_id"),
        file_key: row.get("file_key"),
        namespace: row.get("namespace"),
        table: row.get("table_name"),
        action,
        status,
        rows_affected: row.get("rows_affected"),
        detail: row.get("detail"),
        file_size: row.get("file_size"),
        checksum: row.get("checksum"),
        landed_timestamp: row.get("landed_timestamp"),
        loaded_timestamp: row.get("loaded_timestamp"),
    })
}

#[async_trait]
impl RunLog for PgRunLog {
    async fn append(&self, record: &IngestionRecord) -> Result<(), IngestError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| IngestError::LogWrite(format!("log connection unavailable: {}", e)))?;

        let action = record.action.map(|a| a.as_str());
        client
            .execute(
                INSERT_RECORD,
                &[
                    &record.run_id,
                    &record.file_key,
                    &record.namespace,
                    &record.table,
                    &action,
                    &record.status.as_str(),
                    &record.rows_affected,
                    &record.detail,
                    &record.file_size,
                    &record.checksum,
                    &record.landed_timestamp,
                    &record.loaded_timestamp,
                ],
            )
            .await
            .map_err(|e| IngestError::LogWrite(format!("insert failed: {}", e)))?;

        info!(
            run_id = %record.run_id,
            table = record.table.as_deref().unwrap_or("unknown"),
            status = record.status.as_str(),
            "run recorded"
        );
        Ok(())
    }
}

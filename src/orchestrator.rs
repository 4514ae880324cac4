//! Ingestion orchestrator
//!
//! Drives one run end to end: classify -> fetch -> validate -> mutate ->
//! log. Every run terminates by writing exactly one IngestionRecord; the
//! only error that escapes to the caller is a failed log write, which the
//! trigger layer's retry policy owns. All collaborators are injected so
//! tests can supply isolated instances.

use crate::artifact;
use crate::classifier::StorageKey;
use crate::error::IngestError;
use crate::governance::{GovernanceStore, TableRef};
use crate::objectstore::ObjectStore;
use crate::runlog::{IngestionRecord, RunLog, RunStatus};
use crate::validation::{self, Mutation};
use crate::warehouse::{MutationOutcome, Warehouse};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Trigger input: one landed object, delivered at least once by the
/// external event-routing collaborator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
    pub size: Option<i64>,
    pub content_type: Option<String>,
}

/// Composes classifier, validator, mutator, and log into single runs
pub struct IngestionOrchestrator {
    governance: Arc<GovernanceStore>,
    warehouse: Arc<dyn Warehouse>,
    objects: Arc<dyn ObjectStore>,
    log: Arc<dyn RunLog>,
    delimiter: char,
}

/// Everything a run learned before reaching its terminal state
struct RunOutcome {
    key: Option<StorageKey>,
    checksum: Option<String>,
    result: Result<MutationOutcome, IngestError>,
}

impl IngestionOrchestrator {
    pub fn new(
        governance: Arc<GovernanceStore>,
        warehouse: Arc<dyn Warehouse>,
        objects: Arc<dyn ObjectStore>,
        log: Arc<dyn RunLog>,
        delimiter: char,
    ) -> Self {
        Self {
            governance,
            warehouse,
            objects,
            log,
            delimiter,
        }
    }

    /// Execute one run for a landed object. Returns the terminal record;
    /// errors only when the record itself could not be written.
    pub async fn run(&self, object: &ObjectRef) -> Result<IngestionRecord, IngestError> {
        let run_id = Uuid::new_v4();
        let landed = Utc::now();
        debug!(
            %run_id,
            bucket = %object.bucket,
            key = %object.key,
            content_type = object.content_type.as_deref().unwrap_or(""),
            "run received"
        );

        let outcome = self.drive(run_id, object).await;

        let status = match &outcome.result {
            Ok(_) => RunStatus::Success,
            Err(e) if e.is_rejection() => RunStatus::Rejected,
            Err(_) => RunStatus::Failed,
        };
        let (rows_affected, detail) = match &outcome.result {
            Ok(applied) => (applied.rows_affected, applied.detail.clone()),
            Err(e) => (None, e.to_string()),
        };

        let record = IngestionRecord {
            run_id,
            file_key: object.key.clone(),
            namespace: outcome.key.as_ref().map(|k| k.namespace.clone()),
            table: outcome
                .key
                .as_ref()
                .map(|k| k.table.clone())
                .or_else(|| StorageKey::table_hint(&object.key)),
            action: outcome.key.as_ref().map(|k| k.action),
            status,
            rows_affected,
            detail,
            file_size: object.size,
            checksum: outcome.checksum,
            landed_timestamp: landed,
            loaded_timestamp: (status == RunStatus::Success).then(Utc::now),
        };

        match status {
            RunStatus::Success => info!(%run_id, key = %object.key, "run succeeded"),
            _ => warn!(%run_id, key = %object.key, status = status.as_str(), detail = %record.detail, "run did not succeed"),
        }

        // Terminal state: the record is written exactly once, whichever
        // branch got us here. A log failure is fatal to the run.
        self.log.append(&record).await?;
        debug!(%run_id, "run logged");

        Ok(record)
    }

    async fn drive(&self, run_id: Uuid, object: &ObjectRef) -> RunOutcome {
        let key = match StorageKey::parse(&object.key) {
            Ok(key) => key,
            Err(e) => {
                return RunOutcome {
                    key: None,
                    checksum: None,
                    result: Err(e),
                }
            }
        };
        debug!(%run_id, table = %key.table, action = %key.action, "run classified");

        let bytes = match self.objects.fetch(&object.key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return RunOutcome {
                    key: Some(key),
                    checksum: None,
                    result: Err(e),
                }
            }
        };
        let checksum = Some(artifact::checksum(&bytes));

        let table = TableRef::new(key.namespace.clone(), key.table.clone());
        let definition = self.governance.get(&table).await;
        let mutation = match validation::validate(&key, definition.as_ref(), &bytes, self.delimiter)
        {
            Ok(mutation) => mutation,
            Err(e) => {
                return RunOutcome {
                    key: Some(key),
                    checksum,
                    result: Err(e),
                }
            }
        };
        debug!(%run_id, table = %mutation.table(), action = %mutation.action(), "run validated");

        let result = self.warehouse.apply(&mutation).await;
        if result.is_ok() {
            debug!(%run_id, "run mutated");
            // Governance commits only after the structural change landed, so
            // the store never advertises a schema the warehouse lacks.
            if let Mutation::DefineSchema { table, definition } = mutation {
                self.governance.put(table, definition).await;
            }
        }

        RunOutcome {
            key: Some(key),
            checksum,
            result,
        }
    }
}

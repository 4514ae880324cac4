//! Application state management
//!
//! Shared state for the thin HTTP surface: the orchestrator plus direct
//! query access to the run log.

use crate::config::Settings;
use crate::governance::GovernanceStore;
use crate::objectstore::FsObjectStore;
use crate::orchestrator::IngestionOrchestrator;
use crate::runlog::PgRunLog;
use crate::warehouse::PgWarehouse;
use deadpool_postgres::Pool;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// The ingestion engine; one run per trigger delivery
    pub orchestrator: IngestionOrchestrator,

    /// Run log query access (the monitoring surface)
    pub run_log: Arc<PgRunLog>,
}

impl AppState {
    pub fn new(pool: Pool, run_log: Arc<PgRunLog>, settings: &Settings) -> Self {
        let governance = Arc::new(GovernanceStore::new());
        let warehouse = Arc::new(PgWarehouse::new(
            pool,
            settings.ingest.insert_chunk_size,
        ));
        let objects = Arc::new(FsObjectStore::new(settings.ingest.landing_root.clone()));

        let orchestrator = IngestionOrchestrator::new(
            governance.clone(),
            warehouse,
            objects,
            run_log.clone(),
            settings.ingest.delimiter,
        );

        Self {
            orchestrator,
            run_log,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;

//! Loadflow - Batch Ingestion Engine
//!
//! Files land in an object-store landing zone under
//! `{namespace}/{action}/{table}/{artifact}`; each trigger delivery drives
//! one orchestrator run that classifies the key, validates the artifact
//! against governance rules, applies the warehouse mutation transactionally,
//! and records exactly one audit entry in the ingestion log.

mod artifact;
mod classifier;
mod config;
mod error;
mod governance;
mod objectstore;
mod orchestrator;
mod routes;
mod runlog;
mod state;
mod validation;
mod warehouse;

use crate::config::{DatabaseConfig, Settings};
use crate::routes::create_router;
use crate::runlog::PgRunLog;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("🚀 Starting Loadflow - Batch Ingestion Engine...");

    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");
    info!(
        "📂 Landing zone: {}",
        settings.ingest.landing_root.display()
    );

    let pool = match init_database_pool(&settings.database).await {
        Ok(pool) => {
            info!("✅ Warehouse pool created successfully");
            pool
        }
        Err(e) => {
            error!("❌ FATAL: Failed to initialize warehouse pool: {}", e);
            error!("DATABASE_URL must be set and the warehouse must be accessible");
            return Err(e);
        }
    };

    // The ingestion log must exist before the first run; without it no run
    // is auditable.
    let run_log = Arc::new(PgRunLog::new(pool.clone()));
    run_log
        .ensure_table()
        .await
        .map_err(|e| anyhow::anyhow!("failed to initialize ingestion log: {}", e))?;
    info!("✅ Ingestion log initialized");

    let state = Arc::new(AppState::new(pool, run_log, &settings));
    let app = create_router(state, &settings);

    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   POST /api/ingest  - Run ingestion for a landed object");
    info!("   GET  /api/runs    - Query the ingestion log (?table=&since=&until=)");
    info!("   GET  /health      - Health check");
    info!("");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,loadflow=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Build the warehouse pool, with TLS when the configuration demands it
async fn init_database_pool(config: &DatabaseConfig) -> anyhow::Result<deadpool_postgres::Pool> {
    use deadpool_postgres::{Config, ManagerConfig, PoolConfig, RecyclingMethod, Runtime};

    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.pool = Some(PoolConfig::new(config.max_pool_size));
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = if config.ssl {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| anyhow::anyhow!("Failed to create TLS pool: {}", e))?
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| anyhow::anyhow!("Failed to create pool: {}", e))?
    };

    // Verify the warehouse is reachable before serving triggers
    let client = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get pool connection: {}", e))?;
    client
        .query_one("SELECT 1 as ok", &[])
        .await
        .map_err(|e| anyhow::anyhow!("Failed to verify warehouse connection: {}", e))?;

    info!("✅ Warehouse connection successful (TLS: {})", config.ssl);
    Ok(pool)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}

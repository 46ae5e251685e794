use anyhow::{Context, Result, bail};
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use handlers::AppState;
use services::{
    execution_store::ExecutionStore,
    poll_service::Trigger,
    remote_store::{ObjectStoreRemote, RemoteStore},
    scheduler::{CycleOutcome, Scheduler},
    staging_service::StagingStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting gcs-watch with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if db_path != ":memory:" && !db_url.starts_with("sqlite::memory:") {
        let db_path_obj = Path::new(db_path);
        if let Some(parent) = db_path_obj.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
        if let Err(e) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(db_path)
        {
            tracing::warn!("Failed to open database file manually: {}", e);
        }
    }

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?,
    );
    let executions = ExecutionStore::new(db);

    // --- Schema is idempotent; `--migrate` exits right after applying it ---
    executions.migrate().await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize core services ---
    let trigger = Trigger::from_config(&cfg.trigger)?;
    let staging = StagingStore::open(&cfg.staging_dir)
        .await
        .with_context(|| format!("opening staging directory {}", cfg.staging_dir))?;
    tracing::info!("Staging payloads under {}", staging.base_path().display());

    let store: Arc<dyn RemoteStore> = Arc::new(ObjectStoreRemote::gcs(cfg.auth.clone()));
    let scheduler = Scheduler::new(
        trigger,
        cfg.context.clone(),
        cfg.trigger.interval,
        store,
        staging.clone(),
        executions.clone(),
    );

    // --- Single cycle mode ---
    if cfg.once {
        return match scheduler.run_once().await {
            CycleOutcome::Failed { error } => bail!("poll cycle failed: {}", error),
            outcome => {
                tracing::info!("poll cycle finished: {:?}", outcome);
                Ok(())
            }
        };
    }

    // --- Build router ---
    let state = AppState {
        executions,
        staging,
        status: scheduler.status(),
    };
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    // --- Poll until Ctrl-C ---
    scheduler
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {}", err);
                std::future::pending::<()>().await;
            }
        })
        .await;

    server.abort();
    Ok(())
}

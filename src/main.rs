use anyhow::{Context, Result};
use chrono::Utc;
use crate::{
    config::RunMode,
    services::{blob_store::BlobStore, record_store::RecordStore, vault_service::VaultService},
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting vault-drop with config: {:?}", cfg);

    // --- Ensure blob directory exists ---
    if !Path::new(&cfg.blob_dir).exists() {
        fs::create_dir_all(&cfg.blob_dir)?;
        tracing::info!("Created blob directory at {}", cfg.blob_dir);
    }

    // --- Initialize SQLite connection ---
    let options = SqliteConnectOptions::from_str(&cfg.database_url)
        .with_context(|| format!("parsing database URL `{}`", cfg.database_url))?
        .create_if_missing(true);

    // Create parent directory of a file-backed database if needed
    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("connecting to record store")?,
    );

    let records = RecordStore::new(db);
    records.migrate().await.context("applying schema")?;

    let service = VaultService::new(records, BlobStore::new(&cfg.blob_dir));

    // --- One-shot modes ---
    match mode {
        RunMode::Migrate => {
            tracing::info!("Database migration complete.");
            return Ok(());
        }
        RunMode::PurgeExpired => {
            let purged = service.purge_expired(Utc::now()).await?;
            tracing::info!("Purged {} expired vault items.", purged);
            return Ok(());
        }
        RunMode::Serve => {}
    }

    // --- Build router ---
    let app = routes::routes::app(service, &cfg);

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
    axum::serve(listener, app).await?;

    Ok(())
}

use anyhow::{Context, Result};
use metrika_common::secure::Signer;
use metrika_server::app;
use metrika_server::audit::AuditLogger;
use metrika_server::config::ServerConfig;
use metrika_server::state::{AppState, Storage};
use metrika_storage::dumper::{self, DumpMode, FileDumper};
use metrika_storage::sqlite::{SqliteBackend, SqliteDatabase};
use metrika_storage::StorageState;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("metrika_server=info".parse()?)
                .add_directive("metrika_storage=info".parse()?),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());
    let mut config = ServerConfig::load(&config_path)?;
    config.apply_env(|key| std::env::var(key).ok())?;

    run_server(config).await
}

async fn run_server(config: ServerConfig) -> Result<()> {
    let cancel = CancellationToken::new();

    // the dumper only backs the in-memory store
    let (storage, dumper) = match &config.database.path {
        Some(path) => {
            let db = SqliteDatabase::open(Path::new(path))
                .with_context(|| format!("failed to open database '{path}'"))?;
            (Storage::sqlite(SqliteBackend::new(db)), None)
        }
        None => {
            let dumper = Arc::new(FileDumper::new(&config.dump.file_storage_path));
            let (gauges, counters) = if config.dump.restore {
                dumper.restore().with_context(|| {
                    format!("failed to restore metrics from '{}'", dumper.path().display())
                })?
            } else {
                (StorageState::new(), StorageState::new())
            };
            (Storage::in_memory(gauges, counters), Some(dumper))
        }
    };
    let backend = storage.backend;

    let mut state =
        AppState::new(storage).with_signer(Signer::from_key(config.secret_key.as_deref()));
    if let Some(audit) = AuditLogger::from_config(&config.audit)? {
        state = state.with_audit(Arc::new(audit));
    }

    let mut dump_task = None;
    if let Some(dumper) = &dumper {
        match config.dump.mode() {
            DumpMode::Synchronous => {
                state = state.with_sync_dump(Arc::clone(dumper), config.dump.fail_on_sync_error);
            }
            DumpMode::Periodic(every) => {
                dump_task = Some(dumper::spawn_periodic(
                    Arc::clone(dumper),
                    state.service.gauges(),
                    state.service.counters(),
                    every,
                    cancel.clone(),
                ));
            }
        }
    }

    tracing::info!(
        address = %config.address,
        backend,
        dump = ?dumper.as_ref().map(|_| config.dump.mode()),
        signed = state.signer.is_some(),
        audit = state.audit.is_some(),
        "metrika-server starting"
    );

    let app = app::build_http_app(state.clone());
    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("failed to bind {}", config.address))?;
    tracing::info!(addr = %listener.local_addr()?, "Server started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        signal::ctrl_c().await.ok();
        tracing::info!("Shutting down gracefully");
    })
    .await
    .context("HTTP server error")?;

    cancel.cancel();
    if let Some(task) = dump_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Dump task failed");
        }
    }
    if let Some(dumper) = dumper {
        let gauges = state.service.gauges();
        let counters = state.service.counters();
        match dumper.dump(gauges.as_ref(), counters.as_ref()) {
            Ok(count) => tracing::info!(count, path = %dumper.path().display(), "Final dump written"),
            Err(e) => tracing::error!(error = %e, "Final dump failed"),
        }
    }
    tracing::info!("Server stopped");

    Ok(())
}

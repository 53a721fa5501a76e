//! Grimoire Server - Main entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grimoire_common::logging::{init_logging, LogConfig};
use grimoire_common::SyncType;
use sqlx::PgPool;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use grimoire_server::{
    api::{self, AppState},
    config::Config,
    db,
    features::syncs::SyncView,
    ingest::{
        PgRecordMapper, PgSyncStore, SchemaAnalyzer, SyncFilter, SyncOrchestrator, SyncOutcome,
        SyncService, TaskDispatcher,
    },
};

#[derive(Parser)]
#[command(name = "grimoire-server", version, about = "Card catalog bulk-data ingestion server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Run one sync to the end of its streaming pass and wait for its imports
    Sync {
        /// oracle_cards, default_cards, all_cards, unique_artwork or rulings
        sync_type: SyncType,
    },
    /// Cancel a pending or downloading sync
    Cancel { id: Uuid },
    /// Show recent syncs
    Status {
        #[arg(long)]
        sync_type: Option<SyncType>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Report field statistics of a downloaded bulk file
    Analyze {
        file: PathBuf,
        /// Stop after this many records
        #[arg(long)]
        limit: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .log_file_prefix("grimoire-server")
        .filter_directives("grimoire_server=debug,tower_http=debug,sqlx=warn")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Sync { sync_type } => run_sync(sync_type).await,
        Command::Cancel { id } => cancel(id).await,
        Command::Status { sync_type, limit } => status(sync_type, limit).await,
        Command::Analyze { file, limit } => analyze(file, limit).await,
    }
}

struct Runtime {
    config: Config,
    pool: PgPool,
    service: SyncService,
    dispatcher: Arc<TaskDispatcher>,
}

async fn runtime() -> Result<Runtime> {
    let config = Config::load().context("Failed to load configuration")?;

    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to the database")?;
    db::migrate(&pool).await?;

    let store = Arc::new(PgSyncStore::new(pool.clone()));
    let mapper = Arc::new(PgRecordMapper::new(pool.clone()));
    let (service, dispatcher) = SyncService::from_config(&config.sync, store, mapper)?;

    Ok(Runtime {
        config,
        pool,
        service,
        dispatcher,
    })
}

async fn serve() -> Result<()> {
    info!("Starting Grimoire Server");
    let Runtime {
        config,
        pool,
        service,
        dispatcher,
    } = runtime().await?;

    let recovered = service
        .recover_interrupted()
        .await
        .context("Failed to recover interrupted syncs")?;
    if recovered > 0 {
        info!(recovered, "Recovered syncs interrupted by the previous run");
    }

    let orchestrator_shutdown = if config.sync.auto_sync {
        let orchestrator = SyncOrchestrator::new(
            service.clone(),
            config.sync.enabled_types.clone(),
            config.sync.auto_interval(),
        );
        let token = orchestrator.shutdown_token();
        orchestrator.start();
        Some(token)
    } else {
        info!("Automatic syncs are disabled (SYNC_AUTO_ENABLED=false)");
        None
    };

    let router = api::create_router(
        AppState {
            service,
            db: Some(pool),
        },
        &config,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));
    api::serve(router, &config, shutdown).await?;

    if let Some(token) = orchestrator_shutdown {
        token.cancel();
    }

    info!(pending = dispatcher.pending(), "Waiting for batch imports to finish");
    if tokio::time::timeout(config.server.shutdown_timeout(), dispatcher.wait_idle())
        .await
        .is_err()
    {
        tracing::warn!("Shutdown timeout reached with batch imports still running");
    }

    info!("Server shut down gracefully");
    Ok(())
}

async fn run_sync(sync_type: SyncType) -> Result<()> {
    let runtime = runtime().await?;

    let (record, outcome) = runtime.service.run_now(sync_type).await?;
    runtime.dispatcher.wait_idle().await;
    let record = runtime.service.get(record.id).await?;

    match &outcome {
        SyncOutcome::Completed(summary) => println!(
            "{} {}: {} records in {} batches ({} skipped), {} imported, {} failed batches",
            sync_type,
            record.id,
            summary.records_dispatched,
            summary.batches_dispatched,
            summary.records_skipped,
            record.imported_records,
            record.failed_batches,
        ),
        SyncOutcome::Redundant { version } => {
            println!("{} {}: already at version {}", sync_type, record.id, version)
        },
        SyncOutcome::Cancelled => println!("{} {}: cancelled", sync_type, record.id),
        SyncOutcome::Failed { message } => {
            println!("{} {}: failed: {}", sync_type, record.id, message)
        },
        SyncOutcome::NotPending { status } => {
            println!("{} {}: not pending ({})", sync_type, record.id, status)
        },
    }

    Ok(())
}

async fn cancel(id: Uuid) -> Result<()> {
    let runtime = runtime().await?;
    let record = runtime.service.cancel(id).await?;
    println!("{} {}: {}", record.sync_type, record.id, record.status);
    Ok(())
}

async fn status(sync_type: Option<SyncType>, limit: i64) -> Result<()> {
    let runtime = runtime().await?;
    let filter = SyncFilter {
        sync_type,
        limit,
        ..Default::default()
    };
    let (records, total) = runtime.service.list(&filter).await?;

    for record in records {
        let view = SyncView::from(record);
        let processing = view
            .record
            .processing_status
            .map(|status| status.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<15} {:<11} {:<10} {:>6.2}%  {}",
            view.record.id,
            view.record.sync_type,
            view.record.status,
            processing,
            view.progress_percentage,
            view.record.version.as_deref().unwrap_or("-"),
        );
    }
    println!("{} sync(s) total", total);

    Ok(())
}

async fn analyze(file: PathBuf, limit: Option<u64>) -> Result<()> {
    let analyzer = match limit {
        Some(limit) => SchemaAnalyzer::new().with_limit(limit),
        None => SchemaAnalyzer::new(),
    };
    let report = analyzer
        .analyze_file(&file)
        .await
        .with_context(|| format!("Failed to analyze {}", file.display()))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("Received terminate signal, starting graceful shutdown"),
    }

    shutdown.cancel();
}

mod metrics;
mod registry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chapterforge_core::{
    create_notification_channel, load_config, validate_config, ArtifactStore, BatchCoordinator,
    BatchStatus, Config, FsArtifactStore, JobRequest, JobStore, LoggingConfig, Notification,
    Orchestrator, SanitizedConfig, SqliteJobStore,
};

use registry::build_registry;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run one batch of chapter generation jobs and print its final snapshot.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file holding the job requests of the batch
    requests: PathBuf,

    /// Seconds to wait for the batch before cancelling it
    #[arg(long, default_value_t = 3600)]
    wait_secs: u64,

    /// Configuration file
    #[arg(long, env = "CHAPTERFORGE_CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    match run(args).await {
        Ok(BatchStatus::Succeeded) => {}
        Ok(status) => {
            warn!("Batch ended {}", status.as_str());
            std::process::exit(2);
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        config
            .filter
            .clone()
            .unwrap_or_else(|| "info,chapterforge_core=debug".to_string())
            .into()
    });

    // stdout carries the batch snapshot only.
    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
}

/// Load the config and install logging from it.
///
/// Logging is installed with defaults when the config cannot be loaded, so
/// the error is still reported.
fn load_config_with_logging(path: &Path) -> Result<Config> {
    match load_config(path) {
        Ok(config) => {
            init_logging(&config.logging);
            Ok(config)
        }
        Err(e) => {
            init_logging(&LoggingConfig::default());
            Err(e).with_context(|| format!("Failed to load config from {:?}", path))
        }
    }
}

async fn run(args: Args) -> Result<BatchStatus> {
    let Args {
        requests: requests_path,
        wait_secs,
        config: config_path,
    } = args;

    // Load configuration
    let config = load_config_with_logging(&config_path)?;

    validate_config(&config).context("Configuration validation failed")?;

    let sanitized = SanitizedConfig::from(&config);
    let config_json = serde_json::to_string(&sanitized).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        "Configuration loaded from {:?}",
        config_path
    );

    // Read requests
    let raw = tokio::fs::read_to_string(&requests_path)
        .await
        .with_context(|| format!("Failed to read {:?}", requests_path))?;
    let requests: Vec<JobRequest> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse requests from {:?}", requests_path))?;
    info!("Loaded {} job requests", requests.len());

    // Create artifact store
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(
        FsArtifactStore::open(&config.artifacts.root)
            .await
            .context("Failed to open artifact store")?,
    );
    info!("Artifact store at {:?}", config.artifacts.root);

    // Create SQLite job store if configured
    let job_store: Option<Arc<dyn JobStore>> = match &config.database.path {
        Some(path) => {
            let store = SqliteJobStore::new(path).context("Failed to create job store")?;
            info!("Job store initialized at {:?}", path);
            Some(Arc::new(store))
        }
        None => {
            info!("No database configured, job state is not persisted");
            None
        }
    };

    let registry = build_registry(&config.generators, Arc::clone(&artifacts)).await?;

    // Notification logger
    let (sink, mut notifications) =
        create_notification_channel(config.orchestrator.notification_buffer);
    let logger_handle = tokio::spawn(async move {
        while let Some(envelope) = notifications.recv().await {
            match envelope.notification {
                Notification::JobFinished {
                    job_id,
                    content_type,
                    chapter_ref,
                    final_state,
                    artifact_ref,
                    error,
                    ..
                } => info!(
                    job_id = %job_id,
                    content_type = %content_type,
                    chapter_ref = %chapter_ref,
                    state = %final_state,
                    artifact = artifact_ref.as_deref().unwrap_or("-"),
                    error = %error.map(|e| e.to_string()).unwrap_or_default(),
                    "Job finished"
                ),
                Notification::BatchFinished {
                    batch_id,
                    final_status,
                    progress,
                } => info!(
                    batch_id = %batch_id,
                    status = final_status.as_str(),
                    succeeded = progress.succeeded,
                    failed = progress.failed,
                    cancelled = progress.cancelled,
                    "Batch finished"
                ),
            }
        }
    });

    let mut orchestrator =
        Orchestrator::new(config.orchestrator.clone(), registry, artifacts)
            .with_notifications(Arc::new(sink));
    if let Some(store) = job_store {
        orchestrator = orchestrator.with_store(store);
    }
    orchestrator.start();
    let coordinator = BatchCoordinator::new(orchestrator.clone());

    let batch = coordinator
        .submit(requests)
        .await
        .context("Failed to submit batch")?;
    info!("Submitted batch {} with {} jobs", batch.id, batch.job_ids.len());

    let snapshot = tokio::select! {
        result = coordinator.wait(&batch.id, Duration::from_secs(wait_secs)) => {
            result.context("Failed to wait for batch")?
        }
        _ = shutdown_signal() => {
            warn!("Interrupted, cancelling batch {}", batch.id);
            coordinator.cancel(&batch.id).await.context("Failed to cancel batch")?
        }
    };

    let snapshot = if snapshot.is_finished() {
        snapshot
    } else {
        warn!(
            "Batch {} still in progress after {}s, cancelling",
            batch.id, wait_secs
        );
        coordinator
            .cancel(&batch.id)
            .await
            .context("Failed to cancel batch")?
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("Failed to serialize snapshot")?
    );

    orchestrator.shutdown();

    if let Some(ref path) = config.metrics.path {
        metrics::write_to(path).await?;
        info!("Metrics written to {:?}", path);
    }

    // Attempts still in flight hold orchestrator clones; don't wait on them.
    drop(coordinator);
    drop(orchestrator);
    if tokio::time::timeout(Duration::from_secs(1), logger_handle)
        .await
        .is_err()
    {
        warn!("Notification logger did not drain in time");
    }

    Ok(snapshot.status)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//! feedsense worker
//!
//! Run with: DATABASE_URL=postgres://... feedsense-worker

use std::sync::Arc;

use anyhow::Context;
use feedsense_core::{VaderClassifier, WorkerConfig};
use feedsense_db::FeedbackRepository;
use feedsense_worker::{telemetry, PgSubscriber, Scheduler, SchedulerConfig, SweepExecutor};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env().context("Failed to load configuration")?;
    telemetry::init_tracing(config.log_format);

    tracing::info!(environment = %config.environment, "Starting feedsense worker");

    let pool = feedsense_db::connect(&config)
        .await
        .context("Failed to connect to database")?;
    if config.run_migrations {
        feedsense_db::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;
    }

    let repository = FeedbackRepository::new(pool.clone(), config.channel.clone());
    let executor = SweepExecutor::new(Arc::new(repository), Arc::new(VaderClassifier::new()));
    let scheduler = Scheduler::new(
        executor,
        Arc::new(PgSubscriber::new(pool.clone())),
        SchedulerConfig::from(&config),
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let result = scheduler.run(cancel).await;
    pool.close().await;

    let stats = result.context("Worker stopped on unrecoverable error")?;
    tracing::info!(
        sweeps = stats.sweeps,
        items_processed = stats.items_processed,
        "Shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }

    tracing::info!("Shutting down after the current sweep...");
    cancel.cancel();
}

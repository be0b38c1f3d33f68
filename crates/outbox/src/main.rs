use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use notihub_common::config::AppConfig;
use notihub_common::db;
use notihub_outbox::backoff::BackoffPolicy;
use notihub_outbox::dispatcher::Dispatcher;
use notihub_outbox::kafka::KafkaProducer;
use notihub_outbox::reconcile::Reconciler;
use notihub_outbox::relay::{OutboxRelay, RelaySettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notihub_relay=info,notihub_outbox=info".into()),
        )
        .json()
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(env = %config.app_env, "Notihub outbox relay starting...");

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let publish_timeout = Duration::from_millis(config.publish_timeout_ms);
    let producer = Arc::new(KafkaProducer::new(&config.kafka_brokers, publish_timeout)?);

    let relay = OutboxRelay::new(
        pool.clone(),
        Dispatcher::new(producer, config.kafka_topic.clone(), publish_timeout),
        Reconciler::new(pool.clone(), BackoffPolicy::default()),
        RelaySettings::from_config(&config),
    );

    let shutdown = CancellationToken::new();
    let abort = CancellationToken::new();
    let mut worker = tokio::spawn({
        let shutdown = shutdown.clone();
        let abort = abort.clone();
        async move { relay.run(shutdown, abort).await }
    });

    tokio::select! {
        result = &mut worker => {
            result?;
            tracing::warn!("Outbox relay exited on its own");
            return Ok(());
        }
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal, draining claimed batch...");
            shutdown.cancel();
        }
    }

    let grace = Duration::from_secs(config.shutdown_grace_secs);
    match tokio::time::timeout(grace, &mut worker).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "Drain exceeded grace period, cancelling in-flight publishes"
            );
            abort.cancel();
            worker.await?;
        }
    }

    pool.close().await;
    tracing::info!("Notihub outbox relay stopped.");
    Ok(())
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

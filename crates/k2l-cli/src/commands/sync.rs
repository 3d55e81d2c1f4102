//! Sync command implementation.

use crate::server::{start_server, ServerState};
use anyhow::Result;
use k2l_core::health::{HealthCheck, COMPONENT_LAKE};
use k2l_core::kafka::{KafkaSource, KafkaSourceBuilder};
use k2l_core::lake::FileLake;
use k2l_core::metrics::SyncMetrics;
use k2l_core::retry::{retry, RetryConfig};
use k2l_core::{Config, SyncEngine, SyncOptions, SyncSummary};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

type KafkaEngine = SyncEngine<KafkaSource, FileLake>;

/// Run one sync, or keep syncing on an interval with `watch`.
pub async fn run(config: Config, watch: bool) -> Result<()> {
    info!(
        topic = %config.kafka.topic,
        partition = config.kafka.partition,
        lake = %config.lake.path.display(),
        watch = watch,
        "Starting sync"
    );

    let health = Arc::new(HealthCheck::for_sync());
    let metrics = Arc::new(SyncMetrics::new()?);

    let lake = FileLake::open(&config.lake)?;
    health.mark_healthy(COMPONENT_LAKE);
    let source = KafkaSourceBuilder::new(config.kafka.clone()).build()?;

    let engine = SyncEngine::new(source, lake, SyncOptions::from(&config.sync))
        .with_metrics(Arc::clone(&metrics))
        .with_health(Arc::clone(&health));
    let engine = Arc::new(Mutex::new(engine));

    let retry_config = RetryConfig::from_sync_config(&config.sync);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut shutdown = Shutdown::new(shutdown_tx.subscribe());
    tokio::spawn(wait_for_signal(shutdown_tx.clone()));

    if !watch {
        let summary = sync_with_retry(&engine, &retry_config, &mut shutdown).await?;
        print_summary(&summary);
        return Ok(());
    }

    let server_state = Arc::new(ServerState {
        health: Arc::clone(&health),
        metrics: Arc::clone(&metrics),
    });
    tokio::spawn(start_server(
        server_state,
        config.monitoring.health_port,
        config.monitoring.metrics_port,
        shutdown_tx.subscribe(),
    ));

    let interval = config.sync.interval();
    info!(interval_secs = interval.as_secs(), "Watch mode started");

    loop {
        match sync_with_retry(&engine, &retry_config, &mut shutdown).await {
            Ok(summary) => print_summary(&summary),
            Err(k2l_core::Error::Shutdown) => break,
            // retries exhausted; the next tick starts over from the lake
            Err(e) if e.is_retryable() => {
                error!(error = %e, "Sync failed, waiting for next interval");
            }
            Err(e) => return Err(e.into()),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.wait() => break,
        }
    }

    info!("Watch mode stopped");
    Ok(())
}

/// Shutdown requests, observed only between sync invocations.
struct Shutdown {
    rx: broadcast::Receiver<()>,
    requested: bool,
}

impl Shutdown {
    fn new(rx: broadcast::Receiver<()>) -> Self {
        Self {
            rx,
            requested: false,
        }
    }

    fn is_requested(&mut self) -> bool {
        if !self.requested {
            self.requested = !matches!(self.rx.try_recv(), Err(TryRecvError::Empty));
        }
        self.requested
    }

    async fn wait(&mut self) {
        if !self.requested {
            let _ = self.rx.recv().await;
            self.requested = true;
        }
    }
}

/// Run whole syncs until one succeeds, fails for good, or shutdown is
/// requested before the next attempt.
async fn sync_with_retry(
    engine: &Arc<Mutex<KafkaEngine>>,
    config: &RetryConfig,
    shutdown: &mut Shutdown,
) -> k2l_core::Result<SyncSummary> {
    retry(config, "sync", || {
        let stop = shutdown.is_requested();
        let engine = Arc::clone(engine);
        async move {
            if stop {
                return Err(k2l_core::Error::Shutdown);
            }
            engine.lock().await.sync().await
        }
    })
    .await
}

fn print_summary(summary: &SyncSummary) {
    if summary.is_noop() {
        println!("Lake is up to date");
    } else {
        println!(
            "Committed {} records in {} batches",
            summary.records_committed, summary.batches_committed
        );
    }
}

/// Broadcast shutdown on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down");
    }

    let _ = shutdown_tx.send(());
}

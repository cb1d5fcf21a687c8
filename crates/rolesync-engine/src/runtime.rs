//! Background tasks: the fleet-pass ticker and the worker pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::coordinator::{FleetPass, SyncCoordinator};
use crate::engine::Engine;
use crate::sqlite::SqliteQueue;
use crate::error::Result;
use crate::worker::JobWorker;

/// Running scheduler and workers. Stop with [`SyncRuntime::shutdown`].
pub struct SyncRuntime {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncRuntime {
    /// Requeue jobs orphaned by a previous process, then spawn the ticker
    /// and `queue.workers` workers.
    pub async fn start(engine: &Engine) -> Result<Self> {
        let requeued = engine.queue.requeue_stale().await?;
        if requeued > 0 {
            warn!(requeued, "requeued jobs left running by a previous process");
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut tasks = Vec::new();

        let interval = engine.config.scheduler.interval();
        tasks.push(tokio::spawn(run_scheduler(
            engine.coordinator.clone(),
            engine.queue.clone(),
            interval,
            engine.config.queue.job_retention_secs,
            shutdown_tx.subscribe(),
        )));

        let workers = engine.config.queue.workers.max(1);
        for id in 0..workers {
            let worker = JobWorker::new(id, (*engine.queue).clone(), engine.reconciler.clone());
            tasks.push(tokio::spawn(
                worker.run(engine.config.queue.poll_interval(), shutdown_tx.subscribe()),
            ));
        }

        info!(
            workers,
            interval_secs = interval.as_secs(),
            "sync runtime started"
        );
        Ok(Self { shutdown_tx, tasks })
    }

    /// Signal every task to stop and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "sync task ended abnormally");
            }
        }
        info!("sync runtime stopped");
    }
}

/// Fire a fleet pass on every tick, then prune finished jobs past
/// retention. Each pass runs in its own task so a slow one overlaps the
/// next tick, which the busy guard then skips.
async fn run_scheduler(
    coordinator: Arc<SyncCoordinator>,
    queue: Arc<SqliteQueue>,
    period: Duration,
    retention_secs: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let coordinator = coordinator.clone();
                let queue = queue.clone();
                tokio::spawn(async move {
                    match coordinator.run_fleet_pass().await {
                        Ok(FleetPass::Skipped) => info!("fleet pass still running, tick skipped"),
                        Ok(FleetPass::Dispatched { .. }) => {}
                        Err(e) => error!(error = %e, "fleet pass failed"),
                    }
                    match queue.prune_finished(retention_secs).await {
                        Ok(0) => {}
                        Ok(pruned) => debug!(pruned, "pruned finished jobs"),
                        Err(e) => warn!(error = %e, "pruning finished jobs failed"),
                    }
                });
            }
            _ = shutdown.recv() => break,
        }
    }
}

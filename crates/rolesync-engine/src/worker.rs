//! Queue consumers.

use std::sync::Arc;
use std::time::Duration;

use rolesync_db::queries::jobs::JobRow;
use rolesync_types::{SyncReport, JOB_KIND_SYNC};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::reconciler::Reconciler;
use crate::sqlite::SqliteQueue;

/// What happened to a claimed job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(SyncReport),
    /// Failed, back in the queue for another attempt.
    Retrying { attempt: u32 },
    /// Failed for good; the next fleet pass enqueues the tenant again.
    Dropped { attempt: u32 },
}

/// Pulls jobs one at a time and runs them through the reconciler.
///
/// Retry policy lives in the queue; the worker only reports whether a
/// failure is worth retrying.
#[derive(Clone)]
pub struct JobWorker {
    id: usize,
    queue: SqliteQueue,
    reconciler: Arc<Reconciler>,
}

impl JobWorker {
    pub fn new(id: usize, queue: SqliteQueue, reconciler: Arc<Reconciler>) -> Self {
        Self {
            id,
            queue,
            reconciler,
        }
    }

    /// Claim and run one job. `Ok(None)` when nothing is ready.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>> {
        let Some(job) = self.queue.claim().await? else {
            return Ok(None);
        };
        Ok(Some(self.process(&job).await?))
    }

    async fn process(&self, job: &JobRow) -> Result<JobOutcome> {
        if job.kind != JOB_KIND_SYNC {
            warn!(worker = self.id, job = job.id, kind = %job.kind, "unknown job kind");
            self.queue.fail(job, "unknown job kind", false).await?;
            return Ok(JobOutcome::Dropped {
                attempt: job.attempts,
            });
        }
        let payload = match job.sync_job() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(worker = self.id, job = job.id, error = %e, "undecodable job payload");
                self.queue.fail(job, &e.to_string(), false).await?;
                return Ok(JobOutcome::Dropped {
                    attempt: job.attempts,
                });
            }
        };
        let tenant = payload.tenant_external_id.as_str();
        debug!(worker = self.id, job = job.id, tenant, attempt = job.attempts, "running sync job");

        match self.reconciler.reconcile(tenant).await {
            Ok(report) => {
                self.queue.complete(job).await?;
                info!(
                    worker = self.id,
                    tenant,
                    grants = report.grants,
                    revokes = report.revokes,
                    "synced tenant"
                );
                Ok(JobOutcome::Completed(report))
            }
            Err(e) => {
                let retrying = self
                    .queue
                    .fail(job, &e.to_string(), e.is_retryable())
                    .await?;
                error!(
                    worker = self.id,
                    tenant,
                    attempt = job.attempts,
                    max_attempts = job.max_attempts,
                    retrying,
                    error = %e,
                    "sync job failed"
                );
                Ok(if retrying {
                    JobOutcome::Retrying {
                        attempt: job.attempts,
                    }
                } else {
                    JobOutcome::Dropped {
                        attempt: job.attempts,
                    }
                })
            }
        }
    }

    /// Poll until shutdown. Sleeps `poll_interval` whenever the queue is
    /// empty or unreachable.
    pub async fn run(self, poll_interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        debug!(worker = self.id, "worker started");
        loop {
            let idle = match self.run_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!(worker = self.id, error = %e, "queue error");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.recv() => break,
                }
            } else if shutdown.try_recv().is_ok() {
                break;
            }
        }
        debug!(worker = self.id, "worker stopped");
    }
}

//! Fleet-wide scheduling and the on-demand sync path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rolesync_types::{SyncJob, SyncReport};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::ports::{Enqueued, QueuePort, TenantStore};
use crate::reconciler::Reconciler;

/// Outcome of one fleet pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FleetPass {
    /// Another pass was still in flight.
    Skipped,
    Dispatched {
        tenants: usize,
        queued: usize,
        duplicates: usize,
        failed: usize,
    },
}

/// Holds the busy flag and clears it on drop, on every exit path.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncCoordinator {
    store: Arc<dyn TenantStore>,
    queue: Arc<dyn QueuePort>,
    reconciler: Arc<Reconciler>,
    only_syncable: bool,
    busy: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn TenantStore>,
        queue: Arc<dyn QueuePort>,
        reconciler: Arc<Reconciler>,
        only_syncable: bool,
    ) -> Self {
        Self {
            store,
            queue,
            reconciler,
            only_syncable,
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Enqueue one sync job per verified tenant.
    ///
    /// A call made while another pass is in flight returns
    /// [`FleetPass::Skipped`]. Enqueue failures are logged per tenant and do
    /// not stop the pass; failing to list tenants does.
    pub async fn run_fleet_pass(&self) -> Result<FleetPass> {
        let Some(_guard) = BusyGuard::try_acquire(&self.busy) else {
            return Ok(FleetPass::Skipped);
        };

        let tenants = self.store.verified_tenants(self.only_syncable).await?;
        info!(tenants = tenants.len(), "starting fleet sync");

        let (mut queued, mut duplicates, mut failed) = (0, 0, 0);
        for tenant in &tenants {
            let Some(privilege) = tenant.privilege() else {
                warn!(tenant = %tenant.external_id, "verified tenant without privilege, skipping");
                continue;
            };
            let job = SyncJob::new(&tenant.external_id, privilege);
            match self.queue.enqueue(&job).await {
                Ok(Enqueued::Queued) => queued += 1,
                Ok(Enqueued::Duplicate) => duplicates += 1,
                Err(e) => {
                    error!(tenant = %tenant.external_id, error = %e, "failed to enqueue sync");
                    failed += 1;
                }
            }
        }

        info!(queued, duplicates, failed, "fleet sync dispatched");
        Ok(FleetPass::Dispatched {
            tenants: tenants.len(),
            queued,
            duplicates,
            failed,
        })
    }

    /// Reconcile one tenant now, bypassing the queue.
    pub async fn manual_sync(&self, tenant_external_id: &str) -> Result<SyncReport> {
        self.reconciler
            .reconcile(tenant_external_id)
            .await
            .inspect_err(|e| {
                warn!(tenant = %tenant_external_id, error = %e, "manual sync failed");
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, QueueError};
    use crate::fakes::{RecordingQueue, TestBed};
    use tokio::sync::Semaphore;

    const NOW: u64 = 1_700_000_000;

    fn coordinator(bed: &TestBed, queue: Arc<RecordingQueue>) -> SyncCoordinator {
        SyncCoordinator::new(
            bed.engine.store.clone(),
            queue,
            bed.engine.reconciler.clone(),
            false,
        )
    }

    #[tokio::test]
    async fn test_fleet_pass_enqueues_verified_tenants() {
        let bed = TestBed::new(NOW).await;
        bed.verified_tenant("guild-1").await;
        bed.verified_tenant("guild-2").await;
        bed.engine
            .store
            .setup_tenant("guild-3", "3", 8453, "role-1", NOW)
            .await
            .expect("unverified tenant");
        let queue = Arc::new(RecordingQueue::new());

        let pass = coordinator(&bed, queue.clone())
            .run_fleet_pass()
            .await
            .expect("pass");
        assert_eq!(
            pass,
            FleetPass::Dispatched {
                tenants: 2,
                queued: 2,
                duplicates: 0,
                failed: 0
            }
        );
        let jobs = queue.jobs();
        assert_eq!(jobs[0], SyncJob::new("guild-1", "role-1"));
        assert_eq!(jobs[1].tenant_external_id, "guild-2");
    }

    #[tokio::test]
    async fn test_only_syncable_filter() {
        let bed = TestBed::new(NOW).await;
        let t = bed.verified_tenant("guild-1").await;
        bed.verified_tenant("guild-2").await;
        bed.engine
            .store
            .mark_unsyncable(t.id, NOW)
            .await
            .expect("unsyncable");
        let queue = Arc::new(RecordingQueue::new());
        let c = SyncCoordinator::new(
            bed.engine.store.clone(),
            queue.clone(),
            bed.engine.reconciler.clone(),
            true,
        );
        c.run_fleet_pass().await.expect("pass");
        assert_eq!(queue.jobs().len(), 1);
        assert_eq!(queue.jobs()[0].tenant_external_id, "guild-2");
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_skipped() {
        let bed = TestBed::new(NOW).await;
        bed.verified_tenant("guild-1").await;
        let gate = Arc::new(Semaphore::new(0));
        let queue = Arc::new(RecordingQueue::gated(gate.clone()));
        let c = Arc::new(coordinator(&bed, queue.clone()));

        let first = tokio::spawn({
            let c = c.clone();
            async move { c.run_fleet_pass().await }
        });
        while !c.is_busy() {
            tokio::task::yield_now().await;
        }

        assert_eq!(c.run_fleet_pass().await.expect("second"), FleetPass::Skipped);

        gate.add_permits(1);
        let pass = first.await.expect("join").expect("first");
        assert!(matches!(pass, FleetPass::Dispatched { queued: 1, .. }));
        assert_eq!(queue.jobs().len(), 1);
        assert!(!c.is_busy());
    }

    #[tokio::test]
    async fn test_busy_flag_cleared_after_failure() {
        let bed = TestBed::new(NOW).await;
        bed.verified_tenant("guild-1").await;
        let queue = Arc::new(RecordingQueue::new());
        queue.fail_with(QueueError::Unavailable("down".into()));
        let c = coordinator(&bed, queue);

        let pass = c.run_fleet_pass().await.expect("pass");
        assert!(matches!(pass, FleetPass::Dispatched { failed: 1, .. }));
        assert!(!c.is_busy());
        assert!(matches!(
            c.run_fleet_pass().await.expect("again"),
            FleetPass::Dispatched { .. }
        ));
    }

    #[tokio::test]
    async fn test_manual_sync_rejects_unverified() {
        let bed = TestBed::new(NOW).await;
        bed.engine
            .store
            .setup_tenant("guild-1", "12", 8453, "role-1", NOW)
            .await
            .expect("setup");
        let queue = Arc::new(RecordingQueue::new());
        let c = coordinator(&bed, queue.clone());

        let err = c.manual_sync("guild-1").await.expect_err("unverified");
        assert!(matches!(err, EngineError::NotVerified(_)));
        assert!(err.is_configuration());
        assert!(queue.jobs().is_empty());
        assert!(bed.actuator.calls().is_empty());
    }
}

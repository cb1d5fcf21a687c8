//! Per-tenant reconciliation of chain subscriptions against granted
//! privileges.
//!
//! One pass:
//! 1. Load the tenant; it must be configured and verified.
//! 2. Ask the actuator whether it can grant the privilege at all. If not,
//!    mark the tenant unsyncable and stop.
//! 3. Resolve the contract and read the full subscriber index once.
//! 4. For each linked principal, grant or revoke to match the chain.
//! 5. Revoke principals that unlinked while still holding the privilege.
//! 6. Record the sync.
//!
//! Every step is idempotent, so a pass can be repeated or run twice by the
//! queue without side effects beyond the first.

use std::collections::HashMap;
use std::sync::Arc;

use rolesync_types::{ActuationOutcome, Principal, SubscriptionRecord, SyncReport, Tenant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::chain_reader::ChainStateReader;
use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::ports::{ActuationClient, TenantStore};

/// What one principal needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Assign the tenant's privilege. `replaces` names a different
    /// privilege the record still holds, which is revoked first.
    Grant {
        expires_at: u64,
        replaces: Option<String>,
    },
    Revoke { privilege: String },
    /// Would revoke, but the snapshot is incomplete and the principal is
    /// absent from it.
    Defer,
    Keep,
}

/// Decide the action for one principal.
///
/// `end_time` is the principal's entry in the remote snapshot, `None` if
/// absent. An end time equal to `now` is expired. A record that is active
/// under another privilege than `privilege` does not count as holding it.
pub fn decide(
    end_time: Option<u64>,
    record: Option<&SubscriptionRecord>,
    privilege: &str,
    now: u64,
    snapshot_complete: bool,
) -> Action {
    let active = record.filter(|r| r.is_active());
    let granted = active.map(|r| granted_privilege(r, privilege));
    match end_time {
        Some(end) if end > now => match granted {
            Some(held) if held == privilege => Action::Keep,
            held => Action::Grant {
                expires_at: end,
                replaces: held,
            },
        },
        Some(_) => granted.map_or(Action::Keep, |privilege| Action::Revoke { privilege }),
        None => match granted {
            Some(privilege) if snapshot_complete => Action::Revoke { privilege },
            Some(_) => Action::Defer,
            None => Action::Keep,
        },
    }
}

/// The privilege a record was granted under. Records written before the
/// privilege was tracked are attributed to the tenant's current one.
fn granted_privilege(record: &SubscriptionRecord, current: &str) -> String {
    record
        .privilege_id
        .clone()
        .unwrap_or_else(|| current.to_string())
}

/// Result of handling one principal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrincipalOutcome {
    Granted,
    Revoked,
    Deferred,
    Unchanged,
    ActuationFailed(String),
}

fn tally(report: &mut SyncReport, outcome: &PrincipalOutcome) {
    match outcome {
        PrincipalOutcome::Granted => report.grants += 1,
        PrincipalOutcome::Revoked => report.revokes += 1,
        PrincipalOutcome::Deferred => report.deferred += 1,
        PrincipalOutcome::ActuationFailed(_) => report.failed += 1,
        PrincipalOutcome::Unchanged => {}
    }
}

/// In-process per-tenant locks.
#[derive(Default)]
struct TenantLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TenantLocks {
    async fn acquire(&self, tenant: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(tenant.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// The diff engine. Holds no state between passes beyond the lock table.
pub struct Reconciler {
    store: Arc<dyn TenantStore>,
    actuator: Arc<dyn ActuationClient>,
    reader: Arc<ChainStateReader>,
    clock: Arc<dyn Clock>,
    locks: TenantLocks,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TenantStore>,
        actuator: Arc<dyn ActuationClient>,
        reader: Arc<ChainStateReader>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            actuator,
            reader,
            clock,
            locks: TenantLocks::default(),
        }
    }

    /// Run one pass for a tenant.
    ///
    /// Actuation failures and remote read failures are absorbed into the
    /// report. Store failures and configuration problems fail the pass.
    pub async fn reconcile(&self, tenant_external_id: &str) -> Result<SyncReport> {
        let _guard = self.locks.acquire(tenant_external_id).await;
        let now = self.clock.now();

        let tenant = self
            .store
            .tenant(tenant_external_id)
            .await?
            .ok_or_else(|| EngineError::TenantNotFound(tenant_external_id.to_string()))?;
        let (project_id, chain_id) = tenant
            .contract_key()
            .ok_or_else(|| EngineError::NotConfigured(tenant_external_id.to_string()))?;
        let privilege = tenant
            .privilege()
            .ok_or_else(|| EngineError::NotConfigured(tenant_external_id.to_string()))?;
        if !tenant.verified {
            return Err(EngineError::NotVerified(tenant_external_id.to_string()));
        }

        let feasibility = self.actuator.feasibility(&tenant.external_id, privilege).await;
        if !feasibility.is_feasible() {
            warn!(
                tenant = %tenant.external_id,
                reachable = feasibility.reachable,
                rank_ok = feasibility.rank_ok,
                "privilege cannot be granted, marking tenant unsyncable"
            );
            self.store.mark_unsyncable(tenant.id, now).await?;
            return Ok(SyncReport::infeasible(&tenant.external_id));
        }

        let contract = self.reader.resolve_contract(project_id, chain_id).await?;
        let principals = self.store.linked_principals(tenant.id).await?;
        let snapshot = self.reader.read_all(&contract).await;

        let mut report = SyncReport::new(&tenant.external_id);
        report.snapshot_complete = snapshot.is_complete();

        for principal in &principals {
            let Some(address) = principal.linked_address() else {
                debug!(
                    tenant = %tenant.external_id,
                    principal = %principal.external_id,
                    "skipping malformed or zero wallet"
                );
                report.ignored += 1;
                continue;
            };
            let record = self.store.subscription(principal.id, tenant.id).await?;
            let action = decide(
                snapshot.end_time(&address),
                record.as_ref(),
                privilege,
                now,
                snapshot.is_complete(),
            );
            let outcome = self.apply(&tenant, privilege, principal, action, now).await?;
            tally(&mut report, &outcome);
        }

        for principal in self.store.unlinked_active_principals(tenant.id).await? {
            let granted = self
                .store
                .subscription(principal.id, tenant.id)
                .await?
                .map_or_else(|| privilege.to_string(), |r| granted_privilege(&r, privilege));
            let outcome = self
                .apply(&tenant, privilege, &principal, Action::Revoke { privilege: granted }, now)
                .await?;
            tally(&mut report, &outcome);
        }

        self.store.record_sync(tenant.id, now).await?;

        info!(
            tenant = %tenant.external_id,
            grants = report.grants,
            revokes = report.revokes,
            failed = report.failed,
            ignored = report.ignored,
            deferred = report.deferred,
            complete = report.snapshot_complete,
            "reconciliation pass finished"
        );
        Ok(report)
    }

    async fn apply(
        &self,
        tenant: &Tenant,
        privilege: &str,
        principal: &Principal,
        action: Action,
        now: u64,
    ) -> Result<PrincipalOutcome> {
        match action {
            Action::Keep => Ok(PrincipalOutcome::Unchanged),
            Action::Defer => {
                debug!(
                    tenant = %tenant.external_id,
                    principal = %principal.external_id,
                    "absent from incomplete snapshot, revocation deferred"
                );
                Ok(PrincipalOutcome::Deferred)
            }
            Action::Grant {
                expires_at,
                replaces,
            } => {
                let replaced = replaces.is_some();
                if let Some(stale) = replaces {
                    if let ActuationOutcome::Failed { reason } = self
                        .actuator
                        .revoke(&tenant.external_id, &principal.external_id, &stale)
                        .await
                    {
                        warn!(
                            tenant = %tenant.external_id,
                            principal = %principal.external_id,
                            privilege = %stale,
                            reason = %reason,
                            "revoking replaced privilege failed, skipping"
                        );
                        return Ok(PrincipalOutcome::ActuationFailed(reason));
                    }
                    debug!(
                        tenant = %tenant.external_id,
                        principal = %principal.external_id,
                        from = %stale,
                        to = %privilege,
                        "replaced privilege revoked"
                    );
                }
                match self
                    .actuator
                    .assign(&tenant.external_id, &principal.external_id, privilege)
                    .await
                {
                    ActuationOutcome::Applied => {
                        self.store
                            .activate_subscription(principal.id, tenant.id, privilege, expires_at, now)
                            .await?;
                        Ok(PrincipalOutcome::Granted)
                    }
                    ActuationOutcome::Failed { reason } => {
                        warn!(
                            tenant = %tenant.external_id,
                            principal = %principal.external_id,
                            reason = %reason,
                            "grant failed, skipping"
                        );
                        // The replaced privilege is already gone.
                        if replaced {
                            self.store
                                .expire_subscription(principal.id, tenant.id, now)
                                .await?;
                        }
                        Ok(PrincipalOutcome::ActuationFailed(reason))
                    }
                }
            }
            Action::Revoke { privilege } => {
                match self
                    .actuator
                    .revoke(&tenant.external_id, &principal.external_id, &privilege)
                    .await
                {
                    ActuationOutcome::Applied => {
                        self.store
                            .expire_subscription(principal.id, tenant.id, now)
                            .await?;
                        Ok(PrincipalOutcome::Revoked)
                    }
                    ActuationOutcome::Failed { reason } => {
                        warn!(
                            tenant = %tenant.external_id,
                            principal = %principal.external_id,
                            reason = %reason,
                            "revoke failed, skipping"
                        );
                        Ok(PrincipalOutcome::ActuationFailed(reason))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ActuationKind, TestBed};
    use rolesync_types::{
        Address, Feasibility, PageResult, PassStatus, RemoteSubscription, SubscriptionStatus,
    };

    const NOW: u64 = 1_700_000_000;

    fn record(status: SubscriptionStatus) -> SubscriptionRecord {
        SubscriptionRecord {
            id: 1,
            principal_id: 1,
            tenant_id: 1,
            status,
            privilege_id: Some("role-1".into()),
            expires_at: NOW,
            updated_at: NOW,
        }
    }

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn sub(n: u8, end_time: u64) -> RemoteSubscription {
        RemoteSubscription {
            address: addr(n),
            end_time,
        }
    }

    fn revoke(privilege: &str) -> Action {
        Action::Revoke {
            privilege: privilege.into(),
        }
    }

    #[test]
    fn test_decide_grants_live_without_active_record() {
        let expired = record(SubscriptionStatus::Expired);
        let grant = Action::Grant {
            expires_at: NOW + 1,
            replaces: None,
        };
        assert_eq!(decide(Some(NOW + 1), None, "role-1", NOW, true), grant);
        assert_eq!(decide(Some(NOW + 1), Some(&expired), "role-1", NOW, false), grant);
    }

    #[test]
    fn test_decide_boundary_is_expired() {
        let active = record(SubscriptionStatus::Active);
        assert_eq!(
            decide(Some(NOW), Some(&active), "role-1", NOW, true),
            revoke("role-1")
        );
        assert_eq!(decide(Some(NOW), None, "role-1", NOW, true), Action::Keep);
    }

    #[test]
    fn test_decide_absent_principal() {
        let active = record(SubscriptionStatus::Active);
        assert_eq!(decide(None, Some(&active), "role-1", NOW, true), revoke("role-1"));
        assert_eq!(decide(None, Some(&active), "role-1", NOW, false), Action::Defer);
        assert_eq!(decide(None, None, "role-1", NOW, false), Action::Keep);
    }

    #[test]
    fn test_decide_explicit_expiry_applies_to_incomplete_snapshot() {
        let active = record(SubscriptionStatus::Active);
        assert_eq!(
            decide(Some(NOW - 10), Some(&active), "role-1", NOW, false),
            revoke("role-1")
        );
    }

    #[test]
    fn test_decide_keeps_active_live() {
        let active = record(SubscriptionStatus::Active);
        assert_eq!(
            decide(Some(NOW + 5), Some(&active), "role-1", NOW, true),
            Action::Keep
        );
    }

    #[test]
    fn test_decide_privilege_change() {
        let active = record(SubscriptionStatus::Active);
        assert_eq!(
            decide(Some(NOW + 5), Some(&active), "role-2", NOW, true),
            Action::Grant {
                expires_at: NOW + 5,
                replaces: Some("role-1".into()),
            }
        );
        // Lapsed or absent: the privilege actually held is the one revoked.
        assert_eq!(
            decide(Some(NOW - 5), Some(&active), "role-2", NOW, true),
            revoke("role-1")
        );
        assert_eq!(decide(None, Some(&active), "role-2", NOW, true), revoke("role-1"));
    }

    #[test]
    fn test_decide_untracked_record_counts_as_current_privilege() {
        let mut legacy = record(SubscriptionStatus::Active);
        legacy.privilege_id = None;
        assert_eq!(
            decide(Some(NOW + 5), Some(&legacy), "role-2", NOW, true),
            Action::Keep
        );
        assert_eq!(decide(None, Some(&legacy), "role-2", NOW, true), revoke("role-2"));
    }

    #[tokio::test]
    async fn test_grant_then_idempotent() {
        let bed = TestBed::new(NOW).await;
        bed.verified_tenant("guild-1").await;
        bed.link("guild-1", "user-1", addr(1)).await;
        bed.indexer.set_pages(vec![PageResult::last(vec![sub(1, NOW + 3600)])]);

        let first = bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
        assert_eq!((first.grants, first.revokes), (1, 0));
        let second = bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
        assert!(second.is_noop());
        assert_eq!(bed.actuator.count(ActuationKind::Assign), 1);
    }

    #[tokio::test]
    async fn test_infeasible_marks_unsyncable() {
        let bed = TestBed::new(NOW).await;
        bed.verified_tenant("guild-1").await;
        bed.link("guild-1", "user-1", addr(1)).await;
        bed.indexer.set_pages(vec![PageResult::last(vec![sub(1, NOW + 3600)])]);
        bed.actuator.set_feasibility(Feasibility {
            reachable: true,
            rank_ok: false,
        });

        let report = bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
        assert_eq!(report.status, PassStatus::Infeasible);
        assert!(bed.actuator.calls().is_empty());
        assert!(!bed.tenant("guild-1").await.syncable);

        bed.actuator.set_feasibility(Feasibility::FEASIBLE);
        bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
        let tenant = bed.tenant("guild-1").await;
        assert!(tenant.syncable);
        assert_eq!(tenant.last_sync_at, Some(NOW));
    }

    #[tokio::test]
    async fn test_unverified_tenant_fails_fast() {
        let bed = TestBed::new(NOW).await;
        bed.engine
            .store
            .setup_tenant("guild-1", "12", 8453, "role-1", NOW)
            .await
            .expect("setup");

        let err = bed
            .engine
            .reconciler
            .reconcile("guild-1")
            .await
            .expect_err("unverified");
        assert!(matches!(err, EngineError::NotVerified(_)));
        assert!(bed.actuator.calls().is_empty());

        let err = bed
            .engine
            .reconciler
            .reconcile("ghost")
            .await
            .expect_err("missing");
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_actuation_failure_skips_principal() {
        let bed = TestBed::new(NOW).await;
        bed.verified_tenant("guild-1").await;
        bed.link("guild-1", "user-1", addr(1)).await;
        bed.link("guild-1", "user-2", addr(2)).await;
        bed.indexer.set_pages(vec![PageResult::last(vec![
            sub(1, NOW + 100),
            sub(2, NOW + 100),
        ])]);
        bed.actuator.fail_for("user-1");

        let report = bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
        assert_eq!(report.grants, 1);
        assert_eq!(report.failed, 1);
        assert!(bed.status_of("guild-1", "user-1").await.is_none());

        bed.actuator.heal();
        let report = bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
        assert_eq!(report.grants, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_incomplete_snapshot_defers_absent_revocations() {
        let bed = TestBed::new(NOW).await;
        bed.verified_tenant("guild-1").await;
        bed.link("guild-1", "user-1", addr(1)).await;
        bed.link("guild-1", "user-2", addr(2)).await;
        bed.indexer.set_pages(vec![
            PageResult::with_next(vec![sub(1, NOW + 100)], "c1"),
            PageResult::last(vec![sub(2, NOW + 100)]),
        ]);
        bed.engine.reconciler.reconcile("guild-1").await.expect("pass");

        bed.indexer.fail_page(1, crate::error::IndexerError::Transport("503".into()));
        let report = bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
        assert!(!report.snapshot_complete);
        assert_eq!(report.revokes, 0);
        assert_eq!(report.deferred, 1);
        assert_eq!(
            bed.status_of("guild-1", "user-2").await,
            Some(SubscriptionStatus::Active)
        );

        bed.indexer.heal();
        bed.indexer.set_pages(vec![PageResult::last(vec![sub(1, NOW + 100)])]);
        let report = bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
        assert_eq!(report.revokes, 1);
        assert_eq!(
            bed.status_of("guild-1", "user-2").await,
            Some(SubscriptionStatus::Expired)
        );
    }

    #[tokio::test]
    async fn test_malformed_and_zero_wallets_ignored() {
        let bed = TestBed::new(NOW).await;
        let tenant = bed.verified_tenant("guild-1").await;
        bed.engine
            .store
            .link_wallet(tenant.id, "user-bad", "not-a-wallet", NOW)
            .await
            .expect("link");
        bed.link("guild-1", "user-zero", Address::ZERO).await;
        bed.indexer
            .set_pages(vec![PageResult::last(vec![sub(0, NOW + 100)])]);

        let report = bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
        assert_eq!(report.ignored, 2);
        assert!(report.is_noop());
        assert!(bed.actuator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unlinked_active_principal_is_revoked() {
        let bed = TestBed::new(NOW).await;
        let tenant = bed.verified_tenant("guild-1").await;
        bed.link("guild-1", "user-1", addr(1)).await;
        bed.indexer.set_pages(vec![PageResult::last(vec![sub(1, NOW + 100)])]);
        bed.engine.reconciler.reconcile("guild-1").await.expect("grant");

        bed.engine
            .store
            .unlink_wallet(tenant.id, "user-1", NOW)
            .await
            .expect("unlink");
        let report = bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
        assert_eq!(report.revokes, 1);
        assert_eq!(
            bed.status_of("guild-1", "user-1").await,
            Some(SubscriptionStatus::Expired)
        );
    }

    #[tokio::test]
    async fn test_privilege_change_moves_live_subscribers() {
        let bed = TestBed::new(NOW).await;
        bed.verified_tenant("guild-1").await;
        bed.link("guild-1", "user-1", addr(1)).await;
        bed.indexer.set_pages(vec![PageResult::last(vec![sub(1, NOW + 100)])]);
        bed.engine.reconciler.reconcile("guild-1").await.expect("grant");
        bed.actuator.clear();

        let tenant = bed
            .engine
            .store
            .setup_tenant("guild-1", "12", 8453, "role-2", NOW)
            .await
            .expect("privilege change");
        assert!(tenant.verified);

        let report = bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
        assert_eq!(report.grants, 1);
        let calls = bed.actuator.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!((calls[0].kind, calls[0].privilege.as_str()), (ActuationKind::Revoke, "role-1"));
        assert_eq!((calls[1].kind, calls[1].privilege.as_str()), (ActuationKind::Assign, "role-2"));

        let principal = bed
            .engine
            .store
            .principal(tenant.id, "user-1")
            .await
            .expect("load")
            .expect("principal");
        let record = bed
            .engine
            .store
            .subscription(principal.id, tenant.id)
            .await
            .expect("load")
            .expect("record");
        assert!(record.holds("role-2"));

        let again = bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
        assert!(again.is_noop());
    }

    #[tokio::test]
    async fn test_failed_move_leaves_record_expired() {
        let bed = TestBed::new(NOW).await;
        bed.verified_tenant("guild-1").await;
        bed.link("guild-1", "user-1", addr(1)).await;
        bed.indexer.set_pages(vec![PageResult::last(vec![sub(1, NOW + 100)])]);
        bed.engine.reconciler.reconcile("guild-1").await.expect("grant");
        bed.engine
            .store
            .setup_tenant("guild-1", "12", 8453, "role-2", NOW)
            .await
            .expect("privilege change");

        bed.actuator.fail_assign_for("user-1");
        let report = bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
        assert_eq!(report.failed, 1);
        assert_eq!(
            bed.status_of("guild-1", "user-1").await,
            Some(SubscriptionStatus::Expired)
        );

        bed.actuator.heal();
        let report = bed.engine.reconciler.reconcile("guild-1").await.expect("retry");
        assert_eq!(report.grants, 1);
        assert_eq!(bed.actuator.count(ActuationKind::Revoke), 1);
    }

    #[tokio::test]
    async fn test_concurrent_passes_for_one_tenant_serialise() {
        let bed = TestBed::new(NOW).await;
        bed.verified_tenant("guild-1").await;
        bed.link("guild-1", "user-1", addr(1)).await;
        bed.indexer.set_pages(vec![PageResult::last(vec![sub(1, NOW + 100)])]);

        let r = &bed.engine.reconciler;
        let (a, b) = tokio::join!(r.reconcile("guild-1"), r.reconcile("guild-1"));
        let grants = a.expect("a").grants + b.expect("b").grants;
        assert_eq!(grants, 1);
        assert_eq!(bed.actuator.count(ActuationKind::Assign), 1);
    }
}

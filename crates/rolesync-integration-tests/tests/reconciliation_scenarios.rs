//! Integration test: reconciliation passes against chain, index and chat
//! platform fakes over an in-memory database.
//!
//! Covers:
//! 1. A fresh live subscription is granted and recorded active
//! 2. A lapsed subscription with an active record is revoked
//! 3. A second pass with no remote change is a no-op
//! 4. An indexer outage mid-pagination never revokes unseen principals
//! 5. One principal's actuation failure does not stop the others

use rolesync_engine::error::IndexerError;
use rolesync_engine::fakes::{ActuationKind, TestBed};
use rolesync_engine::ports::TenantStore;
use rolesync_engine::EngineError;
use rolesync_types::{
    Address, Feasibility, PageResult, PassStatus, RemoteSubscription, SubscriptionStatus,
};

/// Simulated timestamp for deterministic testing.
const NOW: u64 = 1_700_000_000;

fn wallet(n: u8) -> Address {
    Address::from_bytes([n; 20])
}

fn live(address: Address, end_time: u64) -> RemoteSubscription {
    RemoteSubscription { address, end_time }
}

#[tokio::test]
async fn live_subscription_is_granted() {
    let bed = TestBed::new(NOW).await;
    bed.verified_tenant("guild-1").await;
    bed.link("guild-1", "user-1", wallet(0xab)).await;
    bed.indexer
        .set_pages(vec![PageResult::last(vec![live(wallet(0xab), NOW + 3600)])]);

    let report = bed
        .engine
        .coordinator
        .manual_sync("guild-1")
        .await
        .expect("pass");

    assert_eq!((report.grants, report.revokes), (1, 0));
    assert_eq!(report.status, PassStatus::Completed);
    assert_eq!(
        bed.status_of("guild-1", "user-1").await,
        Some(SubscriptionStatus::Active)
    );
    let calls = bed.actuator.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, ActuationKind::Assign);
    assert_eq!(calls[0].principal, "user-1");
    assert_eq!(calls[0].privilege, "role-1");

    let tenant = bed.tenant("guild-1").await;
    assert!(tenant.syncable);
    assert_eq!(tenant.last_sync_at, Some(NOW));
}

#[tokio::test]
async fn lapsed_subscription_is_revoked() {
    let bed = TestBed::new(NOW).await;
    let tenant = bed.verified_tenant("guild-1").await;
    bed.link("guild-1", "user-1", wallet(0xab)).await;
    let principal = bed
        .engine
        .store
        .principal(tenant.id, "user-1")
        .await
        .expect("load")
        .expect("principal");
    bed.engine
        .store
        .activate_subscription(principal.id, tenant.id, "role-1", NOW - 10, NOW - 100)
        .await
        .expect("seed active record");
    bed.indexer
        .set_pages(vec![PageResult::last(vec![live(wallet(0xab), NOW - 10)])]);

    let report = bed
        .engine
        .coordinator
        .manual_sync("guild-1")
        .await
        .expect("pass");

    assert_eq!((report.grants, report.revokes), (0, 1));
    assert_eq!(
        bed.status_of("guild-1", "user-1").await,
        Some(SubscriptionStatus::Expired)
    );
    assert_eq!(bed.actuator.count(ActuationKind::Revoke), 1);
}

#[tokio::test]
async fn end_time_equal_to_now_counts_as_expired() {
    let bed = TestBed::new(NOW).await;
    bed.verified_tenant("guild-1").await;
    bed.link("guild-1", "user-1", wallet(1)).await;
    bed.indexer
        .set_pages(vec![PageResult::last(vec![live(wallet(1), NOW)])]);

    let report = bed
        .engine
        .coordinator
        .manual_sync("guild-1")
        .await
        .expect("pass");
    assert!(report.is_noop());
    assert_eq!(bed.status_of("guild-1", "user-1").await, None);
}

#[tokio::test]
async fn repeated_pass_is_idempotent() {
    let bed = TestBed::new(NOW).await;
    bed.verified_tenant("guild-1").await;
    bed.link("guild-1", "user-1", wallet(1)).await;
    bed.link("guild-1", "user-2", wallet(2)).await;
    bed.indexer.set_pages(vec![
        PageResult::with_next(vec![live(wallet(1), NOW + 60)], "c1"),
        PageResult::last(vec![live(wallet(2), NOW + 120)]),
    ]);
    let reconciler = &bed.engine.reconciler;

    let first = reconciler.reconcile("guild-1").await.expect("first");
    assert_eq!(first.grants, 2);

    let second = reconciler.reconcile("guild-1").await.expect("second");
    assert!(second.is_noop());
    assert_eq!(bed.actuator.count(ActuationKind::Assign), 2);

    // Both lapse; the third pass revokes, the fourth does nothing.
    bed.clock.advance(600);
    let third = reconciler.reconcile("guild-1").await.expect("third");
    assert_eq!(third.revokes, 2);
    let fourth = reconciler.reconcile("guild-1").await.expect("fourth");
    assert!(fourth.is_noop());
    assert_eq!(bed.actuator.count(ActuationKind::Revoke), 2);
}

#[tokio::test]
async fn indexer_outage_defers_revocations() {
    let bed = TestBed::new(NOW).await;
    bed.verified_tenant("guild-1").await;
    bed.link("guild-1", "user-1", wallet(1)).await;
    bed.link("guild-1", "user-2", wallet(2)).await;
    bed.indexer.set_pages(vec![
        PageResult::with_next(vec![live(wallet(1), NOW + 60)], "c1"),
        PageResult::last(vec![live(wallet(2), NOW + 60)]),
    ]);
    bed.engine
        .reconciler
        .reconcile("guild-1")
        .await
        .expect("initial grants");
    bed.actuator.clear();

    // Page two is unreachable and page one now shows user-1 lapsed.
    bed.indexer.set_pages(vec![
        PageResult::with_next(vec![live(wallet(1), NOW - 1)], "c1"),
        PageResult::last(vec![live(wallet(2), NOW + 60)]),
    ]);
    bed.indexer
        .fail_page(1, IndexerError::Transport("connection reset".into()));

    let report = bed
        .engine
        .reconciler
        .reconcile("guild-1")
        .await
        .expect("degraded pass");
    assert!(!report.snapshot_complete);
    assert_eq!(report.revokes, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(
        bed.status_of("guild-1", "user-2").await,
        Some(SubscriptionStatus::Active)
    );

    // Once the index is healthy again nothing is left to do for user-2.
    bed.indexer.heal();
    let healed = bed.engine.reconciler.reconcile("guild-1").await.expect("healed");
    assert!(healed.snapshot_complete);
    assert!(healed.is_noop());
}

#[tokio::test]
async fn actuation_failure_is_isolated_per_principal() {
    let bed = TestBed::new(NOW).await;
    bed.verified_tenant("guild-1").await;
    for (user, n) in [("user-1", 1), ("user-2", 2), ("user-3", 3)] {
        bed.link("guild-1", user, wallet(n)).await;
    }
    bed.indexer.set_pages(vec![PageResult::last(vec![
        live(wallet(1), NOW + 60),
        live(wallet(2), NOW + 60),
        live(wallet(3), NOW + 60),
    ])]);
    bed.actuator.fail_for("user-2");

    let report = bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
    assert_eq!(report.grants, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(bed.status_of("guild-1", "user-2").await, None);

    bed.actuator.heal();
    let retry = bed.engine.reconciler.reconcile("guild-1").await.expect("retry");
    assert_eq!(retry.grants, 1);
    assert_eq!(
        bed.status_of("guild-1", "user-2").await,
        Some(SubscriptionStatus::Active)
    );
}

#[tokio::test]
async fn infeasible_tenant_is_marked_unsyncable() {
    let bed = TestBed::new(NOW).await;
    bed.verified_tenant("guild-1").await;
    bed.link("guild-1", "user-1", wallet(1)).await;
    bed.indexer
        .set_pages(vec![PageResult::last(vec![live(wallet(1), NOW + 60)])]);
    bed.actuator.set_feasibility(Feasibility {
        reachable: true,
        rank_ok: false,
    });

    let report = bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
    assert_eq!(report.status, PassStatus::Infeasible);
    assert!(bed.actuator.calls().is_empty());
    assert!(!bed.tenant("guild-1").await.syncable);

    bed.actuator.set_feasibility(Feasibility::FEASIBLE);
    let report = bed.engine.reconciler.reconcile("guild-1").await.expect("pass");
    assert_eq!(report.grants, 1);
    assert!(bed.tenant("guild-1").await.syncable);
}

#[tokio::test]
async fn unsupported_chain_is_a_configuration_error() {
    let bed = TestBed::new(NOW).await;
    bed.engine
        .store
        .setup_tenant("guild-1", "12", 1, "role-1", NOW)
        .await
        .expect("setup");
    bed.engine
        .store
        .mark_verified("guild-1", "0xsig", NOW)
        .await
        .expect("verify");

    let err = bed
        .engine
        .reconciler
        .reconcile("guild-1")
        .await
        .expect_err("chain 1 is not supported");
    assert!(matches!(err, EngineError::UnresolvedContract { chain_id: 1, .. }));
    assert!(err.is_configuration());
}

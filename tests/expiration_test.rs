//! End-to-end lease lifecycle scenarios against in-memory seams.
//!
//! All tests run under a paused tokio clock so multi-second schedules
//! (restore clamping, revocation backoff) execute instantly and
//! deterministically: sleeping in the test body advances the clock and
//! fires whatever timers come due.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use chrono::Utc;
use serde_json::Map;
use tokio::time::sleep;

use alder::api::inmemory::DeterministicStorageBackend;
use alder::api::Operation;
use alder::api::Request;
use alder::api::Response;
use alder::api::Secret;
use alder::api::StorageEntry;
use alder::api::View;
use alder::expiration::ExpirationError;
use alder::expiration::ExpirationManager;
use alder::expiration::LeaseEntry;
use alder::testing::RecordingRouter;
use alder::testing::RecordingTokenStore;

struct TestBroker {
    backend: Arc<DeterministicStorageBackend>,
    view: View,
    router: Arc<RecordingRouter>,
    tokens: Arc<RecordingTokenStore>,
    manager: Arc<ExpirationManager>,
}

fn broker() -> TestBroker {
    let _ = tracing_subscriber::fmt::try_init();
    let backend = DeterministicStorageBackend::new();
    let view = View::new(backend.clone(), "expire/");
    let router = RecordingRouter::new();
    let tokens = RecordingTokenStore::new();
    let manager = ExpirationManager::new(router.clone(), view.clone(), tokens.clone());
    TestBroker {
        backend,
        view,
        router,
        tokens,
        manager,
    }
}

fn leased_response(lease: Duration) -> Response {
    Response::leased(Secret::with_lease(lease), Map::new())
}

async fn register(broker: &TestBroker, path: &str, lease: Duration) -> String {
    let request = Request::new(Operation::Read, path);
    let response = leased_response(lease);
    broker
        .manager
        .register(&request, Some(&response))
        .await
        .expect("register")
        .expect("leased response mints an id")
}

async fn load_entry(view: &View, lease_id: &str) -> Option<LeaseEntry> {
    view.get(lease_id)
        .await
        .expect("storage read")
        .map(|entry| LeaseEntry::decode(&entry.value).expect("decode"))
}

// ============================================================================
// Automatic expiry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn lease_is_revoked_at_expiry() {
    let broker = broker();
    let lease_id = register(&broker, "pg/creds/app", Duration::milliseconds(200)).await;
    assert_eq!(broker.manager.pending_count().await, 1);

    sleep(StdDuration::from_millis(400)).await;

    assert!(load_entry(&broker.view, &lease_id).await.is_none());
    assert_eq!(broker.manager.pending_count().await, 0);

    let requests = broker.router.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].operation, Operation::Revoke);
    assert_eq!(requests[0].path, "pg/creds/app");
}

#[tokio::test(start_paused = true)]
async fn renew_moves_the_expiry() {
    let broker = broker();
    let lease_id = register(&broker, "pg/creds/app", Duration::milliseconds(500)).await;

    sleep(StdDuration::from_millis(200)).await;

    broker
        .router
        .set_renew_response(leased_response(Duration::seconds(1)));
    let renewed = broker
        .manager
        .renew(&lease_id, Duration::seconds(1))
        .await
        .expect("renew")
        .expect("backend granted a new lease");
    assert_eq!(
        renewed.secret.as_ref().map(|secret| secret.lease_id.as_str()),
        Some(lease_id.as_str())
    );

    let entry = load_entry(&broker.view, &lease_id).await.expect("persisted");
    let expected = Utc::now() + Duration::seconds(1);
    let drift = (entry.expire_time.expect("expiring") - expected)
        .num_milliseconds()
        .abs();
    assert!(drift < 2_000, "expire_time drifted {drift}ms from renew+1s");

    // The original 500ms timer must not fire; the reset one fires at 1.2s.
    sleep(StdDuration::from_millis(950)).await;
    assert_eq!(broker.router.revoke_count(), 0);

    sleep(StdDuration::from_millis(200)).await;
    assert_eq!(broker.router.revoke_count(), 1);
    assert!(load_entry(&broker.view, &lease_id).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn explicit_revoke_wins_the_race_with_the_timer() {
    let broker = broker();
    let lease_id = register(&broker, "pg/creds/app", Duration::milliseconds(100)).await;

    sleep(StdDuration::from_millis(50)).await;
    broker.manager.revoke(&lease_id).await.expect("revoke");

    // Ride past the original expiry; the cancelled timer must not fire and
    // a fired one would find nothing to revoke anyway.
    sleep(StdDuration::from_millis(100)).await;

    assert_eq!(broker.router.revoke_count(), 1);
    assert!(load_entry(&broker.view, &lease_id).await.is_none());
    assert_eq!(broker.manager.pending_count().await, 0);
}

// ============================================================================
// Prefix revocation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn revoke_prefix_sweeps_every_lease_under_it() {
    let broker = broker();
    let hour = Duration::hours(1);
    let a = register(&broker, "aws/creds/a", hour).await;
    let b = register(&broker, "aws/creds/b", hour).await;
    let c = register(&broker, "aws/creds/c", hour).await;
    let outside = register(&broker, "pg/creds/app", hour).await;

    broker
        .manager
        .revoke_prefix("aws/creds")
        .await
        .expect("prefix revocation");

    for lease_id in [&a, &b, &c] {
        assert!(load_entry(&broker.view, lease_id).await.is_none());
    }
    assert!(load_entry(&broker.view, &outside).await.is_some());
    assert_eq!(broker.router.revoke_count(), 3);
    assert_eq!(broker.manager.pending_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn revoke_prefix_reports_the_first_failure() {
    let broker = broker();
    let hour = Duration::hours(1);
    register(&broker, "aws/creds/a", hour).await;
    register(&broker, "aws/creds/b", hour).await;

    broker.router.fail_revocations(2);
    let err = broker
        .manager
        .revoke_prefix("aws/creds")
        .await
        .expect_err("scripted failure");

    match err {
        ExpirationError::RevokePrefix {
            lease_id,
            index,
            total,
            ..
        } => {
            assert!(lease_id.starts_with("aws/creds/"));
            assert_eq!(index, 1);
            assert_eq!(total, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ============================================================================
// Restore
// ============================================================================

#[tokio::test(start_paused = true)]
async fn restore_clamps_overdue_leases() {
    let broker = broker();

    let entry = LeaseEntry {
        lease_id: "pg/creds/app/overdue".to_string(),
        login_token: String::new(),
        path: "pg/creds/app".to_string(),
        data: Map::new(),
        secret: Secret::with_lease(Duration::seconds(30)),
        issue_time: Utc::now() - Duration::seconds(40),
        expire_time: Some(Utc::now() - Duration::seconds(10)),
        extra: Map::new(),
    };
    broker
        .view
        .put(StorageEntry {
            key: entry.lease_id.clone(),
            value: entry.encode().expect("encode"),
        })
        .await
        .expect("seed storage");

    let system_view = View::new(broker.backend.clone(), "");
    let manager = ExpirationManager::start(
        broker.router.clone(),
        &system_view,
        broker.tokens.clone(),
    )
    .await
    .expect("restore");
    assert_eq!(manager.pending_count().await, 1);

    // Not revoked instantly at boot.
    sleep(StdDuration::from_millis(100)).await;
    assert_eq!(broker.router.revoke_count(), 0);

    // Revoked once the clamp window elapses.
    sleep(StdDuration::from_secs(5)).await;
    assert_eq!(broker.router.revoke_count(), 1);
    assert!(load_entry(&broker.view, &entry.lease_id).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn restart_rebuilds_the_timer_set() {
    let broker = broker();
    register(&broker, "aws/creds/a", Duration::hours(1)).await;
    register(&broker, "pg/creds/app", Duration::hours(2)).await;

    let non_expiring = LeaseEntry {
        lease_id: "kv/static/cfg".to_string(),
        login_token: String::new(),
        path: "kv/static".to_string(),
        data: Map::new(),
        secret: Secret::with_lease(Duration::zero()),
        issue_time: Utc::now(),
        expire_time: None,
        extra: Map::new(),
    };
    broker
        .view
        .put(StorageEntry {
            key: non_expiring.lease_id.clone(),
            value: non_expiring.encode().expect("encode"),
        })
        .await
        .expect("seed storage");

    broker.manager.stop().await;
    assert_eq!(broker.manager.pending_count().await, 0);

    let successor = ExpirationManager::new(
        broker.router.clone(),
        broker.view.clone(),
        broker.tokens.clone(),
    );
    successor.restore().await.expect("restore");

    // Expiring leases get timers back; the non-expiring one stays dormant.
    assert_eq!(successor.pending_count().await, 2);
}

// ============================================================================
// Revocation retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn expiry_retries_with_exponential_backoff() {
    let broker = broker();
    let lease_id = register(&broker, "pg/creds/app", Duration::milliseconds(50)).await;

    broker.router.fail_revocations(3);
    sleep(StdDuration::from_secs(100)).await;

    let instants = broker.router.revoke_instants();
    assert_eq!(instants.len(), 4, "three failures then one success");

    let gaps: Vec<StdDuration> = instants.windows(2).map(|pair| pair[1] - pair[0]).collect();
    for (gap, expected_secs) in gaps.iter().zip([10u64, 20, 40]) {
        let expected = StdDuration::from_secs(expected_secs);
        let skew = if *gap > expected {
            *gap - expected
        } else {
            expected - *gap
        };
        assert!(
            skew < StdDuration::from_millis(100),
            "backoff gap {gap:?}, expected {expected:?}"
        );
    }

    assert!(load_entry(&broker.view, &lease_id).await.is_none());
    assert_eq!(broker.manager.pending_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_leave_the_entry_for_restart() {
    let broker = broker();
    let lease_id = register(&broker, "pg/creds/app", Duration::milliseconds(50)).await;

    broker.router.fail_revocations(usize::MAX);
    // Past the whole backoff schedule: 10 + 20 + 40 + 80 + 160 seconds.
    sleep(StdDuration::from_secs(400)).await;

    assert_eq!(broker.router.revoke_count(), 6);
    assert!(
        load_entry(&broker.view, &lease_id).await.is_some(),
        "abandoned lease stays durable for the next restore"
    );
    assert_eq!(broker.manager.pending_count().await, 0);
}

// ============================================================================
// Login-token leases
// ============================================================================

#[tokio::test(start_paused = true)]
async fn login_lease_revokes_through_the_token_store() {
    let broker = broker();
    let request = Request::new(Operation::Write, "auth/userpass/login/alice");
    let response = leased_response(Duration::hours(1));

    let lease_id = broker
        .manager
        .register_login("t1", &request, Some(&response))
        .await
        .expect("register login")
        .expect("leased response mints an id");
    assert!(lease_id.starts_with("auth/userpass/login/alice/"));

    broker.manager.revoke(&lease_id).await.expect("revoke");

    assert_eq!(broker.tokens.revoked(), vec!["t1".to_string()]);
    assert!(broker.router.requests().is_empty());
    assert!(load_entry(&broker.view, &lease_id).await.is_none());
}

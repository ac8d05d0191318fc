// ABOUTME: Behavioral tests for node pool guarantees under concurrent use
// Verifies the size bound, idle reuse, blocking waiters, quarantine, revival and drain

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cache_pool::{FailurePolicy, NodeHealth, NodePool, PoolError, PoolEvent, PoolSettings};
use pretty_assertions::assert_eq;

use super::fixtures::{endpoint, settings, MockConnector};

fn node(settings: PoolSettings) -> (NodePool<MockConnector>, Arc<MockConnector>) {
    let connector = Arc::new(MockConnector::new());
    let pool = NodePool::new(
        endpoint("cache-a"),
        Arc::new(settings.build().unwrap()),
        Arc::clone(&connector),
    );
    (pool, connector)
}

// ==================== Size Bound Tests ====================

/// Outstanding sockets never exceed max_pool_size under concurrent load
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_use_never_exceeds_max() {
    let (pool, connector) = node(PoolSettings {
        max_pool_size: 3,
        queue_timeout: Duration::from_secs(5),
        ..settings()
    });

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::new();
    for _ in 0..16 {
        let pool = pool.clone();
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        workers.push(tokio::spawn(async move {
            for _ in 0..10 {
                let lease = pool.acquire().await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                pool.release(lease, true).await;
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(connector.connects() <= 3, "{} sockets created", connector.connects());

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.in_use, 0);
    assert_eq!(snapshot.connecting, 0);
    assert!(snapshot.total() <= 3);
    assert_eq!(snapshot.metrics.acquired, 160);
}

// ==================== Reuse Tests ====================

#[tokio::test]
async fn test_idle_reuse_preferred_over_growth() {
    let (pool, connector) = node(settings());

    let first = pool.acquire().await.unwrap();
    let id = first.id();
    pool.release(first, true).await;

    let second = pool.acquire().await.unwrap();
    assert_eq!(second.id(), id);
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_socket_closed_by_peer_is_not_reused() {
    let (pool, connector) = node(settings());

    let first = pool.acquire().await.unwrap();
    let id = first.id();
    connector.hang_up_all();
    pool.release(first, true).await;
    assert_eq!(pool.idle_count(), 0);

    let second = pool.acquire().await.unwrap();
    assert_ne!(second.id(), id);
    assert_eq!(pool.failure_count(), 0);
}

// ==================== Queue Tests ====================

/// A blocked waiter receives the socket another caller releases
#[tokio::test]
async fn test_waiter_receives_released_socket() {
    let (pool, connector) = node(PoolSettings {
        max_pool_size: 1,
        queue_timeout: Duration::from_secs(2),
        ..settings()
    });

    let held = pool.acquire().await.unwrap();
    let id = held.id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let lease = pool.acquire().await;
            (lease, started.elapsed())
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    pool.release(held, true).await;

    let (lease, waited) = waiter.await.unwrap();
    let lease = lease.unwrap();
    assert_eq!(lease.id(), id);
    assert!(waited >= Duration::from_millis(40));
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_waiter_times_out_when_nothing_released() {
    let (pool, _connector) = node(PoolSettings {
        max_pool_size: 1,
        ..settings()
    });

    let _held = pool.acquire().await.unwrap();

    let started = Instant::now();
    let err = pool.acquire().await.unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, PoolError::PoolExhausted { .. }));
    assert!(waited >= Duration::from_millis(90));
    assert!(waited < Duration::from_secs(1));
}

#[tokio::test]
async fn test_acquire_within_overrides_queue_timeout() {
    let (pool, _connector) = node(PoolSettings {
        max_pool_size: 1,
        queue_timeout: Duration::from_secs(30),
        ..settings()
    });

    let _held = pool.acquire().await.unwrap();

    let started = Instant::now();
    let err = pool.acquire_within(Duration::from_millis(20)).await.unwrap_err();
    assert!(matches!(err, PoolError::PoolExhausted { .. }));
    assert!(started.elapsed() < Duration::from_secs(1));
}

/// Abandoning a wait must not leak the slot it was waiting for
#[tokio::test]
async fn test_cancelled_waiter_does_not_leak_slot() {
    let (pool, _connector) = node(PoolSettings {
        max_pool_size: 1,
        queue_timeout: Duration::from_secs(5),
        ..settings()
    });

    let held = pool.acquire().await.unwrap();
    let cancelled = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
    assert!(cancelled.is_err());

    pool.release(held, true).await;
    let again = tokio::time::timeout(Duration::from_millis(200), pool.acquire())
        .await
        .expect("slot leaked by cancelled waiter");
    assert!(again.is_ok());
}

/// Slow connects are bounded by the queue budget, and never blamed on the node
#[tokio::test]
async fn test_connect_bounded_by_queue_timeout() {
    let (pool, connector) = node(PoolSettings {
        connection_timeout: Duration::from_secs(10),
        queue_timeout: Duration::from_millis(80),
        ..settings()
    });
    connector.set_latency(Duration::from_millis(500));

    let started = Instant::now();
    let err = pool.acquire().await.unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, PoolError::PoolExhausted { .. }), "{err:?}");
    assert!(waited < Duration::from_millis(400), "waited {waited:?}");
    assert_eq!(pool.failure_count(), 0);
    assert_eq!(pool.snapshot().connecting, 0);
}

#[tokio::test]
async fn test_connect_timeout_counts_as_failure() {
    let (pool, connector) = node(PoolSettings {
        connection_timeout: Duration::from_millis(30),
        queue_timeout: Duration::from_secs(1),
        ..settings()
    });
    connector.set_latency(Duration::from_millis(500));

    let err = pool.acquire().await.unwrap_err();
    assert!(err.is_node_failure(), "{err:?}");
    assert_eq!(pool.failure_count(), 1);
}

// ==================== Quarantine Tests ====================

/// Exactly `threshold` failed releases mark the node dead; acquire then fails fast
#[tokio::test]
async fn test_threshold_failures_mark_dead_and_fail_fast() {
    let (pool, _connector) = node(PoolSettings {
        max_pool_size: 4,
        queue_timeout: Duration::from_secs(5),
        dead_timeout: Duration::from_secs(60),
        ..settings()
    });

    for expected in 1..=2 {
        let lease = pool.acquire().await.unwrap();
        pool.release(lease, false).await;
        assert_eq!(pool.health(), NodeHealth::Alive);
        assert_eq!(pool.failure_count(), expected);
    }

    let lease = pool.acquire().await.unwrap();
    pool.release(lease, false).await;
    assert_eq!(pool.health(), NodeHealth::Dead);

    let started = Instant::now();
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, PoolError::NodeDead { .. }));
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(pool.metrics().snapshot().rejected_dead, 1);
}

#[tokio::test]
async fn test_in_flight_waiter_completes_after_node_dies() {
    let (pool, _connector) = node(PoolSettings {
        max_pool_size: 1,
        queue_timeout: Duration::from_millis(150),
        dead_timeout: Duration::from_secs(60),
        failure_policy: FailurePolicy::FailImmediately,
        ..settings()
    });

    let held = pool.acquire().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    pool.release(held, false).await;
    assert_eq!(pool.health(), NodeHealth::Dead);

    // The waiter was already queued; it is served or times out normally
    let result = waiter.await.unwrap();
    assert!(
        matches!(result, Ok(_) | Err(PoolError::PoolExhausted { .. })),
        "{result:?}"
    );
}

// ==================== Revival Tests ====================

#[tokio::test]
async fn test_probe_revives_dead_node() {
    let (pool, connector) = node(settings());
    let mut events = pool.subscribe();

    connector.set_refuse(true);
    for _ in 0..3 {
        pool.acquire().await.unwrap_err();
    }
    assert_eq!(pool.health(), NodeHealth::Dead);
    assert_eq!(events.recv().await.unwrap(), PoolEvent::NodeDead { endpoint: endpoint("cache-a") });

    // No probe before dead_timeout
    let attempts = connector.attempts();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.attempts(), attempts);

    connector.set_refuse(false);
    let revived = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(revived, PoolEvent::NodeRevived { endpoint: endpoint("cache-a") });

    assert_eq!(pool.health(), NodeHealth::Alive);
    assert_eq!(pool.failure_count(), 0);
    assert!(pool.acquire().await.is_ok());
}

#[tokio::test]
async fn test_probe_does_not_use_pool_slots() {
    let (pool, connector) = node(PoolSettings {
        max_pool_size: 1,
        failure_policy: FailurePolicy::FailImmediately,
        ..settings()
    });

    connector.set_refuse(true);
    pool.acquire().await.unwrap_err();
    assert_eq!(pool.health(), NodeHealth::Dead);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let snapshot = pool.snapshot();
    assert_eq!(snapshot.in_use, 0);
    assert_eq!(snapshot.connecting, 0);
    assert!(connector.attempts() >= 2, "expected revival probes");
}

/// Revival attempts against a dead node are spaced at least dead_timeout apart
#[tokio::test]
async fn test_revival_attempts_respect_dead_timeout() {
    let dead_timeout = Duration::from_millis(100);
    let (pool, connector) = node(PoolSettings {
        dead_timeout,
        failure_policy: FailurePolicy::FailImmediately,
        ..settings()
    });

    connector.set_refuse(true);
    pool.acquire().await.unwrap_err();
    assert_eq!(pool.health(), NodeHealth::Dead);

    tokio::time::sleep(Duration::from_millis(450)).await;
    let times = connector.attempt_times();
    assert!(times.len() >= 3, "expected repeated revival probes, got {}", times.len());
    assert!(times.len() <= 5, "too many revival probes: {}", times.len());

    // First gap: failing acquire to first probe; the rest are probe to probe
    for pair in times.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(gap >= dead_timeout, "probes only {gap:?} apart");
    }
    assert_eq!(pool.health(), NodeHealth::Dead);
}

// ==================== Drain Tests ====================

#[tokio::test]
async fn test_drain_closes_idle_and_defers_in_use() {
    let (pool, connector) = node(PoolSettings {
        min_pool_size: 2,
        max_pool_size: 3,
        ..settings()
    });
    assert_eq!(pool.warm_up().await, 2);

    let leased = pool.acquire().await.unwrap();
    assert_eq!(pool.idle_count(), 1);

    assert_eq!(pool.drain().await, 1);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.in_use_count(), 1);

    // No new sockets after drain
    let connects = connector.connects();
    assert!(matches!(pool.acquire().await, Err(PoolError::ShutDown { .. })));
    assert_eq!(connector.connects(), connects);

    pool.release(leased, true).await;
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.in_use_count(), 0);
}

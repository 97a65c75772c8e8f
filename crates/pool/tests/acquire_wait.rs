//! Blocking acquire: timeouts, hand-off on release, FIFO fairness and
//! cancellation safety.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use reservoir_pool::{Connector, Pool, PoolConfig, Release};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SerialConnector {
    next: Arc<AtomicU64>,
    open_delay_ms: Arc<AtomicU64>,
}

impl Connector for SerialConnector {
    type Config = ();
    type Connection = u64;
    type Error = Infallible;

    async fn open(&self, _config: &()) -> Result<u64, Infallible> {
        let delay = self.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }

    async fn is_valid(&self, _conn: &mut u64) -> bool {
        true
    }
}

fn config(capacity: usize) -> PoolConfig {
    PoolConfig::new(capacity)
        .with_min_idle(0)
        .with_idle_timeout(Duration::from_millis(10))
        .with_eviction_interval(Duration::from_secs(3600))
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn saturated_acquire_times_out_after_bound() {
    let pool = Pool::new(SerialConnector::default(), (), config(1)).await.unwrap();
    let _held = pool.acquire(Duration::from_millis(50)).await.unwrap();

    let start = Instant::now();
    let err = pool.acquire(Duration::from_millis(50)).await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout(), "expected AcquireTimeout, got {err:?}");
    assert!(elapsed >= Duration::from_millis(50), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(60), "returned late: {elapsed:?}");

    let stats = pool.stats();
    assert_eq!(stats.total, 1, "timeout must not change the count");
    assert_eq!(stats.waiters, 0, "timed-out waiter must be deregistered");
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_fails_fast_when_saturated() {
    let pool = Pool::new(SerialConnector::default(), (), config(1)).await.unwrap();
    let _held = pool.get().await.unwrap();

    let start = Instant::now();
    let err = pool.acquire(Duration::ZERO).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(start.elapsed() <= Duration::from_millis(1));
}

// ---------------------------------------------------------------------------
// Hand-off and fairness
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn release_unblocks_waiter_with_released_connection() {
    let pool = Pool::new(SerialConnector::default(), (), config(1)).await.unwrap();
    let held = pool.get().await.unwrap();
    let held_id = held.id();

    let waiter_pool = pool.clone();
    let waiter = tokio::spawn(async move {
        let start = Instant::now();
        let conn = waiter_pool.acquire(Duration::from_secs(1)).await;
        (conn, start.elapsed())
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.stats().waiters, 1);

    assert!(matches!(pool.release(held).await, Release::Recycled));
    let (conn, waited) = waiter.await.unwrap();
    let conn = conn.expect("waiter should be served");

    assert_eq!(conn.id(), held_id);
    assert!(waited < Duration::from_secs(1));
    let stats = pool.stats();
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.outstanding, 1);
}

#[tokio::test(start_paused = true)]
async fn waiters_are_served_in_arrival_order() {
    let pool = Pool::new(SerialConnector::default(), (), config(1)).await.unwrap();
    let held = pool.get().await.unwrap();

    let first_pool = pool.clone();
    let first = tokio::spawn(async move { first_pool.acquire(Duration::from_secs(5)).await });
    tokio::time::sleep(Duration::from_millis(1)).await;

    let second_pool = pool.clone();
    let second = tokio::spawn(async move { second_pool.acquire(Duration::from_secs(5)).await });
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(pool.stats().waiters, 2);

    let _ = pool.release(held).await;
    let first_conn = first.await.unwrap().expect("first waiter served first");
    assert_eq!(pool.stats().waiters, 1, "second waiter still queued");
    assert!(!second.is_finished());

    let _ = pool.release(first_conn).await;
    let second_conn = second.await.unwrap().expect("second waiter served next");
    assert_eq!(*second_conn, 0);
}

#[tokio::test(start_paused = true)]
async fn idle_reuse_is_preferred_over_opening() {
    let connector = SerialConnector::default();
    let pool = Pool::new(connector.clone(), (), config(2)).await.unwrap();

    let a = pool.get().await.unwrap();
    let _b = pool.get().await.unwrap();
    let _ = pool.release(a).await;

    let c = pool.get().await.unwrap();
    assert_eq!(*c, 0);
    assert_eq!(connector.next.load(Ordering::SeqCst), 2, "no extra open");
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancelled_waiter_leaves_no_registration() {
    let pool = Pool::new(SerialConnector::default(), (), config(1)).await.unwrap();
    let held = pool.get().await.unwrap();

    let waiter_pool = pool.clone();
    let waiter = tokio::spawn(async move { waiter_pool.acquire(Duration::from_secs(30)).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.stats().waiters, 1);

    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());
    assert_eq!(pool.stats().waiters, 0);

    let _ = pool.release(held).await;
    let stats = pool.stats();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.total, 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_open_releases_reservation() {
    let connector = SerialConnector::default();
    let pool = Pool::new(connector.clone(), (), config(1)).await.unwrap();

    // empty the pool so the next acquire has to open
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pool.evict_idle().await, 1);
    assert_eq!(pool.stats().total, 0);

    connector.open_delay_ms.store(1_000, Ordering::SeqCst);
    let opener_pool = pool.clone();
    let opener = tokio::spawn(async move { opener_pool.acquire(Duration::from_secs(5)).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.stats().opening, 1);

    opener.abort();
    let _ = opener.await;
    let stats = pool.stats();
    assert_eq!(stats.opening, 0);
    assert_eq!(stats.total, 0);

    connector.open_delay_ms.store(0, Ordering::SeqCst);
    assert!(pool.acquire(Duration::ZERO).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn granted_open_is_bounded_by_the_caller_timeout() {
    let connector = SerialConnector::default();
    let pool = Pool::new(connector.clone(), (), config(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pool.evict_idle().await, 1);

    // a slow open holds the only slot
    connector.open_delay_ms.store(1_000, Ordering::SeqCst);
    let opener_pool = pool.clone();
    let opener = tokio::spawn(async move { opener_pool.acquire(Duration::from_secs(5)).await });
    tokio::time::sleep(Duration::from_millis(5)).await;

    let waiter_pool = pool.clone();
    let waiter = tokio::spawn(async move {
        let start = Instant::now();
        let result = waiter_pool.acquire(Duration::from_millis(50)).await;
        (result, start.elapsed())
    });
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(pool.stats().waiters, 1);

    // cancelling the opener hands its slot to the waiter, whose own open is just as slow
    opener.abort();
    let _ = opener.await;

    let (result, waited) = waiter.await.unwrap();
    let err = result.unwrap_err();
    assert!(err.is_timeout(), "expected AcquireTimeout, got {err:?}");
    assert!(waited >= Duration::from_millis(50), "returned early: {waited:?}");
    assert!(waited < Duration::from_millis(60), "overran the bound: {waited:?}");

    let stats = pool.stats();
    assert_eq!(stats.opening, 0, "abandoned open must release its slot");
    assert_eq!(stats.total, 0);

    connector.open_delay_ms.store(0, Ordering::SeqCst);
    assert!(pool.acquire(Duration::ZERO).await.is_ok());
}

// ---------------------------------------------------------------------------
// Concurrency bound
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_more_than_capacity_outstanding() {
    const CAPACITY: usize = 3;
    let pool = Pool::new(SerialConnector::default(), (), config(CAPACITY)).await.unwrap();
    let in_use = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..24 {
        let pool = pool.clone();
        let in_use = Arc::clone(&in_use);
        let peak = Arc::clone(&peak);
        tasks.push(tokio::spawn(async move {
            let conn = pool.acquire(Duration::from_secs(10)).await.unwrap();
            let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            in_use.fetch_sub(1, Ordering::SeqCst);
            assert!(pool.release(conn).await.accepted());
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= CAPACITY);
    let stats = pool.stats();
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.waiters, 0);
    assert_eq!(stats.total, stats.idle);
    assert!(stats.total <= CAPACITY);
}

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tb_throttle::ManualClock;
use tb_throttle::MemoryStore;
use tb_throttle::OverrideConfig;
use tb_throttle::RateLimiter;
use tb_throttle::StoreError;
use tb_throttle::ThrottleConfig;
use tb_throttle::ThrottleError;
use tb_throttle::ThrottleManager;
use tb_throttle::TokenBucket;
use tb_throttle::TokenStore;
use tb_throttle::Verdict;

const T0: u64 = 1_700_000_000_000;

fn throttle_with_clock(rate: u32) -> (ThrottleManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let throttle = ThrottleManager::builder().rate(rate).clock(clock.clone()).build().unwrap();
    (throttle, clock)
}

#[test]
fn test_rate_limit_then_recover() {
    let (throttle, clock) = throttle_with_clock(3);

    for _ in 0..3 {
        clock.advance(Duration::from_millis(10));
        assert_eq!(throttle.rate_limit("test").unwrap().limited(), Some(false));
    }

    clock.advance(Duration::from_millis(10));
    assert_eq!(throttle.rate_limit("test").unwrap().limited(), Some(true));

    clock.advance(Duration::from_millis(1000));
    assert_eq!(throttle.rate_limit("test").unwrap().limited(), Some(false));
}

#[test]
fn test_peek_does_not_consume() {
    let (throttle, clock) = throttle_with_clock(2);

    assert_eq!(throttle.rate_limit("test").unwrap(), Verdict::Allowed);
    for _ in 0..3 {
        clock.advance(Duration::from_millis(1));
        assert_eq!(throttle.peek_rate_limit("test").unwrap(), Verdict::Allowed);
    }

    assert_eq!(throttle.rate_limit("test").unwrap(), Verdict::Allowed);
    assert_eq!(throttle.peek_rate_limit("test").unwrap(), Verdict::Limited);
    assert_eq!(throttle.rate_limit("test").unwrap(), Verdict::Limited);
}

#[test]
fn test_peek_matches_following_rate_limit() {
    let (peeked, clock_a) = throttle_with_clock(2);
    let (plain, clock_b) = throttle_with_clock(2);

    // Same schedule on both, with peeks sprinkled into one of them
    for step in 0..40u64 {
        let wait = Duration::from_millis((step * 37) % 400);
        clock_a.advance(wait);
        clock_b.advance(wait);

        if step % 3 == 0 {
            peeked.peek_rate_limit("k").unwrap();
        }
        assert_eq!(peeked.rate_limit("k").unwrap(), plain.rate_limit("k").unwrap(), "diverged at step {step}");
    }
}

#[test]
fn test_override_disables_limiting() {
    let throttle = ThrottleManager::builder().rate(3).burst(3).override_key("test", OverrideConfig::new(0).with_burst(0)).build().unwrap();

    for _ in 0..10 {
        assert_eq!(throttle.rate_limit("test").unwrap().limited(), None);
        assert_eq!(throttle.peek_rate_limit("test").unwrap().limited(), None);
    }
    assert_eq!(throttle.rate_limit("other").unwrap().limited(), Some(false));
}

#[test]
fn test_override_rate_only_disables_limiting() {
    let throttle = ThrottleManager::builder().rate(3).burst(3).override_key("test", OverrideConfig::new(0)).build().unwrap();

    for _ in 0..4 {
        assert_eq!(throttle.rate_limit("test").unwrap(), Verdict::Unthrottled);
    }
}

#[test]
fn test_different_window() {
    let clock = Arc::new(ManualClock::new(T0));
    let throttle = ThrottleManager::builder().rate(1).burst(3).window(Duration::from_millis(100)).clock(clock.clone()).build().unwrap();

    for _ in 0..3 {
        clock.advance(Duration::from_millis(10));
        assert_eq!(throttle.rate_limit("test").unwrap(), Verdict::Allowed);
    }
    clock.advance(Duration::from_millis(10));
    assert_eq!(throttle.rate_limit("test").unwrap(), Verdict::Limited);

    clock.advance(Duration::from_millis(100));
    assert_eq!(throttle.rate_limit("test").unwrap(), Verdict::Allowed);
}

#[test]
fn test_bad_options() {
    assert!(matches!(ThrottleManager::builder().build(), Err(ThrottleError::MissingRate)));
    assert!(matches!(ThrottleManager::from_config(ThrottleConfig::default()), Err(ThrottleError::MissingRate)));
    assert!(matches!(ThrottleManager::builder().burst(1).build(), Err(ThrottleError::MissingRate)));
    assert!(matches!(ThrottleManager::builder().rate("blue").build(), Err(ThrottleError::InvalidRate { field: "rate", .. })));
    assert!(matches!(ThrottleManager::builder().rate(1).burst("lots").build(), Err(ThrottleError::InvalidRate { field: "burst", .. })));
}

#[test]
fn test_numeric_strings_accepted() {
    let throttle = ThrottleManager::builder().rate("2").burst(" 4 ").build().unwrap();
    assert_eq!(throttle.defaults().rate, 2.0);
    assert_eq!(throttle.defaults().burst, 4.0);
}

#[test]
fn test_config_from_json() {
    let config: ThrottleConfig = serde_json::from_str(r#"{"rate": "1", "burst": 2, "overrides": {"admin": {"rate": 0}}}"#).unwrap();
    let throttle = ThrottleManager::from_config(config).unwrap();

    assert_eq!(throttle.rate_limit("user").unwrap(), Verdict::Allowed);
    assert_eq!(throttle.rate_limit("user").unwrap(), Verdict::Allowed);
    assert_eq!(throttle.rate_limit("user").unwrap(), Verdict::Limited);
    assert_eq!(throttle.rate_limit("admin").unwrap(), Verdict::Unthrottled);
}

/// Store that records every call, holding a single bucket like a one-slot cache
#[derive(Default)]
struct RecordingStore {
    bucket: Mutex<Option<TokenBucket>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl TokenStore for RecordingStore {
    fn get(&self, _key: &str) -> Result<Option<TokenBucket>, StoreError> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        Ok(*self.bucket.lock())
    }

    fn put(&self, _key: &str, bucket: TokenBucket) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        *self.bucket.lock() = Some(bucket);
        Ok(())
    }
}

#[test]
fn test_custom_store() {
    let store = Arc::new(RecordingStore::default());
    let clock = Arc::new(ManualClock::new(T0));
    let throttle = ThrottleManager::builder()
        .rate(1)
        .burst(3)
        .window(Duration::from_millis(100))
        .store(store.clone())
        .clock(clock.clone())
        .build()
        .unwrap();

    for _ in 0..3 {
        clock.advance(Duration::from_millis(10));
        assert_eq!(throttle.rate_limit("test").unwrap(), Verdict::Allowed);
    }
    clock.advance(Duration::from_millis(10));
    assert_eq!(throttle.rate_limit("test").unwrap(), Verdict::Limited);
    clock.advance(Duration::from_millis(100));
    assert_eq!(throttle.rate_limit("test").unwrap(), Verdict::Allowed);

    // Every consuming check reads and writes back, including the limited one
    assert_eq!(store.gets.load(Ordering::Relaxed), 5);
    assert_eq!(store.puts.load(Ordering::Relaxed), 5);

    throttle.peek_rate_limit("test").unwrap();
    assert_eq!(store.gets.load(Ordering::Relaxed), 6);
    assert_eq!(store.puts.load(Ordering::Relaxed), 5);
}

struct FailingStore;

impl TokenStore for FailingStore {
    fn get(&self, _key: &str) -> Result<Option<TokenBucket>, StoreError> {
        Err(StoreError::new("backend unavailable"))
    }

    fn put(&self, _key: &str, _bucket: TokenBucket) -> Result<(), StoreError> {
        Err(StoreError::new("backend unavailable"))
    }
}

#[test]
fn test_storage_faults_propagate() {
    let throttle = ThrottleManager::builder().rate(1).store(Arc::new(FailingStore)).build().unwrap();

    assert!(matches!(throttle.rate_limit("k"), Err(ThrottleError::Storage(_))));
    assert!(matches!(throttle.peek_rate_limit("k"), Err(ThrottleError::Storage(_))));
    assert!(matches!(throttle.reset("k"), Err(ThrottleError::Storage(_))));
}

#[test]
fn test_unthrottled_key_skips_storage() {
    let throttle = ThrottleManager::builder().rate(1).override_key("free", OverrideConfig::new(0)).store(Arc::new(FailingStore)).build().unwrap();
    assert_eq!(throttle.rate_limit("free").unwrap(), Verdict::Unthrottled);
}

#[test]
fn test_two_instances_are_independent() {
    let throttle1 = ThrottleManager::builder().rate(3).build().unwrap();
    let throttle2 = ThrottleManager::builder().rate(1).build().unwrap();

    assert_eq!(throttle2.rate_limit("test").unwrap(), Verdict::Allowed);
    assert_eq!(throttle2.rate_limit("test").unwrap(), Verdict::Limited);

    for _ in 0..3 {
        assert_eq!(throttle1.rate_limit("test").unwrap(), Verdict::Allowed);
    }
    assert_eq!(throttle1.rate_limit("test").unwrap(), Verdict::Limited);
}

#[test]
fn test_shared_store_shares_buckets() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let a = ThrottleManager::builder().rate(2).store(store.clone()).clock(clock.clone()).build().unwrap();
    let b = ThrottleManager::builder().rate(2).store(store).clock(clock).build().unwrap();

    assert_eq!(a.rate_limit("k").unwrap(), Verdict::Allowed);
    assert_eq!(b.rate_limit("k").unwrap(), Verdict::Allowed);
    assert_eq!(a.rate_limit("k").unwrap(), Verdict::Limited);
    assert_eq!(b.peek_rate_limit("k").unwrap(), Verdict::Limited);
}

#[test]
fn test_concurrent_callers_never_over_admit() {
    let clock = Arc::new(ManualClock::new(T0));
    let throttle = Arc::new(ThrottleManager::builder().rate(100).clock(clock).build().unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let throttle = Arc::clone(&throttle);
            std::thread::spawn(move || (0..50).filter(|_| throttle.rate_limit("hot").unwrap() == Verdict::Allowed).count())
        })
        .collect();

    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 100);
}

#[test]
fn test_concurrent_callers_with_plain_store() {
    let store = Arc::new(RecordingStore::default());
    let clock = Arc::new(ManualClock::new(T0));
    let throttle = Arc::new(ThrottleManager::builder().rate(40).store(store).clock(clock).build().unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let throttle = Arc::clone(&throttle);
            std::thread::spawn(move || (0..25).filter(|_| throttle.rate_limit("hot").unwrap() == Verdict::Allowed).count())
        })
        .collect();

    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 40);
}

#[tokio::test]
async fn test_acquire_waits_for_refill() {
    let throttle = ThrottleManager::builder().rate(1).window(Duration::from_millis(50)).build().unwrap();

    assert_eq!(throttle.rate_limit("k").unwrap(), Verdict::Allowed);
    assert_eq!(throttle.rate_limit("k").unwrap(), Verdict::Limited);

    let result = tokio::time::timeout(Duration::from_millis(500), throttle.acquire("k")).await;
    assert_eq!(result.expect("acquire timed out").unwrap(), Verdict::Allowed);
}

#[tokio::test]
async fn test_acquire_unthrottled_returns_immediately() {
    let throttle = ThrottleManager::builder().rate(0).burst(0).override_key("free", OverrideConfig::new(0)).build().unwrap();

    let verdict = throttle.acquire("free").await.unwrap();
    assert_eq!(verdict, Verdict::Unthrottled);
}

#[tokio::test]
async fn test_acquire_gives_up_on_drained_bucket_without_refill() {
    let throttle = ThrottleManager::builder().rate(0).burst(1).build().unwrap();
    assert_eq!(throttle.rate_limit("k").unwrap(), Verdict::Allowed);

    let result = tokio::time::timeout(Duration::from_millis(500), throttle.acquire("k")).await;
    assert_eq!(result.expect("acquire hung on a bucket that never refills").unwrap(), Verdict::Limited);
}

#[tokio::test]
async fn test_acquire_gives_up_when_burst_below_one_token() {
    let throttle = ThrottleManager::builder().rate(5).burst(0.5).build().unwrap();

    let result = tokio::time::timeout(Duration::from_millis(500), throttle.acquire("k")).await;
    assert_eq!(result.expect("acquire hung on a bucket smaller than one token").unwrap(), Verdict::Limited);
}

#[tokio::test]
async fn test_acquire_after_reset_succeeds() {
    let throttle = ThrottleManager::builder().rate(0).burst(1).build().unwrap();
    assert_eq!(throttle.rate_limit("k").unwrap(), Verdict::Allowed);
    throttle.reset("k").unwrap();

    let result = tokio::time::timeout(Duration::from_millis(500), throttle.acquire("k")).await;
    assert_eq!(result.expect("acquire timed out").unwrap(), Verdict::Allowed);
}

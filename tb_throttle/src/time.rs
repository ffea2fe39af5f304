use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Source of wall-clock time for token refills
///
/// Timestamps are milliseconds since the Unix epoch so that bucket state stays
/// meaningful after it has been persisted and reloaded by another process.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch
    fn now_millis(&self) -> u64;
}

/// Clock backed by the operating system's wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline(always)]
    fn now_millis(&self) -> u64 {
        // A clock set before 1970 reads as the epoch; refill treats it as no elapsed time
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
    }
}

/// Manually driven clock for deterministic tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at the given timestamp
    pub fn new(start_millis: u64) -> Self {
        Self { now: AtomicU64::new(start_millis) }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::AcqRel);
    }

    /// Jump to an absolute timestamp, which may lie in the past
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::Release);
    }
}

impl Clock for ManualClock {
    #[inline(always)]
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

/// Convert a duration to fractional milliseconds
#[inline(always)]
pub(crate) fn duration_to_millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

use serde::Deserialize;
use serde::Serialize;

use crate::config::DEFAULT_WINDOW_MS;
use crate::config::Numeric;
use crate::error::Result;
use crate::error::ThrottleError;
use crate::time::Clock;
use crate::time::SystemClock;

/// Token bucket for a single key
///
/// Tokens accumulate at `fill_rate` per `window` milliseconds up to
/// `capacity`, and each admitted action consumes one or more of them. Refill
/// is lazy: it is computed from the elapsed wall-clock time whenever the
/// bucket is inspected, so the whole state is plain data that can be copied
/// or persisted between calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "BucketConfig")]
pub struct TokenBucket {
    /// Tokens added per window
    fill_rate: f64,

    /// Maximum number of tokens held
    capacity: f64,

    /// Window length in milliseconds
    window: f64,

    /// Currently available tokens, fractional, always within `[0, capacity]`
    tokens: f64,

    /// Timestamp of the last refill in milliseconds since the Unix epoch
    last_refill_time: u64,
}

impl TokenBucket {
    /// Create a fully charged bucket
    pub fn new(fill_rate: f64, capacity: f64, window_ms: f64) -> Result<Self> {
        Self::new_at(fill_rate, capacity, window_ms, SystemClock.now_millis())
    }

    /// Create a fully charged bucket whose refill clock starts at `now`
    pub fn new_at(fill_rate: f64, capacity: f64, window_ms: f64, now: u64) -> Result<Self> {
        let fill_rate = check_non_negative("fillRate", fill_rate)?;
        let capacity = check_non_negative("capacity", capacity)?;
        if !(window_ms.is_finite() && window_ms > 0.0) {
            return Err(ThrottleError::invalid_config("window", window_ms));
        }

        Ok(Self { fill_rate, capacity, window: window_ms, tokens: capacity, last_refill_time: now })
    }

    /// Build a bucket from loosely typed parameters or previously saved state
    pub fn from_config(config: BucketConfig, clock: &dyn Clock) -> Result<Self> {
        Self::from_config_at(config, clock.now_millis())
    }

    /// Same as [`TokenBucket::from_config`] with an explicit timestamp for missing `lastRefillTime`
    pub fn from_config_at(config: BucketConfig, now: u64) -> Result<Self> {
        let fill_rate = coerce("fillRate", &config.fill_rate)?;
        let capacity = coerce("capacity", &config.capacity)?;
        let window = match &config.window {
            Some(window) => coerce("window", window)?,
            None => DEFAULT_WINDOW_MS,
        };

        let mut bucket = Self::new_at(fill_rate, capacity, window, config.last_refill_time.unwrap_or(now))?;
        if let Some(tokens) = &config.tokens {
            bucket.tokens = check_non_negative("tokens", coerce("tokens", tokens)?)?.min(bucket.capacity);
        }

        Ok(bucket)
    }

    /// Check for `n` tokens without consuming any, using the system clock
    pub fn has_tokens(&mut self, n: u32) -> bool {
        self.has_tokens_at(n, SystemClock.now_millis())
    }

    /// Consume `n` tokens if all of them are available, using the system clock
    pub fn consume(&mut self, n: u32) -> bool {
        self.consume_at(n, SystemClock.now_millis())
    }

    /// Refill up to `now`, then report whether `n` tokens are available
    ///
    /// Only the refill is retained; nothing is deducted.
    #[inline]
    pub fn has_tokens_at(&mut self, n: u32, now: u64) -> bool {
        self.refill(now);
        self.tokens >= n as f64
    }

    /// Refill up to `now`, then take `n` tokens if all of them are available
    ///
    /// On failure the token count is left exactly as the refill produced it.
    #[inline]
    pub fn consume_at(&mut self, n: u32, now: u64) -> bool {
        if !self.has_tokens_at(n, now) {
            return false;
        }

        self.tokens -= n as f64;
        true
    }

    /// Whether `n` tokens are available now or will be after enough refill time
    ///
    /// False for buckets smaller than `n`, and for drained buckets that never refill.
    pub fn can_ever_hold(&self, n: u32) -> bool {
        let n = n as f64;
        self.capacity >= n && (self.fill_rate > 0.0 || self.tokens >= n)
    }

    /// Refill the bucket to capacity and restart its refill clock at `now`
    pub fn reset_at(&mut self, now: u64) {
        self.tokens = self.capacity;
        self.last_refill_time = now;
    }

    /// Add the tokens earned since the last refill
    ///
    /// A timestamp earlier than `last_refill_time` (clock skew) counts as no
    /// elapsed time and never moves the refill clock backwards.
    #[inline(always)]
    fn refill(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_refill_time);
        if elapsed == 0 {
            return;
        }

        let earned = elapsed as f64 / self.window * self.fill_rate;
        self.tokens = (self.tokens + earned).min(self.capacity);
        self.last_refill_time = now;
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn fill_rate(&self) -> f64 {
        self.fill_rate
    }

    pub fn window_ms(&self) -> f64 {
        self.window
    }

    pub fn last_refill_time(&self) -> u64 {
        self.last_refill_time
    }
}

impl TryFrom<BucketConfig> for TokenBucket {
    type Error = ThrottleError;

    fn try_from(config: BucketConfig) -> Result<Self> {
        Self::from_config(config, &SystemClock)
    }
}

/// Loosely typed token bucket parameters, optionally carrying saved state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketConfig {
    pub fill_rate: Numeric,
    pub capacity: Numeric,
    #[serde(default)]
    pub window: Option<Numeric>,
    #[serde(default)]
    pub tokens: Option<Numeric>,
    #[serde(default)]
    pub last_refill_time: Option<u64>,
}

impl BucketConfig {
    pub fn new(fill_rate: impl Into<Numeric>, capacity: impl Into<Numeric>) -> Self {
        Self { fill_rate: fill_rate.into(), capacity: capacity.into(), window: None, tokens: None, last_refill_time: None }
    }

    pub fn with_window(mut self, window: impl Into<Numeric>) -> Self {
        self.window = Some(window.into());
        self
    }
}

impl From<TokenBucket> for BucketConfig {
    fn from(bucket: TokenBucket) -> Self {
        Self {
            fill_rate: bucket.fill_rate.into(),
            capacity: bucket.capacity.into(),
            window: Some(bucket.window.into()),
            tokens: Some(bucket.tokens.into()),
            last_refill_time: Some(bucket.last_refill_time),
        }
    }
}

fn coerce(field: &'static str, value: &Numeric) -> Result<f64> {
    value.to_f64().ok_or_else(|| ThrottleError::invalid_config(field, value))
}

fn check_non_negative(field: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value >= 0.0 { Ok(value) } else { Err(ThrottleError::invalid_config(field, value)) }
}

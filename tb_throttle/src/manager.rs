use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use parking_lot::MutexGuard;
use rapidhash::RapidHashMap;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::DEFAULT_WINDOW_MS;
use crate::config::MEMORY_STORAGE;
use crate::config::Numeric;
use crate::config::OverrideConfig;
use crate::config::ThrottleConfig;
use crate::config::parse_rate;
use crate::config::parse_window;
use crate::error::Result;
use crate::error::ThrottleError;
use crate::limiter::RateLimiter;
use crate::limiter::Verdict;
use crate::store::MemoryStore;
use crate::store::StoreError;
use crate::store::TokenStore;
use crate::time::Clock;
use crate::time::SystemClock;
use crate::time::duration_to_millis;
use crate::token_bucket::TokenBucket;

/// Number of lock stripes guarding per-key read-modify-write sequences
const LOCK_STRIPES: usize = 64;

/// Effective bucket parameters for one key
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    /// Tokens added per window
    pub rate: f64,
    /// Bucket capacity
    pub burst: f64,
    /// Window length in milliseconds
    pub window_ms: f64,
}

impl Limits {
    fn fresh_bucket(&self, now: u64) -> Result<TokenBucket> {
        TokenBucket::new_at(self.rate, self.burst, self.window_ms, now)
    }
}

/// How a key is treated by the throttle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// An all-zero override switched limiting off for this key
    Unthrottled,
    Limited(Limits),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Override {
    rate: f64,
    burst: f64,
}

/// Striped mutexes serialising admission checks that touch the same key
struct KeyLocks {
    stripes: Box<[Mutex<()>]>,
    hasher: RandomState,
}

impl KeyLocks {
    fn new(stripes: usize) -> Self {
        Self { stripes: (0..stripes).map(|_| Mutex::new(())).collect(), hasher: RandomState::new() }
    }

    #[inline]
    fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let index = self.hasher.hash_one(key) as usize % self.stripes.len();
        self.stripes[index].lock()
    }
}

/// Maps keys to token buckets and answers admission checks for them
///
/// Keys without an override share the default rate, burst and window, each
/// with its own bucket created on first use. Buckets live in a pluggable
/// [`TokenStore`]; every check for a key runs its fetch, decide and persist
/// steps while holding that key's lock, so concurrent callers can never both
/// spend the last token.
pub struct ThrottleManager {
    defaults: Limits,
    overrides: RapidHashMap<String, Override>,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    locks: KeyLocks,
}

impl ThrottleManager {
    /// Create a builder for configuring a throttle
    pub fn builder() -> ThrottleManagerBuilder {
        ThrottleManagerBuilder::new()
    }

    /// Build a throttle from a declarative config
    pub fn from_config(config: ThrottleConfig) -> Result<Self> {
        ThrottleManagerBuilder::from_config(config).build()
    }

    /// Effective parameters for `key`
    pub fn resolve(&self, key: &str) -> Resolution {
        match self.overrides.get(key) {
            Some(o) if o.rate == 0.0 && o.burst == 0.0 => Resolution::Unthrottled,
            Some(o) => Resolution::Limited(Limits { rate: o.rate, burst: o.burst, window_ms: self.defaults.window_ms }),
            None => Resolution::Limited(self.defaults),
        }
    }

    /// Default parameters applied to keys without an override
    pub fn defaults(&self) -> Limits {
        self.defaults
    }

    /// Replace the bucket for `key` with a fully charged one
    pub fn reset(&self, key: &str) -> Result<()> {
        let Resolution::Limited(limits) = self.resolve(key) else {
            return Ok(());
        };

        let _guard = self.locks.lock(key);
        let bucket = limits.fresh_bucket(self.clock.now_millis())?;
        self.store.put(key, bucket).map_err(|err| storage_fault(key, err))?;

        debug!(key, "token bucket reset");
        Ok(())
    }
}

impl RateLimiter for ThrottleManager {
    fn rate_limit(&self, key: &str) -> Result<Verdict> {
        let Resolution::Limited(limits) = self.resolve(key) else {
            debug!(key, "rate limiting disabled by override");
            return Ok(Verdict::Unthrottled);
        };

        let _guard = self.locks.lock(key);
        let now = self.clock.now_millis();
        let fresh = limits.fresh_bucket(now)?;

        let mut consumed = false;
        self.store
            .update(key, &mut |existing| {
                let mut bucket = existing.unwrap_or(fresh);
                consumed = bucket.consume_at(1, now);
                bucket
            })
            .map_err(|err| storage_fault(key, err))?;

        if consumed {
            Ok(Verdict::Allowed)
        } else {
            debug!(key, "rate limited");
            Ok(Verdict::Limited)
        }
    }

    /// Refill is applied to a local copy only; the stored bucket is not rewritten
    fn peek_rate_limit(&self, key: &str) -> Result<Verdict> {
        let Resolution::Limited(limits) = self.resolve(key) else {
            return Ok(Verdict::Unthrottled);
        };

        let _guard = self.locks.lock(key);
        let now = self.clock.now_millis();
        let mut bucket = match self.store.get(key).map_err(|err| storage_fault(key, err))? {
            Some(bucket) => bucket,
            None => limits.fresh_bucket(now)?,
        };

        if bucket.has_tokens_at(1, now) { Ok(Verdict::Allowed) } else { Ok(Verdict::Limited) }
    }

    /// Judged from the stored bucket, whose parameters may predate the current config
    fn can_recover(&self, key: &str) -> Result<bool> {
        let Resolution::Limited(limits) = self.resolve(key) else {
            return Ok(true);
        };

        let _guard = self.locks.lock(key);
        let bucket = match self.store.get(key).map_err(|err| storage_fault(key, err))? {
            Some(bucket) => bucket,
            None => limits.fresh_bucket(self.clock.now_millis())?,
        };

        Ok(bucket.can_ever_hold(1))
    }
}

fn storage_fault(key: &str, err: StoreError) -> ThrottleError {
    warn!(key, error = %err, "token store failed");
    ThrottleError::Storage(err)
}

/// Builder for configuring a [`ThrottleManager`]
pub struct ThrottleManagerBuilder {
    config: ThrottleConfig,
    store: Option<Arc<dyn TokenStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ThrottleManagerBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::from_config(ThrottleConfig::default())
    }

    /// Start from a declarative config
    pub fn from_config(config: ThrottleConfig) -> Self {
        Self { config, store: None, clock: None }
    }

    /// Set the default number of tokens granted per window
    pub fn rate(mut self, rate: impl Into<Numeric>) -> Self {
        self.config.rate = Some(rate.into());
        self
    }

    /// Set the default bucket capacity
    pub fn burst(mut self, burst: impl Into<Numeric>) -> Self {
        self.config.burst = Some(burst.into());
        self
    }

    /// Set the default fill window
    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = Some(duration_to_millis(window).into());
        self
    }

    /// Replace the default rate and burst for one key
    pub fn override_key(mut self, key: impl Into<String>, limits: OverrideConfig) -> Self {
        self.config.overrides.insert(key.into(), limits);
        self
    }

    /// Keep buckets in `store` instead of a private in-memory map
    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `clock` for refill timing
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and build the throttle
    pub fn build(self) -> Result<ThrottleManager> {
        let config = self.config;

        let rate = parse_rate("rate", config.rate.as_ref().ok_or(ThrottleError::MissingRate)?)?;
        let burst = config.burst.as_ref().map(|b| parse_rate("burst", b)).transpose()?.unwrap_or(rate);
        let window_ms = config.window.as_ref().map(parse_window).transpose()?.unwrap_or(DEFAULT_WINDOW_MS);

        let mut overrides = RapidHashMap::default();
        for (key, entry) in &config.overrides {
            let rate = parse_rate("override rate", entry.rate.as_ref().ok_or(ThrottleError::MissingRate)?)?;
            let burst = entry.burst.as_ref().map(|b| parse_rate("override burst", b)).transpose()?.unwrap_or(rate);
            overrides.insert(key.clone(), Override { rate, burst });
        }

        let store = match (self.store, config.tokens_table.as_deref()) {
            (Some(store), _) => store,
            (None, None | Some(MEMORY_STORAGE)) => Arc::new(MemoryStore::new()) as Arc<dyn TokenStore>,
            (None, Some(other)) => return Err(ThrottleError::InvalidStorage(other.to_string())),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        info!(rate, burst, window_ms, overrides = overrides.len(), "throttle configured");

        Ok(ThrottleManager { defaults: Limits { rate, burst, window_ms }, overrides, store, clock, locks: KeyLocks::new(LOCK_STRIPES) })
    }
}

impl Default for ThrottleManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::Result;

/// Longest pause between retries while waiting for a token
const MAX_BACKOFF_MICROS: u64 = 10_000;

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// A token was available (and, for a consuming check, taken)
    Allowed,

    /// The key has exhausted its tokens; reject the action
    Limited,

    /// No rate limiting is configured for the key
    Unthrottled,
}

impl Verdict {
    /// Three-valued view: `Some(false)` allowed, `Some(true)` limited, `None` when limiting does not apply
    pub fn limited(self) -> Option<bool> {
        match self {
            Verdict::Allowed => Some(false),
            Verdict::Limited => Some(true),
            Verdict::Unthrottled => None,
        }
    }

    /// Whether the caller may go ahead with the action
    pub fn is_permitted(self) -> bool {
        !matches!(self, Verdict::Limited)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Allowed => write!(f, "allowed"),
            Verdict::Limited => write!(f, "limited"),
            Verdict::Unthrottled => write!(f, "unthrottled"),
        }
    }
}

/// Per-key admission control
pub trait RateLimiter: Send + Sync {
    /// Consume one token for `key` if one is available
    fn rate_limit(&self, key: &str) -> Result<Verdict>;

    /// Report what [`RateLimiter::rate_limit`] would decide, without consuming
    fn peek_rate_limit(&self, key: &str) -> Result<Verdict>;

    /// Whether a limited `key` can ever be granted a token without an external reset
    fn can_recover(&self, _key: &str) -> Result<bool> {
        Ok(true)
    }

    /// Wait until a token for `key` can be consumed
    ///
    /// Returns immediately for unthrottled keys. Returns `Limited` as soon as
    /// the key can no longer recover. Storage faults end the wait.
    fn acquire<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Result<Verdict>> + Send + 'a>> {
        Box::pin(async move {
            let mut backoff_micros = 1;

            loop {
                match self.rate_limit(key)? {
                    Verdict::Limited => {
                        if !self.can_recover(key)? {
                            return Ok(Verdict::Limited);
                        }
                        tokio::time::sleep(Duration::from_micros(backoff_micros)).await;
                        backoff_micros = (backoff_micros * 2).min(MAX_BACKOFF_MICROS);
                    }
                    verdict => return Ok(verdict),
                }
            }
        })
    }
}

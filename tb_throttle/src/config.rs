//! Declarative throttle configuration
//!
//! Every numeric field accepts either a number or a numeric-looking string, so
//! configs produced by loosely typed sources (environment variables, query
//! strings, hand-written JSON) deserialize without a separate cleanup pass.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::error::ThrottleError;

/// Default fill window in milliseconds
pub const DEFAULT_WINDOW_MS: f64 = 1000.0;

/// Name of the built-in in-memory storage backend
pub const MEMORY_STORAGE: &str = "memory";

/// A number, or a string that should parse as one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    /// The finite value this input denotes, if any
    pub fn to_f64(&self) -> Option<f64> {
        let value = match self {
            Numeric::Number(n) => *n,
            Numeric::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Numeric::Number(n) => write!(f, "{n}"),
            Numeric::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for Numeric {
    fn from(value: f64) -> Self {
        Numeric::Number(value)
    }
}

impl From<u32> for Numeric {
    fn from(value: u32) -> Self {
        Numeric::Number(value as f64)
    }
}

impl From<i32> for Numeric {
    fn from(value: i32) -> Self {
        Numeric::Number(value as f64)
    }
}

impl From<&str> for Numeric {
    fn from(value: &str) -> Self {
        Numeric::Text(value.to_string())
    }
}

/// Per-key replacement for the default rate and burst
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideConfig {
    pub rate: Option<Numeric>,
    /// Defaults to this override's `rate`
    pub burst: Option<Numeric>,
}

impl OverrideConfig {
    pub fn new(rate: impl Into<Numeric>) -> Self {
        Self { rate: Some(rate.into()), burst: None }
    }

    pub fn with_burst(mut self, burst: impl Into<Numeric>) -> Self {
        self.burst = Some(burst.into());
        self
    }
}

/// Configuration for a [`ThrottleManager`](crate::ThrottleManager)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThrottleConfig {
    /// Tokens granted per window to keys without an override (required)
    pub rate: Option<Numeric>,

    /// Bucket capacity, defaults to `rate`
    pub burst: Option<Numeric>,

    /// Fill window in milliseconds, defaults to 1000
    pub window: Option<Numeric>,

    /// Exact-match per-key overrides
    pub overrides: HashMap<String, OverrideConfig>,

    /// Named storage backend, defaults to `"memory"`
    #[serde(alias = "tokens_table", alias = "storage")]
    pub tokens_table: Option<String>,
}

/// Parse a rate or burst, which must be finite and non-negative
pub(crate) fn parse_rate(field: &'static str, value: &Numeric) -> Result<f64> {
    match value.to_f64() {
        Some(v) if v >= 0.0 => Ok(v),
        _ => Err(ThrottleError::invalid_rate(field, value)),
    }
}

/// Parse a fill window, which must be finite and strictly positive
pub(crate) fn parse_window(value: &Numeric) -> Result<f64> {
    match value.to_f64() {
        Some(v) if v > 0.0 => Ok(v),
        _ => Err(ThrottleError::invalid_config("window", value)),
    }
}

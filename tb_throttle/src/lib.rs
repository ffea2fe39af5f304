//! # tb_throttle
//!
//! Per-key token bucket rate limiting for admission control

pub mod config;
pub mod error;
pub mod limiter;
pub mod manager;
pub mod store;
pub mod time;
pub mod token_bucket;

pub use config::Numeric;
pub use config::OverrideConfig;
pub use config::ThrottleConfig;
pub use error::Result;
pub use error::ThrottleError;
pub use limiter::RateLimiter;
pub use limiter::Verdict;
pub use manager::Limits;
pub use manager::Resolution;
pub use manager::ThrottleManager;
pub use manager::ThrottleManagerBuilder;
pub use store::MemoryStore;
pub use store::StoreError;
pub use store::TokenStore;
pub use time::Clock;
pub use time::ManualClock;
pub use time::SystemClock;
pub use token_bucket::BucketConfig;
pub use token_bucket::TokenBucket;

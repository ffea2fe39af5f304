//! Storage capability for per-key bucket state

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

use crate::token_bucket::TokenBucket;

/// Fault raised by a storage backend
#[derive(Error, Debug)]
#[error("{0}")]
pub struct StoreError(Box<dyn std::error::Error + Send + Sync>);

impl StoreError {
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(err.into())
    }
}

/// Where a throttle keeps its buckets
///
/// Implementations may be in-memory, remote, or externally synchronised.
/// Eviction and retries are the store's business; the throttle only reads
/// and writes whole buckets by key.
pub trait TokenStore: Send + Sync {
    /// Fetch the bucket stored under `key`
    fn get(&self, key: &str) -> Result<Option<TokenBucket>, StoreError>;

    /// Replace the bucket stored under `key`
    fn put(&self, key: &str, bucket: TokenBucket) -> Result<(), StoreError>;

    /// Read-modify-write a single key and return the bucket that was stored
    ///
    /// The default performs `get`, `apply`, `put` with no atomicity of its
    /// own. Stores shared between several throttles should override this
    /// with an atomic equivalent.
    fn update(&self, key: &str, apply: &mut dyn FnMut(Option<TokenBucket>) -> TokenBucket) -> Result<TokenBucket, StoreError> {
        let bucket = apply(self.get(key)?);
        self.put(key, bucket)?;
        Ok(bucket)
    }
}

/// Unbounded in-memory store with no eviction
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: DashMap<String, TokenBucket>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { buckets: DashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl TokenStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<TokenBucket>, StoreError> {
        Ok(self.buckets.get(key).map(|bucket| *bucket))
    }

    fn put(&self, key: &str, bucket: TokenBucket) -> Result<(), StoreError> {
        self.buckets.insert(key.to_string(), bucket);
        Ok(())
    }

    /// Runs `apply` while holding the key's shard lock
    fn update(&self, key: &str, apply: &mut dyn FnMut(Option<TokenBucket>) -> TokenBucket) -> Result<TokenBucket, StoreError> {
        // Fast path avoids allocating the key for buckets that already exist
        if let Some(mut existing) = self.buckets.get_mut(key) {
            let bucket = apply(Some(*existing));
            *existing = bucket;
            return Ok(bucket);
        }

        let bucket = match self.buckets.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let bucket = apply(Some(*occupied.get()));
                occupied.insert(bucket);
                bucket
            }
            Entry::Vacant(vacant) => {
                let bucket = apply(None);
                vacant.insert(bucket);
                bucket
            }
        };

        Ok(bucket)
    }
}

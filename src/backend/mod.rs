use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{clock::Timestamp, entry::Entry, Result};

pub mod file;
pub mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

/// What a backend declares about its TTL support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Resolution of the backend's expiry checks. Deadlines may be observed
    /// up to this much late, never early.
    pub ttl_precision: Duration,
    /// Whether `ttl`/`expire`/`persist` are available at all.
    pub can_query_ttl: bool,
}

impl Capabilities {
    pub const fn new(ttl_precision: Duration, can_query_ttl: bool) -> Self {
        Self {
            ttl_precision,
            can_query_ttl,
        }
    }

    pub fn with_precision(mut self, ttl_precision: Duration) -> Self {
        self.ttl_precision = ttl_precision;
        self
    }

    pub fn with_ttl_queries(mut self, can_query_ttl: bool) -> Self {
        self.can_query_ttl = can_query_ttl;
        self
    }
}

/// Storage port underneath the TTL engine.
///
/// Backends store whole [`Entry`] records. The conditional operations take
/// the caller's `now` so the expiry check and the mutation happen under the
/// same per-key guard; a concurrent `store` can never be undone by a stale
/// expiry decision.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Returns the raw entry, expired or not.
    async fn load(&self, key: &str) -> Result<Option<Entry>>;

    /// Inserts or replaces the entry for `key`.
    async fn store(&self, key: String, entry: Entry) -> Result<()>;

    /// Removes `key`. Returns true if an entry was present.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Removes `key` only if its entry is expired at `now`.
    async fn remove_if_expired(&self, key: &str, now: Timestamp) -> Result<bool>;

    /// Replaces the deadline of a live entry, leaving its value untouched.
    /// Returns false if the key is missing or expired at `now`.
    async fn update_expiry(
        &self,
        key: &str,
        now: Timestamp,
        expires_at: Option<Timestamp>,
    ) -> Result<bool>;

    /// Drops every entry expired at `now`, returning how many were removed.
    async fn evict_expired(&self, now: Timestamp) -> Result<usize>;
}

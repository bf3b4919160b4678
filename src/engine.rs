//! TTL expiration engine.
//!
//! Layers expiration semantics over a [`Backend`]:
//!
//! - a key is `Absent`, `Active` without a deadline, or `Active` with one;
//! - an entry whose deadline has passed is `Expired`, which every read treats
//!   exactly like `Absent`, evicting it lazily on the way;
//! - `set` without a TTL clears any previous deadline, `expire` and `persist`
//!   change the deadline without touching the value.
//!
//! Deadlines are computed from the exact write time. Expiry is judged on a
//! [`PrecisionClock`] reading floored to the backend's declared resolution,
//! so an entry counts as expired once that reading reaches its deadline: a
//! `ttl` query made before the deadline always sees a positive remaining time
//! no larger than the TTL that was set, and one made a full precision step
//! after it always fails with `NotFound`.

use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use tracing::debug;

use crate::{
    backend::{Backend, Capabilities},
    clock::{duration_millis, Clock, PrecisionClock, SystemClock, Timestamp},
    entry::{Entry, EntryState},
    Error, Result,
};

/// Options accepted by [`TtlEngine::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
}

impl SetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

#[derive(Clone)]
pub struct TtlEngine {
    backend: Arc<dyn Backend>,
    clock: PrecisionClock,
    capabilities: Capabilities,
}

/// Non-owning handle to an engine, for background tasks.
#[derive(Clone)]
pub(crate) struct WeakTtlEngine {
    backend: Weak<dyn Backend>,
    clock: PrecisionClock,
    capabilities: Capabilities,
}

impl WeakTtlEngine {
    pub(crate) fn upgrade(&self) -> Option<TtlEngine> {
        self.backend.upgrade().map(|backend| TtlEngine {
            backend,
            clock: self.clock.clone(),
            capabilities: self.capabilities,
        })
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("key must not be empty".into()));
    }
    Ok(())
}

fn validate_ttl(ttl: Duration) -> Result<()> {
    if duration_millis(ttl) == 0 {
        return Err(Error::InvalidArgument(format!(
            "ttl must be at least 1ms, got {:?}",
            ttl
        )));
    }
    Ok(())
}

impl TtlEngine {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
        let capabilities = backend.capabilities();
        Self {
            clock: PrecisionClock::new(clock, capabilities.ttl_precision),
            backend,
            capabilities,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Current time at the backend's precision.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// One clock read: the exact instant, and the same instant floored to
    /// the backend's precision for expiry checks.
    fn readings(&self) -> (Timestamp, Timestamp) {
        let exact = self.clock.exact();
        (exact, exact.floor_to(self.clock.precision()))
    }

    pub(crate) fn downgrade(&self) -> WeakTtlEngine {
        WeakTtlEngine {
            backend: Arc::downgrade(&self.backend),
            clock: self.clock.clone(),
            capabilities: self.capabilities,
        }
    }

    fn require_ttl_queries(&self, op: &'static str) -> Result<()> {
        if !self.capabilities.can_query_ttl {
            return Err(Error::Unsupported(op));
        }
        Ok(())
    }

    /// Lazily drops an entry observed as expired. A concurrent `set` that
    /// replaced it in the meantime is left alone.
    async fn evict(&self, key: &str, now: Timestamp) -> Result<()> {
        if self.backend.remove_if_expired(key, now).await? {
            debug!("Evicted expired key {:?} at {}", key, now);
        }
        Ok(())
    }

    /// Loads the entry for `key` unless it is missing or expired.
    async fn load_live(&self, key: &str, now: Timestamp) -> Result<Option<Entry>> {
        match self.backend.load(key).await? {
            Some(entry) if entry.is_expired_at(now) => {
                self.evict(key, now).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Stores `value` under `key`. With `options.ttl` the entry expires that
    /// long from now; without it the entry never expires, replacing any
    /// deadline a previous write had set.
    pub async fn set(
        &self,
        key: &str,
        value: impl Into<Vec<u8>>,
        options: SetOptions,
    ) -> Result<()> {
        validate_key(key)?;
        if let Some(ttl) = options.ttl {
            validate_ttl(ttl)?;
        }

        let entry = Entry::new(value.into(), self.clock.exact(), options.ttl);
        debug!(
            "Set {:?} expires_at={:?}",
            key,
            entry.expires_at.map(Timestamp::as_millis)
        );
        self.backend.store(key.to_string(), entry).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        Ok(self.load_live(key, now).await?.map(|entry| entry.value))
    }

    /// Removes `key`. Returns false if it was missing or already expired.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        match self.backend.load(key).await? {
            Some(entry) if entry.is_expired_at(now) => {
                self.evict(key, now).await?;
                Ok(false)
            }
            Some(_) => self.backend.remove(key).await,
            None => Ok(false),
        }
    }

    /// Remaining lifetime of `key`.
    ///
    /// `Ok(Some(d))` with `d > 0` for a key with a deadline, `Ok(None)` for a
    /// key that never expires, `Err(NotFound)` for a missing or expired key.
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.require_ttl_queries("ttl")?;

        let (exact, reading) = self.readings();
        let entry = self
            .backend
            .load(key)
            .await?
            .ok_or_else(|| Error::not_found(key))?;

        match entry.state_at(exact, self.clock.precision()) {
            EntryState::Persistent => Ok(None),
            EntryState::Expiring(left) => Ok(Some(left)),
            EntryState::Expired => {
                self.evict(key, reading).await?;
                Err(Error::not_found(key))
            }
        }
    }

    /// Gives an existing key a new deadline `ttl` from now, keeping its value.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.require_ttl_queries("expire")?;
        validate_ttl(ttl)?;

        let (exact, reading) = self.readings();
        self.update_deadline(key, reading, Some(exact.saturating_add(ttl)))
            .await
    }

    /// Removes the deadline of an existing key, keeping its value.
    pub async fn persist(&self, key: &str) -> Result<()> {
        self.require_ttl_queries("persist")?;

        let now = self.clock.now();
        self.update_deadline(key, now, None).await
    }

    async fn update_deadline(
        &self,
        key: &str,
        now: Timestamp,
        expires_at: Option<Timestamp>,
    ) -> Result<()> {
        if self.backend.update_expiry(key, now, expires_at).await? {
            debug!(
                "Deadline of {:?} now {:?}",
                key,
                expires_at.map(Timestamp::as_millis)
            );
            return Ok(());
        }

        // Missing or expired. Clear out the expired case so it stops taking space.
        self.evict(key, now).await?;
        Err(Error::not_found(key))
    }

    /// Proactively drops every expired entry. Returns the number removed.
    pub async fn evict_expired(&self) -> Result<usize> {
        self.backend.evict_expired(self.clock.now()).await
    }
}

impl fmt::Debug for TtlEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlEngine")
            .field("backend", &self.backend.name())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

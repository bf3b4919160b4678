use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// Absolute point in time, in milliseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    pub const fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration_millis(d)))
    }

    /// Time left until `later`, or `None` if `later` is not strictly after `self`.
    pub fn until(self, later: Timestamp) -> Option<Duration> {
        later
            .0
            .checked_sub(self.0)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Rounds down to a multiple of `precision`.
    pub fn floor_to(self, precision: Duration) -> Self {
        let step = duration_millis(precision).max(1);
        Timestamp(self.0 - self.0 % step)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

pub(crate) fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration_millis(since_epoch))
    }
}

/// Clock that only moves when told to. Used to drive expiry deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start.as_millis()),
        }
    }

    pub fn advance(&self, d: Duration) {
        self.now.fetch_add(duration_millis(d), Ordering::SeqCst);
    }

    pub fn set(&self, t: Timestamp) {
        self.now.store(t.as_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::SeqCst))
    }
}

/// Reads an inner clock at a backend's declared resolution.
///
/// [`Clock::now`] is floored to the precision step, so it never runs ahead of
/// real time and lags it by less than one step. Expiry checks use it, which
/// keeps a key alive for less than one step past its deadline and never
/// kills it early. Deadlines themselves are computed from [`exact`], the
/// unrounded reading.
///
/// [`exact`]: PrecisionClock::exact
#[derive(Clone)]
pub struct PrecisionClock {
    inner: Arc<dyn Clock>,
    precision: Duration,
}

impl PrecisionClock {
    pub fn new(inner: Arc<dyn Clock>, precision: Duration) -> Self {
        Self {
            inner,
            precision: precision.max(Duration::from_millis(1)),
        }
    }

    pub fn precision(&self) -> Duration {
        self.precision
    }

    /// The inner clock's reading, not rounded.
    pub fn exact(&self) -> Timestamp {
        self.inner.now()
    }
}

impl Clock for PrecisionClock {
    fn now(&self) -> Timestamp {
        self.inner.now().floor_to(self.precision)
    }
}

impl fmt::Debug for PrecisionClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrecisionClock")
            .field("precision", &self.precision)
            .finish()
    }
}

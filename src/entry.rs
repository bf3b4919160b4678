use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// A stored value together with its expiration deadline.
///
/// `value` and `expires_at` are always written together; backends store and
/// replace whole entries so neither can be observed without the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub value: Vec<u8>,
    pub written_at: Timestamp,
    pub expires_at: Option<Timestamp>,
}

/// Where an entry sits in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Present with no deadline.
    Persistent,
    /// Present, expires after the given duration.
    Expiring(Duration),
    /// Deadline reached; reads must treat the key as absent.
    Expired,
}

impl Entry {
    pub fn new(value: Vec<u8>, written_at: Timestamp, ttl: Option<Duration>) -> Self {
        Self {
            value,
            written_at,
            expires_at: ttl.map(|ttl| written_at.saturating_add(ttl)),
        }
    }

    /// `reading` is a clock reading floored to the backend's precision, so
    /// the entry is reported expired no earlier than its deadline and less
    /// than one precision step after it.
    pub fn is_expired_at(&self, reading: Timestamp) -> bool {
        matches!(self.expires_at, Some(deadline) if reading >= deadline)
    }

    /// State at the unrounded instant `now`, judged at `precision`.
    ///
    /// Inside the grace window between the deadline and the next precision
    /// step the entry is still present and reports the smallest remaining
    /// time, 1ms. The remaining time never exceeds the span from the last
    /// write to the deadline.
    pub fn state_at(&self, now: Timestamp, precision: Duration) -> EntryState {
        let Some(deadline) = self.expires_at else {
            return EntryState::Persistent;
        };
        if self.is_expired_at(now.floor_to(precision)) {
            return EntryState::Expired;
        }

        let left = now.until(deadline).unwrap_or(Duration::from_millis(1));
        let lifetime = self.written_at.until(deadline).unwrap_or(left);
        EntryState::Expiring(left.min(lifetime).max(Duration::from_millis(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn entry_without_ttl_never_expires() {
        let entry = Entry::new(b"v".to_vec(), at(100), None);
        assert_eq!(entry.expires_at, None);
        assert!(!entry.is_expired_at(at(u64::MAX)));
        assert_eq!(entry.state_at(at(u64::MAX), MS), EntryState::Persistent);
    }

    #[test]
    fn deadline_is_write_time_plus_ttl() {
        let entry = Entry::new(b"v".to_vec(), at(100), Some(Duration::from_millis(50)));
        assert_eq!(entry.expires_at, Some(at(150)));
        assert_eq!(
            entry.state_at(at(120), MS),
            EntryState::Expiring(Duration::from_millis(30))
        );
        assert!(!entry.is_expired_at(at(149)));
        assert!(entry.is_expired_at(at(150)));
        assert_eq!(entry.state_at(at(150), MS), EntryState::Expired);
    }

    #[test]
    fn coarse_precision_expires_late_never_early() {
        let second = Duration::from_secs(1);
        let entry = Entry::new(b"v".to_vec(), at(10_999), Some(Duration::from_millis(1_500)));
        assert_eq!(entry.expires_at, Some(at(12_499)));

        assert_eq!(
            entry.state_at(at(11_000), second),
            EntryState::Expiring(Duration::from_millis(1_499))
        );
        assert_eq!(
            entry.state_at(at(12_498), second),
            EntryState::Expiring(Duration::from_millis(1))
        );
        // Past the deadline, inside the same precision step.
        assert_eq!(
            entry.state_at(at(12_999), second),
            EntryState::Expiring(Duration::from_millis(1))
        );
        assert_eq!(entry.state_at(at(13_000), second), EntryState::Expired);
    }

    #[test]
    fn remaining_is_capped_by_lifetime_when_clock_steps_back() {
        let entry = Entry::new(b"v".to_vec(), at(1_000), Some(Duration::from_millis(100)));
        assert_eq!(
            entry.state_at(at(900), MS),
            EntryState::Expiring(Duration::from_millis(100))
        );
    }
}

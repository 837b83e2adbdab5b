//! Fixed-minimum-interval throttling limiter.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::{AdmissionPolicy, Decision, PolicyKind};
use super::clock::{Clock, MonotonicClock};

/// Admits a request only if at least `min_interval` has passed since the
/// identity's previous admission.
///
/// Only the last admission time is kept per identity. Entries are overwritten
/// on every admission and are never evicted implicitly, so memory grows with
/// the number of distinct identities seen. Long-running callers should invoke
/// [`purge_expired`](Self::purge_expired) periodically; it only removes
/// entries whose interval has already elapsed, which is indistinguishable from
/// never having seen the identity.
pub struct IntervalThrottleLimiter<C: Clock = MonotonicClock> {
    min_interval: Duration,
    last_seen: DashMap<String, Duration>,
    clock: C,
}

impl IntervalThrottleLimiter<MonotonicClock> {
    /// Create a limiter on a monotonic clock.
    ///
    /// A zero interval admits every request.
    pub fn new(min_interval: Duration) -> Self {
        Self::with_clock(min_interval, MonotonicClock::new())
    }
}

impl<C: Clock> IntervalThrottleLimiter<C> {
    /// Create a limiter reading time from `clock`.
    pub fn with_clock(min_interval: Duration, clock: C) -> Self {
        Self {
            min_interval,
            last_seen: DashMap::new(),
            clock,
        }
    }

    /// Get the minimum spacing between admissions.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Whether `user_id` would be admitted now.
    pub fn can_send(&self, user_id: &str) -> bool {
        self.peek(user_id).allowed
    }

    /// Admit and record a request from `user_id` if the interval has passed.
    pub fn record(&self, user_id: &str) -> bool {
        self.decide(user_id).allowed
    }

    /// Time until `user_id` would be admitted.
    pub fn time_until_next_allowed(&self, user_id: &str) -> Duration {
        self.peek(user_id).retry_after
    }

    /// What [`decide`](Self::decide) would return now, without committing.
    pub fn peek(&self, user_id: &str) -> Decision {
        let now = self.clock.now();
        match self.last_seen.get(user_id) {
            Some(last) => Decision {
                allowed: self.has_elapsed(*last, now),
                retry_after: self.remaining(*last, now),
            },
            None => Decision {
                allowed: true,
                retry_after: Duration::ZERO,
            },
        }
    }

    /// Record a request and report the resulting wait in one step.
    pub fn decide(&self, user_id: &str) -> Decision {
        let now = self.clock.now();

        let (allowed, last) = match self.last_seen.entry(user_id.to_owned()) {
            Entry::Occupied(mut entry) => {
                if self.has_elapsed(*entry.get(), now) {
                    entry.insert(now);
                    (true, now)
                } else {
                    (false, *entry.get())
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                (true, now)
            }
        };
        let retry_after = self.remaining(last, now);

        trace!(user_id = %user_id, allowed = allowed, "Throttle decision");

        if !allowed {
            debug!(
                user_id = %user_id,
                retry_after_ms = retry_after.as_millis() as u64,
                "Throttle interval not yet elapsed"
            );
        }

        Decision {
            allowed,
            retry_after,
        }
    }

    /// Drop identities whose interval has elapsed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.last_seen.retain(|_, last| {
            if self.has_elapsed(*last, now) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Number of identities with a recorded admission.
    pub fn tracked_users(&self) -> usize {
        self.last_seen.len()
    }

    fn has_elapsed(&self, last: Duration, now: Duration) -> bool {
        now.saturating_sub(last) >= self.min_interval
    }

    fn remaining(&self, last: Duration, now: Duration) -> Duration {
        self.min_interval.saturating_sub(now.saturating_sub(last))
    }
}

impl<C: Clock> AdmissionPolicy for IntervalThrottleLimiter<C> {
    fn kind(&self) -> PolicyKind {
        PolicyKind::IntervalThrottle
    }

    fn can_send(&self, user_id: &str) -> bool {
        self.can_send(user_id)
    }

    fn record(&self, user_id: &str) -> bool {
        self.record(user_id)
    }

    fn time_until_next_allowed(&self, user_id: &str) -> Duration {
        self.time_until_next_allowed(user_id)
    }

    fn decide(&self, user_id: &str) -> Decision {
        self.decide(user_id)
    }

    fn peek(&self, user_id: &str) -> Decision {
        self.peek(user_id)
    }

    fn purge_expired(&self) -> usize {
        self.purge_expired()
    }

    fn tracked_users(&self) -> usize {
        self.tracked_users()
    }
}

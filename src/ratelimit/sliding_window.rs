//! Sliding-window admission limiter.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::{AdmissionPolicy, Decision, PolicyKind};
use super::clock::{Clock, MonotonicClock};
use crate::error::{Result, TurnstileError};

/// Admits at most `max_requests` requests per identity within any trailing
/// window of length `window_size`.
///
/// Each identity owns a queue of admission timestamps in ascending order.
/// Every operation first evicts timestamps at or before `now - window_size`
/// from the front of the queue, and an identity whose queue drains is removed
/// from the map entirely.
///
/// The map is sharded; each identity's check-then-append runs under its
/// shard's lock, so concurrent `record` calls for one identity never admit
/// more than the window allows.
pub struct SlidingWindowLimiter<C: Clock = MonotonicClock> {
    /// Length of the trailing window
    window_size: Duration,
    /// Admissions allowed within one window
    max_requests: usize,
    /// Admission timestamps per identity, oldest first
    windows: DashMap<String, VecDeque<Duration>>,
    clock: C,
}

impl SlidingWindowLimiter<MonotonicClock> {
    /// Create a limiter on a monotonic clock.
    pub fn new(window_size: Duration, max_requests: usize) -> Result<Self> {
        Self::with_clock(window_size, max_requests, MonotonicClock::new())
    }
}

impl<C: Clock> SlidingWindowLimiter<C> {
    /// Create a limiter reading time from `clock`.
    ///
    /// Fails with [`TurnstileError::InvalidConfiguration`] when `window_size`
    /// or `max_requests` is zero.
    pub fn with_clock(window_size: Duration, max_requests: usize, clock: C) -> Result<Self> {
        if window_size.is_zero() {
            return Err(TurnstileError::InvalidConfiguration(
                "window_size must be greater than zero".to_string(),
            ));
        }
        if max_requests == 0 {
            return Err(TurnstileError::InvalidConfiguration(
                "max_requests must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            window_size,
            max_requests,
            windows: DashMap::new(),
            clock,
        })
    }

    /// Get the window length.
    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    /// Get the number of admissions allowed per window.
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Whether `user_id` would be admitted now.
    pub fn can_send(&self, user_id: &str) -> bool {
        self.peek(user_id).allowed
    }

    /// Admit and record a request from `user_id` if the window has room.
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
        self.with_pruned(user_id, now, |window| match window {
            Some(w) => Decision {
                allowed: w.len() < self.max_requests,
                retry_after: self.wait_for(w, now),
            },
            None => Decision {
                allowed: true,
                retry_after: Duration::ZERO,
            },
        })
    }

    /// Record a request and report the resulting wait in one step.
    pub fn decide(&self, user_id: &str) -> Decision {
        let now = self.clock.now();
        let mut window = self.windows.entry(user_id.to_owned()).or_default();
        prune(&mut window, now, self.window_size);

        let allowed = window.len() < self.max_requests;
        if allowed {
            window.push_back(now);
        }
        let retry_after = self.wait_for(&window, now);

        trace!(
            user_id = %user_id,
            allowed = allowed,
            occupancy = window.len(),
            "Sliding window decision"
        );

        if !allowed {
            debug!(
                user_id = %user_id,
                retry_after_ms = retry_after.as_millis() as u64,
                "Sliding window limit exceeded"
            );
        }

        Decision {
            allowed,
            retry_after,
        }
    }

    /// Number of admissions of `user_id` still inside the window.
    pub fn occupancy(&self, user_id: &str) -> usize {
        let now = self.clock.now();
        self.with_pruned(user_id, now, |window| window.map_or(0, VecDeque::len))
    }

    /// Evict expired timestamps for every identity.
    ///
    /// Returns the number of identities whose queue drained and were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.windows.retain(|_, window| {
            prune(window, now, self.window_size);
            if window.is_empty() {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Number of identities with admissions inside their window.
    pub fn tracked_users(&self) -> usize {
        self.windows.len()
    }

    /// Wait implied by a pruned queue.
    ///
    /// The front is always the oldest admission since appends only happen at
    /// the back.
    fn wait_for(&self, window: &VecDeque<Duration>, now: Duration) -> Duration {
        if window.len() < self.max_requests {
            return Duration::ZERO;
        }
        match window.front() {
            Some(&oldest) => self.window_size.saturating_sub(now.saturating_sub(oldest)),
            None => Duration::ZERO,
        }
    }

    /// Prune the identity's queue and hand the survivor (if any) to `f`.
    fn with_pruned<R>(
        &self,
        user_id: &str,
        now: Duration,
        f: impl FnOnce(Option<&VecDeque<Duration>>) -> R,
    ) -> R {
        let Some(mut window) = self.windows.get_mut(user_id) else {
            return f(None);
        };

        prune(&mut window, now, self.window_size);
        if !window.is_empty() {
            return f(Some(&*window));
        }

        // A concurrent record may have refilled the queue in between.
        drop(window);
        if self.windows.remove_if(user_id, |_, w| w.is_empty()).is_some() {
            trace!(user_id = %user_id, "Window drained, identity dropped");
        }
        f(None)
    }
}

/// Pop every timestamp at or before `now - window_size` off the front.
fn prune(window: &mut VecDeque<Duration>, now: Duration, window_size: Duration) {
    let Some(cutoff) = now.checked_sub(window_size) else {
        return;
    };
    while window.front().is_some_and(|&t| t <= cutoff) {
        window.pop_front();
    }
}

impl<C: Clock> AdmissionPolicy for SlidingWindowLimiter<C> {
    fn kind(&self) -> PolicyKind {
        PolicyKind::SlidingWindow
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

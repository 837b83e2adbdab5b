//! Admission policy trait shared by every limiter implementation.

use std::fmt;
use std::time::Duration;

/// Which admission strategy a limiter implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// At most N admissions within a trailing window
    SlidingWindow,
    /// A minimum spacing between consecutive admissions
    IntervalThrottle,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::SlidingWindow => write!(f, "sliding_window"),
            PolicyKind::IntervalThrottle => write!(f, "interval_throttle"),
        }
    }
}

/// Outcome of a combined record-and-query call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request was admitted and committed
    pub allowed: bool,
    /// Wait before the identity would next be admitted, measured after this
    /// decision took effect
    pub retry_after: Duration,
}

/// Trait for per-identity admission limiters.
///
/// This trait abstracts over the sliding-window and interval-throttle
/// limiters so the gRPC service and the policy registry can work with either.
/// No method blocks; callers that need backpressure poll
/// [`time_until_next_allowed`](AdmissionPolicy::time_until_next_allowed).
pub trait AdmissionPolicy: Send + Sync {
    /// The strategy this limiter implements.
    fn kind(&self) -> PolicyKind;

    /// Whether a request from `user_id` would be admitted now. Never commits.
    fn can_send(&self, user_id: &str) -> bool;

    /// Admit and commit a request from `user_id` if allowed.
    ///
    /// Rejected calls leave the identity's state untouched.
    fn record(&self, user_id: &str) -> bool;

    /// Time until `user_id` would be admitted. Zero if admissible now.
    fn time_until_next_allowed(&self, user_id: &str) -> Duration;

    /// [`record`](AdmissionPolicy::record) followed by
    /// [`time_until_next_allowed`](AdmissionPolicy::time_until_next_allowed)
    /// against a single timestamp and critical section.
    fn decide(&self, user_id: &str) -> Decision;

    /// What [`decide`](AdmissionPolicy::decide) would return now, read
    /// against a single timestamp and never committed.
    fn peek(&self, user_id: &str) -> Decision;

    /// Drop per-identity state that no longer influences any decision.
    ///
    /// Returns the number of identities removed.
    fn purge_expired(&self) -> usize;

    /// Number of identities currently holding state.
    fn tracked_users(&self) -> usize;
}

//! Admission limiters and their per-identity state.

mod backend;
mod clock;
mod policy;
mod sliding_window;
mod throttle;

pub use backend::{AdmissionPolicy, Decision, PolicyKind};
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use policy::{default_policies, ClockKind, PolicyConfig, PolicyRegistry};
pub use sliding_window::SlidingWindowLimiter;
pub use throttle::IntervalThrottleLimiter;

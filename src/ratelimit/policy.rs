//! Named admission policies and the registry that serves them.
//!
//! Policies are described in YAML as a map of name to a tagged policy
//! definition, validated into limiters, and looked up by name at request time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::AdmissionPolicy;
use super::clock::{Clock, MonotonicClock, SystemClock};
use super::sliding_window::SlidingWindowLimiter;
use super::throttle::IntervalThrottleLimiter;
use crate::error::{Result, TurnstileError};

/// Definition of a single admission policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyConfig {
    /// At most `max_requests` admissions within any trailing `window_secs`
    SlidingWindow {
        window_secs: f64,
        max_requests: usize,
    },
    /// At least `min_interval_secs` between consecutive admissions
    IntervalThrottle { min_interval_secs: f64 },
}

/// Which time source the limiters read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockKind {
    /// Monotonic process time, immune to system clock adjustment
    #[default]
    Monotonic,
    /// Wall-clock time since the UNIX epoch
    Wall,
}

impl ClockKind {
    /// Instantiate the clock.
    pub fn build(self) -> Arc<dyn Clock> {
        match self {
            ClockKind::Monotonic => Arc::new(MonotonicClock::new()),
            ClockKind::Wall => Arc::new(SystemClock),
        }
    }
}

impl PolicyConfig {
    /// Validate this definition and build the limiter it describes.
    pub fn build(&self, name: &str, clock: Arc<dyn Clock>) -> Result<Arc<dyn AdmissionPolicy>> {
        let policy: Arc<dyn AdmissionPolicy> = match *self {
            PolicyConfig::SlidingWindow {
                window_secs,
                max_requests,
            } => {
                let window = seconds(name, "window_secs", window_secs)?;
                let limiter = SlidingWindowLimiter::with_clock(window, max_requests, clock)
                    .map_err(|e| match e {
                        TurnstileError::InvalidConfiguration(msg) => {
                            TurnstileError::InvalidConfiguration(format!(
                                "policy '{}': {}",
                                name, msg
                            ))
                        }
                        other => other,
                    })?;
                Arc::new(limiter)
            }
            PolicyConfig::IntervalThrottle { min_interval_secs } => {
                let interval = seconds(name, "min_interval_secs", min_interval_secs)?;
                Arc::new(IntervalThrottleLimiter::with_clock(interval, clock))
            }
        };
        Ok(policy)
    }
}

fn seconds(name: &str, field: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| {
        TurnstileError::InvalidConfiguration(format!(
            "policy '{}': {} = {} is not a valid duration: {}",
            name, field, secs, e
        ))
    })
}

/// The policies available when none are configured: a 10 second window
/// admitting one request, and a 10 second throttle.
pub fn default_policies() -> HashMap<String, PolicyConfig> {
    HashMap::from([
        (
            "sliding_window".to_string(),
            PolicyConfig::SlidingWindow {
                window_secs: 10.0,
                max_requests: 1,
            },
        ),
        (
            "throttle".to_string(),
            PolicyConfig::IntervalThrottle {
                min_interval_secs: 10.0,
            },
        ),
    ])
}

/// Named limiters, shared by every request handler.
#[derive(Default)]
pub struct PolicyRegistry {
    policies: HashMap<String, Arc<dyn AdmissionPolicy>>,
}

impl PolicyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured policy against a shared clock.
    pub fn from_config(
        policies: &HashMap<String, PolicyConfig>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for (name, config) in policies {
            let policy = config.build(name, clock.clone())?;
            info!(policy = %name, kind = %policy.kind(), "Admission policy loaded");
            registry.insert(name.clone(), policy);
        }
        Ok(registry)
    }

    /// Register a limiter under `name`, replacing any previous one.
    pub fn insert(&mut self, name: impl Into<String>, policy: Arc<dyn AdmissionPolicy>) {
        self.policies.insert(name.into(), policy);
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn AdmissionPolicy>> {
        self.policies.get(name).cloned()
    }

    /// Registered policy names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether no policy is registered.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Run [`AdmissionPolicy::purge_expired`] on every policy.
    pub fn purge_expired(&self) -> usize {
        self.policies
            .values()
            .map(|policy| policy.purge_expired())
            .sum()
    }

    /// Periodically purge expired identity state until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let removed = self.purge_expired();
                if removed > 0 {
                    debug!(removed = removed, "Purged expired identity state");
                }
            }
        })
    }
}

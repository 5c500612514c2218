//! Per-object requeue backoff for failed reconciles
//!
//! Each object key gets its own failure count. The delay doubles per
//! consecutive failure from [`BASE_DELAY`] up to [`MAX_DELAY`], with jitter of
//! 0.5x to 1.5x so objects failing together do not retry in lockstep. A
//! successful reconcile resets the key.

use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;

/// Delay after the first failure
pub const BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on the un-jittered delay
pub const MAX_DELAY: Duration = Duration::from_secs(300);

/// Failure counts keyed by `namespace/name`
#[derive(Debug, Default)]
pub struct ReconcileBackoff {
    failures: DashMap<String, u32>,
}

impl ReconcileBackoff {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn next_delay(&self, key: &str) -> Duration {
        let attempt = {
            let mut entry = self.failures.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(base_delay(attempt).as_secs_f64() * jitter)
    }

    /// Forget failures for `key`
    pub fn reset(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Consecutive failures recorded for `key`
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map(|v| *v).unwrap_or(0)
    }
}

/// Un-jittered delay for the nth consecutive failure (1-based)
pub fn base_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    BASE_DELAY
        .saturating_mul(1u32 << exp)
        .min(MAX_DELAY)
}

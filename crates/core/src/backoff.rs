//! Exponential backoff with jitter.
//!
//! A policy is chosen per operation class at call time: short and frequent for
//! reads and lists, longer for creates and deletes, and a slow poll for values
//! the cloud publishes late (floating-IP addresses, load-balancer activation).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

/// Retry schedule for one class of operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    #[serde(rename = "initial_ms", with = "duration_ms")]
    pub initial: Duration,
    /// Multiplier applied to the delay after every retry.
    pub factor: f64,
    /// Fraction of the delay added as uniform random jitter.
    pub jitter: f64,
    /// Total number of attempts, including the first one.
    pub steps: u32,
}

impl BackoffPolicy {
    #[must_use]
    pub const fn new(initial: Duration, factor: f64, jitter: f64, steps: u32) -> Self {
        Self {
            initial,
            factor,
            jitter,
            steps,
        }
    }

    /// Profile for get and list calls.
    #[must_use]
    pub const fn read() -> Self {
        Self::new(Duration::from_secs(1), 1.5, 0.1, 4)
    }

    /// Profile for create, update, and delete calls.
    #[must_use]
    pub const fn write() -> Self {
        Self::new(Duration::from_secs(1), 1.5, 0.1, 5)
    }

    /// Profile for waiting on values the cloud publishes late.
    #[must_use]
    pub const fn poll() -> Self {
        Self::new(Duration::from_secs(1), 1.5, 0.1, 20)
    }

    /// Same schedule with a different attempt budget.
    #[must_use]
    pub const fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    /// Same schedule without jitter.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Check that the policy describes a usable schedule.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` for zero steps, a shrinking factor, or
    /// negative jitter.
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(Error::invalid_config("backoff steps must be at least 1"));
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(Error::invalid_config(format!(
                "backoff factor must be >= 1.0, got {}",
                self.factor
            )));
        }
        if !self.jitter.is_finite() || self.jitter < 0.0 {
            return Err(Error::invalid_config(format!(
                "backoff jitter must be >= 0.0, got {}",
                self.jitter
            )));
        }
        Ok(())
    }

    /// Un-jittered delay before retry number `retry` (1-indexed).
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.factor.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Delay before retry number `retry`, perturbed by `sample` in `[0, 1)`.
    ///
    /// The result lies in `[base, base + jitter * base)`.
    #[must_use]
    pub fn jittered_delay(&self, retry: u32, sample: f64) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter <= 0.0 {
            return base;
        }
        let extra = base.as_secs_f64() * self.jitter * sample.clamp(0.0, 1.0);
        base.saturating_add(Duration::try_from_secs_f64(extra).unwrap_or(Duration::ZERO))
    }

    /// Delay before retry number `retry` with a fresh random jitter sample.
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        self.jittered_delay(retry, rand::random::<f64>())
    }

    /// Upper bound on the total time spent sleeping across the schedule.
    #[must_use]
    pub fn max_total_delay(&self) -> Duration {
        (1..self.steps)
            .map(|retry| self.jittered_delay(retry, 1.0))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// The three policies the cloud facade chooses between.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffProfiles {
    pub read: BackoffPolicy,
    pub write: BackoffPolicy,
    pub poll: BackoffPolicy,
}

impl Default for BackoffProfiles {
    fn default() -> Self {
        Self {
            read: BackoffPolicy::read(),
            write: BackoffPolicy::write(),
            poll: BackoffPolicy::poll(),
        }
    }
}

impl BackoffProfiles {
    /// # Errors
    /// Returns the first invalid policy's error.
    pub fn validate(&self) -> Result<()> {
        self.read.validate()?;
        self.write.validate()?;
        self.poll.validate()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delay_grows_by_factor() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), 1.5, 0.1, 3);
        assert_eq!(policy.base_delay(0), Duration::ZERO);
        assert_eq!(policy.base_delay(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay(2), Duration::from_millis(1500));
        assert_eq!(policy.base_delay(3), Duration::from_millis(2250));
    }

    #[test]
    fn test_jitter_stays_within_fraction() {
        let policy = BackoffPolicy::new(Duration::from_secs(2), 2.0, 0.1, 5);
        assert_eq!(policy.jittered_delay(1, 0.0), Duration::from_secs(2));
        let high = policy.jittered_delay(1, 0.999);
        assert!(high >= Duration::from_secs(2));
        assert!(high < Duration::from_millis(2200));

        for _ in 0..50 {
            let delay = policy.delay(2);
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_millis(4400));
        }
    }

    #[test]
    fn test_without_jitter_is_deterministic() {
        let policy = BackoffPolicy::read().without_jitter();
        assert_eq!(policy.delay(2), policy.delay(2));
    }

    #[test]
    fn test_profiles_differ_in_budget() {
        let profiles = BackoffProfiles::default();
        assert!(profiles.read.steps < profiles.write.steps);
        assert!(profiles.write.steps < profiles.poll.steps);
        assert!(profiles.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_policies() {
        assert!(BackoffPolicy::read().with_steps(0).validate().is_err());
        assert!(
            BackoffPolicy::new(Duration::from_secs(1), 0.5, 0.1, 3)
                .validate()
                .is_err()
        );
        assert!(
            BackoffPolicy::new(Duration::from_secs(1), 1.5, -0.1, 3)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_max_total_delay_sums_every_gap() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), 2.0, 0.0, 3);
        // gaps before attempts 2 and 3: 1s + 2s
        assert_eq!(policy.max_total_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_policy_deserializes_from_toml() -> std::result::Result<(), toml::de::Error> {
        let policy: BackoffPolicy =
            toml::from_str("initial_ms = 500\nfactor = 2.0\njitter = 0.0\nsteps = 7\n")?;
        assert_eq!(policy.initial, Duration::from_millis(500));
        assert_eq!(policy.steps, 7);
        Ok(())
    }
}

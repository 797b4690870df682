//! Resilience policy per dependency.
//!
//! [`GuardConfig`] holds a default [`DependencyPolicy`] plus optional
//! per-dependency overrides. It deserializes straight from a TOML table:
//!
//! ```toml
//! [resilience.default]
//! failure_threshold = 5
//!
//! [resilience.dependencies.task_source]
//! rate_per_sec = 2.0
//! burst = 4
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::GuardConfigError;

/// Breaker and token-bucket settings for one dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyPolicy {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before admitting a trial.
    pub recovery_timeout_secs: u64,
    /// Token refill rate.
    pub rate_per_sec: f64,
    /// Token bucket capacity.
    pub burst: u32,
}

impl Default for DependencyPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            rate_per_sec: 5.0,
            burst: 10,
        }
    }
}

impl DependencyPolicy {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
        }
    }

    /// Validates this policy for the named dependency.
    ///
    /// Checks:
    /// - `failure_threshold` must be greater than 0
    /// - `burst` must be greater than 0
    /// - `rate_per_sec` must be finite and not negative
    pub fn validate(&self, dependency: &str) -> Result<(), GuardConfigError> {
        let invalid = |reason: &str| GuardConfigError::Invalid {
            dependency: dependency.to_owned(),
            reason: reason.to_owned(),
        };
        if self.failure_threshold == 0 {
            return Err(invalid("failure_threshold must be greater than 0"));
        }
        if self.burst == 0 {
            return Err(invalid("burst must be greater than 0"));
        }
        if !self.rate_per_sec.is_finite() || self.rate_per_sec < 0.0 {
            return Err(invalid("rate_per_sec must be a non-negative number"));
        }
        Ok(())
    }
}

/// Policies for every dependency the process talks to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Applied to any dependency without an explicit entry.
    pub default: DependencyPolicy,
    pub dependencies: BTreeMap<String, DependencyPolicy>,
}

impl GuardConfig {
    pub fn policy_for(&self, dependency: &str) -> &DependencyPolicy {
        self.dependencies.get(dependency).unwrap_or(&self.default)
    }

    pub fn with_policy(mut self, dependency: &str, policy: DependencyPolicy) -> Self {
        self.dependencies.insert(dependency.to_owned(), policy);
        self
    }

    pub fn validate(&self) -> Result<(), GuardConfigError> {
        self.default.validate("default")?;
        for (name, policy) in &self.dependencies {
            policy.validate(name)?;
        }
        Ok(())
    }
}

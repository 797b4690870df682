//! Process-wide registry of per-dependency guards.
//!
//! [`ResilienceManager`] owns one circuit breaker and one token bucket per
//! dependency name. It is built once at startup and shared by `Arc` across
//! every cycle; dependencies that were not configured get the default policy
//! the first time they are named.
//!
//! [`ResilienceManager::execute`] is the only way callers reach a guarded
//! dependency:
//!
//! 1. Ask the breaker for an admission (short-circuit if open).
//! 2. Take a token (release the admission if the bucket is empty).
//! 3. Run the operation.
//! 4. Feed the outcome back to the breaker.
//!
//! Locks are only held for steps 1, 2 and 4, never while the operation is
//! awaited.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;

use crate::circuit_breaker::{Admission, CircuitBreaker, CircuitState};
use crate::config::{DependencyPolicy, GuardConfig};
use crate::error::GuardError;
use crate::rate_limit::TokenBucket;

/// Breaker and bucket for one named dependency.
#[derive(Debug)]
pub struct DependencyGuard {
    name: String,
    breaker: Mutex<CircuitBreaker>,
    limiter: TokenBucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Denial {
    CircuitOpen,
    RateLimited,
}

impl DependencyGuard {
    pub fn new(name: &str, policy: &DependencyPolicy) -> Self {
        Self::new_at(name, policy, Instant::now())
    }

    pub fn new_at(name: &str, policy: &DependencyPolicy, now: Instant) -> Self {
        Self {
            name: name.to_owned(),
            breaker: Mutex::new(CircuitBreaker::new_at(policy.breaker_config(), now)),
            limiter: TokenBucket::new_at(policy.burst, policy.rate_per_sec, now),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn admit(self: &Arc<Self>, now: Instant) -> Result<Permit, Denial> {
        let admission = {
            let Ok(mut breaker) = self.breaker.lock() else {
                tracing::error!(dependency = %self.name, "breaker lock poisoned; refusing call");
                return Err(Denial::CircuitOpen);
            };
            breaker.try_admit_at(now).ok_or(Denial::CircuitOpen)?
        };

        if !self.limiter.try_acquire_at(now) {
            if let Ok(mut breaker) = self.breaker.lock() {
                breaker.release(admission);
            }
            return Err(Denial::RateLimited);
        }

        if admission == Admission::Trial {
            tracing::info!(dependency = %self.name, "admitting half-open trial call");
        }

        Ok(Permit {
            guard: Arc::clone(self),
            admission,
            resolved: false,
        })
    }

    pub fn state(&self) -> CircuitState {
        self.breaker
            .lock()
            .map(|b| b.state())
            .unwrap_or(CircuitState::Open)
    }

    pub fn snapshot_at(&self, now: Instant) -> DependencySnapshot {
        let (state, consecutive_failures) = self
            .breaker
            .lock()
            .map(|b| (b.state(), b.consecutive_failures()))
            .unwrap_or((CircuitState::Open, 0));
        DependencySnapshot {
            name: self.name.clone(),
            state,
            consecutive_failures,
            tokens_available: self.limiter.available_at(now),
            capacity: self.limiter.capacity(),
        }
    }
}

/// Admission to run one guarded operation.
///
/// Dropping an unresolved trial permit (for example when the caller's future
/// is cancelled mid-call) re-opens the breaker.
struct Permit {
    guard: Arc<DependencyGuard>,
    admission: Admission,
    resolved: bool,
}

impl Permit {
    fn succeed(mut self, now: Instant) {
        self.resolved = true;
        if let Ok(mut breaker) = self.guard.breaker.lock() {
            let before = breaker.state();
            breaker.record_success_at(self.admission, now);
            if before != breaker.state() {
                tracing::info!(dependency = %self.guard.name, "circuit closed after successful trial");
            }
        }
    }

    fn fail(mut self, now: Instant) {
        self.resolved = true;
        if let Ok(mut breaker) = self.guard.breaker.lock() {
            let before = breaker.state();
            breaker.record_failure_at(self.admission, now);
            if before != CircuitState::Open && breaker.state() == CircuitState::Open {
                tracing::warn!(
                    dependency = %self.guard.name,
                    failures = breaker.consecutive_failures(),
                    "circuit opened"
                );
            }
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.resolved || self.admission != Admission::Trial {
            return;
        }
        if let Ok(mut breaker) = self.guard.breaker.lock() {
            breaker.abandon_trial_at(Instant::now());
            tracing::warn!(dependency = %self.guard.name, "half-open trial abandoned; circuit re-opened");
        }
    }
}

/// Point-in-time view of one dependency, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DependencySnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub tokens_available: f64,
    pub capacity: u32,
}

/// Registry of dependency guards, keyed by dependency name.
#[derive(Debug)]
pub struct ResilienceManager {
    config: GuardConfig,
    guards: Mutex<HashMap<String, Arc<DependencyGuard>>>,
}

impl ResilienceManager {
    /// Build the registry, creating a guard for every configured dependency.
    pub fn new(config: GuardConfig) -> Self {
        let now = Instant::now();
        let guards = config
            .dependencies
            .iter()
            .map(|(name, policy)| (name.clone(), Arc::new(DependencyGuard::new_at(name, policy, now))))
            .collect();
        Self {
            config,
            guards: Mutex::new(guards),
        }
    }

    /// Look up (or lazily create) the guard for `dependency`.
    pub fn guard(&self, dependency: &str) -> Arc<DependencyGuard> {
        let mut guards = match self.guards.lock() {
            Ok(guards) => guards,
            Err(poisoned) => {
                tracing::error!("guard registry lock poisoned; continuing with recovered state");
                poisoned.into_inner()
            }
        };
        Arc::clone(guards.entry(dependency.to_owned()).or_insert_with(|| {
            tracing::debug!(dependency, "registering dependency with default policy");
            Arc::new(DependencyGuard::new(dependency, self.config.policy_for(dependency)))
        }))
    }

    /// Run `op` against `dependency` behind its breaker and bucket.
    ///
    /// # Errors
    ///
    /// - [`GuardError::CircuitOpen`] when the breaker refuses the call.
    /// - [`GuardError::RateLimited`] when no token is available.
    /// - [`GuardError::Failed`] when `op` itself returns an error; the failure
    ///   is counted by the breaker.
    pub async fn execute<T, E, F, Fut>(&self, dependency: &str, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let guard = self.guard(dependency);
        let permit = match guard.admit(Instant::now()) {
            Ok(permit) => permit,
            Err(Denial::CircuitOpen) => {
                tracing::debug!(dependency, "call short-circuited");
                return Err(GuardError::CircuitOpen(dependency.to_owned()));
            }
            Err(Denial::RateLimited) => {
                tracing::debug!(dependency, "call rate limited");
                return Err(GuardError::RateLimited(dependency.to_owned()));
            }
        };

        match op().await {
            Ok(value) => {
                permit.succeed(Instant::now());
                Ok(value)
            }
            Err(err) => {
                permit.fail(Instant::now());
                Err(GuardError::Failed(err))
            }
        }
    }

    pub fn state(&self, dependency: &str) -> CircuitState {
        self.guard(dependency).state()
    }

    /// Snapshot of every registered dependency, sorted by name.
    pub fn snapshot(&self) -> Vec<DependencySnapshot> {
        let now = Instant::now();
        let guards: Vec<Arc<DependencyGuard>> = match self.guards.lock() {
            Ok(guards) => guards.values().cloned().collect(),
            Err(_) => return Vec::new(),
        };
        let mut out: Vec<DependencySnapshot> = guards.iter().map(|g| g.snapshot_at(now)).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }
}

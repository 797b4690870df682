//! Circuit breaker for a single external dependency.
//!
//! Counts consecutive failures and stops calling a dependency that keeps
//! failing. After the recovery timeout, exactly one trial call is admitted;
//! its outcome decides whether the circuit closes again or re-opens.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐  N failures   ┌────────┐  recovery   ┌──────────┐
//! │ Closed ├──────────────►│  Open  ├────────────►│ HalfOpen │
//! └───▲────┘               └───▲────┘  timeout    └────┬─────┘
//!     │                        │  trial failure        │
//!     │                        └───────────────────────┤
//!     │  trial success                                 │
//!     └────────────────────────────────────────────────┘
//! ```
//!
//! While HalfOpen, every caller other than the trial is short-circuited.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy: every call is admitted.
    Closed,
    /// Tripped: calls are refused until the recovery timeout elapses.
    Open,
    /// Probing: a single trial call decides the next state.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

/// How a call was let through, which determines how its outcome is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Ordinary call while the circuit is closed.
    Normal,
    /// The single half-open probe.
    Trial,
}

/// Configuration for circuit breaker behaviour.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before tripping the circuit to Open.
    pub failure_threshold: u32,
    /// How long to stay Open before admitting a trial.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    last_transition_at: Instant,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::new_at(config, Instant::now())
    }

    pub fn new_at(config: CircuitBreakerConfig, now: Instant) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_transition_at: now,
            trial_in_flight: false,
        }
    }

    /// Decide whether a call may proceed at `now`.
    ///
    /// - [`CircuitState::Closed`]: always admitted.
    /// - [`CircuitState::Open`]: refused until `last transition + recovery
    ///   timeout`; the first caller after that moves the circuit to
    ///   [`CircuitState::HalfOpen`] and becomes the trial.
    /// - [`CircuitState::HalfOpen`]: admitted as the trial only if no other
    ///   trial is in flight.
    pub fn try_admit_at(&mut self, now: Instant) -> Option<Admission> {
        match self.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                let reopen_at = self.last_transition_at + self.config.recovery_timeout;
                if now >= reopen_at {
                    self.transition(CircuitState::HalfOpen, now);
                    self.trial_in_flight = true;
                    Some(Admission::Trial)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    None
                } else {
                    self.trial_in_flight = true;
                    Some(Admission::Trial)
                }
            }
        }
    }

    pub fn try_admit(&mut self) -> Option<Admission> {
        self.try_admit_at(Instant::now())
    }

    /// Record a successful call.
    ///
    /// A trial success closes the circuit. Any success observed while closed
    /// resets the failure counter. Late successes from calls admitted before
    /// the circuit tripped do not close it.
    pub fn record_success_at(&mut self, admission: Admission, now: Instant) {
        match admission {
            Admission::Trial => {
                self.trial_in_flight = false;
                self.consecutive_failures = 0;
                self.transition(CircuitState::Closed, now);
            }
            Admission::Normal => {
                if self.state == CircuitState::Closed {
                    self.consecutive_failures = 0;
                }
            }
        }
    }

    /// Record a failed call.
    ///
    /// A trial failure re-opens the circuit with a fresh transition time.
    /// While closed, the failure counter increments and trips the circuit
    /// once it reaches the threshold.
    pub fn record_failure_at(&mut self, admission: Admission, now: Instant) {
        match admission {
            Admission::Trial => {
                self.trial_in_flight = false;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.transition(CircuitState::Open, now);
            }
            Admission::Normal => {
                if self.state != CircuitState::Closed {
                    return;
                }
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.transition(CircuitState::Open, now);
                }
            }
        }
    }

    /// Give an admission back without an outcome (the call never ran).
    ///
    /// A released trial leaves the circuit HalfOpen so the next caller can
    /// probe instead.
    pub fn release(&mut self, admission: Admission) {
        if admission == Admission::Trial {
            self.trial_in_flight = false;
        }
    }

    /// A trial that was abandoned mid-flight counts against the dependency.
    pub fn abandon_trial_at(&mut self, now: Instant) {
        if self.state == CircuitState::HalfOpen && self.trial_in_flight {
            self.trial_in_flight = false;
            self.transition(CircuitState::Open, now);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_transition_at(&self) -> Instant {
        self.last_transition_at
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Force the circuit back to Closed with zero failures.
    pub fn reset(&mut self, now: Instant) {
        self.consecutive_failures = 0;
        self.trial_in_flight = false;
        self.transition(CircuitState::Closed, now);
    }

    fn transition(&mut self, to: CircuitState, now: Instant) {
        if self.state != to {
            tracing::debug!(from = %self.state, to = %to, "circuit transition");
        }
        self.state = to;
        self.last_transition_at = now;
    }
}

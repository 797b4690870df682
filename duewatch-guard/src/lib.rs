//! # duewatch-guard
//!
//! Resilience primitives shared by every duewatch cycle.
//!
//! ## Design
//!
//! - One circuit breaker and one token bucket per named dependency
//!   (`task_source`, `stateful_transport`, `stateless_transport`, `storage`)
//! - A single [`ResilienceManager::execute`] wrap through which all external
//!   calls pass; denials come back as [`GuardError`] values
//! - A TTL cache with least-recently-used eviction, instantiated once per
//!   data category
//! - No async runtime dependency: locks are plain `std::sync::Mutex` and are
//!   never held across an await point
//!
//! Every time-dependent operation has an `_at(Instant)` variant so behaviour
//! can be tested without sleeping.

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod manager;
pub mod rate_limit;

pub use cache::{CacheKey, CacheStats, TtlCache};
pub use circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{DependencyPolicy, GuardConfig};
pub use error::{GuardConfigError, GuardError};
pub use manager::{DependencyGuard, DependencySnapshot, ResilienceManager};
pub use rate_limit::TokenBucket;

/// Dependency names used by the notification pipeline.
pub mod deps {
    pub const TASK_SOURCE: &str = "task_source";
    pub const STATEFUL_TRANSPORT: &str = "stateful_transport";
    pub const STATELESS_TRANSPORT: &str = "stateless_transport";
    pub const STORAGE: &str = "storage";

    pub const ALL: [&str; 4] = [TASK_SOURCE, STATEFUL_TRANSPORT, STATELESS_TRANSPORT, STORAGE];
}

//! Error types for the duewatch-guard crate.
//!
//! Denials from the breaker or the token bucket are ordinary values of
//! [`GuardError`], so callers can count and log them without ever seeing a
//! panic cross the guard boundary.

/// Outcome of a guarded call that did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// The dependency's breaker is open (or a half-open trial is already in flight).
    #[error("circuit open for dependency {0}")]
    CircuitOpen(String),

    /// The dependency's token bucket is empty.
    #[error("rate limited on dependency {0}")]
    RateLimited(String),

    /// The wrapped operation ran and failed.
    #[error("{0}")]
    Failed(E),
}

impl<E> GuardError<E> {
    /// Returns `true` when the call was refused without running the operation.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::CircuitOpen(_) | Self::RateLimited(_))
    }

    /// The underlying operation error, if the operation actually ran.
    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Failed(err) => Some(err),
            Self::CircuitOpen(_) | Self::RateLimited(_) => None,
        }
    }

    /// Map the operation error while keeping denials untouched.
    pub fn map_failure<F>(self, f: impl FnOnce(E) -> F) -> GuardError<F> {
        match self {
            Self::CircuitOpen(dep) => GuardError::CircuitOpen(dep),
            Self::RateLimited(dep) => GuardError::RateLimited(dep),
            Self::Failed(err) => GuardError::Failed(f(err)),
        }
    }
}

/// Invalid resilience policy.
#[derive(Debug, thiserror::Error)]
pub enum GuardConfigError {
    #[error("invalid policy for {dependency}: {reason}")]
    Invalid { dependency: String, reason: String },
}

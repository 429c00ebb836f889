use std::time::Duration;

use peergroup_topology::TopologyError;
use thiserror::Error;

#[derive(Debug, Error)]
/// A fatal error which stops the worker.
///
/// These are surfaced to whatever supervises the worker rather than retried,
/// transient failures never reach this type.
pub enum WorkerError {
    #[error("No safe topology could be produced: {0}")]
    /// The topology computer could not find a safe topology.
    Topology(#[from] TopologyError),

    #[error("Replica set configuration could not be applied: {0}")]
    /// The store refused the configuration or returned one which cannot be understood.
    Session(SessionError),

    #[error("Worker task exited unexpectedly: {0}")]
    /// The worker task panicked or was aborted.
    Crashed(String),
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
/// An error returned by the replicated store's session.
pub enum SessionError {
    #[error("Store session is unavailable: {0}")]
    /// The session cannot currently reach the store.
    Unavailable(String),

    #[error("Store is electing a new primary.")]
    Electing,

    #[error("Store round-trip did not complete within {0:?}.")]
    Timeout(Duration),

    #[error(
        "Store reported version {version} but the members do not match the \
        written configuration."
    )]
    /// The configuration read back after a write disagreed with what was written.
    NotConfirmed { version: u64 },

    #[error("Store rejected the configuration: {0}")]
    /// The store refused a structurally well-formed configuration.
    Rejected(String),

    #[error("Store returned a configuration which cannot be read: {0}")]
    Malformed(String),
}

impl SessionError {
    /// If the operation may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_)
                | Self::Electing
                | Self::Timeout(_)
                | Self::NotConfirmed { .. }
        )
    }
}

#[derive(Debug, Error)]
#[error("Controller state is unavailable: {0}")]
/// The controller snapshot could not be taken.
///
/// The cycle is abandoned and retried on the next tick.
pub struct StateError(#[from] pub anyhow::Error);

#[derive(Debug, Clone, Eq, PartialEq, Error)]
/// The worker configuration is invalid.
pub enum ConfigError {
    #[error("The {0} port must not be zero.")]
    ZeroPort(&'static str),

    #[error("The {0} must be greater than zero.")]
    ZeroDuration(&'static str),

    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SessionError::Unavailable("connection refused".into()).is_transient());
        assert!(SessionError::Electing.is_transient());
        assert!(SessionError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(SessionError::NotConfirmed { version: 3 }.is_transient());
        assert!(!SessionError::Rejected("even voters".into()).is_transient());
        assert!(!SessionError::Malformed("bad host".into()).is_transient());
    }
}

//! Errors returned by the stage driver lifecycle.

use mscope_common::config::ConfigError;
use mscope_common::stage::bus::BusError;
use thiserror::Error;

/// Error types for `StageCore` operations.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// Bus or transport failure
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Operation requires the scheduler to be halted
    #[error("Scheduler is awake; call go_idle() first")]
    NotIdle,

    /// `init` was called twice
    #[error("Stage driver already initialized")]
    AlreadyRunning,

    /// A tick is stuck in a blocking readiness wait
    #[error("Tick still waiting for a readiness answer; try again or shut down")]
    TickInProgress,

    /// Operation requires a successful `init`
    #[error("Stage driver not initialized")]
    NotInitialized,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_lower_level_errors() {
        let err: StageError = BusError::Disconnected.into();
        assert!(matches!(err, StageError::Bus(BusError::Disconnected)));
        assert!(err.to_string().contains("disconnected"));

        let err: StageError = ConfigError::ValidationError("tick_us".into()).into();
        assert!(err.to_string().contains("tick_us"));
    }
}

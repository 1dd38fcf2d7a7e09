//! Engine error types.

use thiserror::Error;

/// Boxed error raised from a user state hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from the state machine engine.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("duplicate transition from '{from}' on event '{event}'")]
    DuplicateTransition { from: String, event: String },

    #[error("self-transition on '{state}' is disabled")]
    SelfTransition { state: String },

    #[error("machine is already awaked")]
    AlreadyAwaked,

    #[error("machine is not awaked")]
    NotAwaked,

    #[error("machine is disposed")]
    Disposed,

    #[error("no transition from '{state}' on event '{event}'")]
    NoTransition { state: String, event: String },

    #[error("{hook} hook failed: {source}")]
    Execution {
        hook: &'static str,
        #[source]
        source: HookError,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("event queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },
}

impl MachineError {
    /// Returns whether this error reports cooperative cancellation rather
    /// than a failure. Cancellations are never routed to the error handler.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MachineError::Cancelled)
    }

    /// Returns whether this error wraps a failure raised from a user hook.
    pub fn is_execution(&self) -> bool {
        matches!(self, MachineError::Execution { .. })
    }
}

/// Pluggable sink for errors raised from user state hooks.
///
/// The machine invokes the handler in addition to returning the error to the
/// caller; errors are never silently discarded.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, error: &MachineError);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_cancelled() {
        assert!(MachineError::Cancelled.is_cancelled());
        assert!(!MachineError::AlreadyAwaked.is_cancelled());
        assert!(!MachineError::Execution {
            hook: "enter",
            source: "boom".into(),
        }
        .is_cancelled());
    }

    #[test]
    fn test_execution_preserves_source() {
        let err = MachineError::Execution {
            hook: "exit",
            source: "device lost".into(),
        };
        assert!(err.is_execution());
        assert_eq!(err.to_string(), "exit hook failed: device lost");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_display_includes_keys() {
        let err = MachineError::DuplicateTransition {
            from: "\"Idle\"".to_string(),
            event: "\"Start\"".to_string(),
        };
        assert!(err.to_string().contains("Idle"));
        assert!(err.to_string().contains("Start"));
    }
}

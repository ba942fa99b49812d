//! Error types for the state database and restorable pools

/// State database errors
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The backing connector failed
    #[error("connector error: {0}")]
    Connector(String),

    /// A value could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The initial data transform failed
    #[error("state transform failed: {0}")]
    Transform(String),

    /// A stored entry does not carry the expected envelope
    #[error("malformed entry: {0}")]
    MalformedEntry(String),
}

/// Command execution errors
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// No command registered under the id
    #[error("command not found: {0}")]
    NotFound(String),

    /// The command ran and failed
    #[error("command '{command}' failed: {reason}")]
    Failed {
        /// Command id
        command: String,
        /// Failure description
        reason: String,
    },
}

impl CommandError {
    /// Create failed-command error
    pub fn failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

/// Restorable pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The object was already disposed
    #[error("object is disposed")]
    Disposed,

    /// The object is already tracked by the pool
    #[error("object is already tracked by the pool")]
    AlreadyTracked,

    /// The pool was already restored once
    #[error("pool has already been restored")]
    AlreadyRestored,

    /// The pool itself was disposed
    #[error("pool is disposed")]
    PoolDisposed,

    /// Persisting restoration data failed
    #[error("state error: {0}")]
    State(#[from] StateError),
}

/// Result type alias for state operations
pub type StateResult<T> = Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_display() {
        let err = CommandError::failed("docs:open", "missing path");
        assert_eq!(err.to_string(), "command 'docs:open' failed: missing path");
    }

    #[test]
    fn pool_error_from_state() {
        let err: PoolError = StateError::Connector("offline".to_string()).into();
        assert!(matches!(err, PoolError::State(_)));
        assert!(err.to_string().contains("offline"));
    }
}

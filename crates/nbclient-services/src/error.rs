//! Error types for the server services
//!
//! Provides error handling for:
//! - Unexpected HTTP responses and transport failures
//! - Response bodies that fail validation
//! - Contents routing (cross-drive operations, rejected deletes)
//! - Session and kernel lifecycle misuse
//! - Configuration loading

use std::path::PathBuf;

/// Errors talking to the server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The server answered with a status the operation does not expect
    #[error("{status} {message} ({url})")]
    Response {
        /// HTTP status code
        status: u16,
        /// Server-supplied message, or the canonical reason phrase
        message: String,
        /// Request URL
        url: String,
    },

    /// A response body failed structural validation
    #[error("invalid {context}: {reason}")]
    Validation {
        /// What was being validated
        context: String,
        /// Why it was rejected
        reason: String,
    },

    /// The request never produced a response
    #[error("transport error: {0}")]
    Transport(String),

    /// A URL could not be built
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// A request body could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServerError {
    /// Create validation error
    pub fn validation(context: impl Into<String>, reason: impl ToString) -> Self {
        Self::Validation {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// HTTP status, for response errors
    #[inline]
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Response { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Contents errors
#[derive(Debug, thiserror::Error)]
pub enum ContentsError {
    /// Server or transport failure
    #[error(transparent)]
    Server(#[from] ServerError),

    /// The server refused to delete the file
    #[error("delete rejected: {0}")]
    DeleteRejected(String),

    /// Source and destination live on different drives
    #[error("{operation} across drives is not supported ({from} -> {to})")]
    CrossDrive {
        /// Operation name
        operation: &'static str,
        /// Source drive
        from: String,
        /// Destination drive
        to: String,
    },
}

/// Kernel errors
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// Server or transport failure
    #[error(transparent)]
    Server(#[from] ServerError),

    /// The kernel connection is disposed
    #[error("kernel connection is disposed")]
    Disposed,
}

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Server or transport failure
    #[error(transparent)]
    Server(#[from] ServerError),

    /// The session is disposed
    #[error("session is disposed")]
    Disposed,

    /// No session matched
    #[error("no running session for {0}")]
    NotFound(String),

    /// The session's kernel was already gone
    #[error("the kernel was deleted but the session was not: {0}")]
    KernelGone(String),

    /// The session manager is disposed
    #[error("session manager is disposed")]
    ManagerDisposed,
}

impl From<KernelError> for SessionError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Server(e) => Self::Server(e),
            KernelError::Disposed => Self::Disposed,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The config file is not valid TOML for the schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The base URL is not usable
    #[error("invalid base url '{0}'")]
    InvalidUrl(String),
}

/// Result alias for server requests
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_error_display() {
        let err = ServerError::Response {
            status: 404,
            message: "No such file".to_string(),
            url: "http://localhost:8888/api/contents/a.txt".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "404 No such file (http://localhost:8888/api/contents/a.txt)"
        );
        assert_eq!(err.status(), Some(404));
    }

    #[test]
    fn kernel_error_maps_into_session_error() {
        assert!(matches!(
            SessionError::from(KernelError::Disposed),
            SessionError::Disposed
        ));
        let server = KernelError::Server(ServerError::Transport("reset".into()));
        assert!(matches!(SessionError::from(server), SessionError::Server(_)));
    }

    #[test]
    fn cross_drive_display() {
        let err = ContentsError::CrossDrive {
            operation: "rename",
            from: String::new(),
            to: "s3".to_string(),
        };
        assert!(err.to_string().starts_with("rename across drives"));
    }
}

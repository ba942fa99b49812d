//! Registry errors

/// Document registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A file type with the name is already registered
    #[error("duplicate file type: {0}")]
    DuplicateFileType(String),

    /// A widget factory with the name is already registered
    #[error("duplicate widget factory: {0}")]
    DuplicateWidgetFactory(String),

    /// A model factory with the name is already registered
    #[error("duplicate model factory: {0}")]
    DuplicateModelFactory(String),

    /// A file type pattern is not a valid regular expression
    #[error("invalid pattern for file type '{file_type}': {reason}")]
    InvalidPattern {
        /// File type carrying the pattern
        file_type: String,
        /// Regex compile error
        reason: String,
    },

    /// Empty or reserved factory name
    #[error("invalid factory name: '{0}'")]
    InvalidName(String),

    /// No file type with the name
    #[error("unknown file type: {0}")]
    UnknownFileType(String),

    /// No widget factory with the name
    #[error("unknown widget factory: {0}")]
    UnknownWidgetFactory(String),

    /// The factory is not registered for the file type
    #[error("factory '{factory}' cannot view file type '{file_type}'")]
    CannotView {
        /// Widget factory name
        factory: String,
        /// File type name
        file_type: String,
    },
}

/// Result alias for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = RegistryError::CannotView {
            factory: "Editor".into(),
            file_type: "png".into(),
        };
        assert_eq!(err.to_string(), "factory 'Editor' cannot view file type 'png'");
        assert_eq!(
            RegistryError::InvalidName("default".into()).to_string(),
            "invalid factory name: 'default'"
        );
    }
}

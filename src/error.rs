//! Error types for Keycloak cluster synthesis

use thiserror::Error;

/// Main error type for synthesis operations
///
/// Every error aborts the synthesis pass. Nothing is retried or recovered
/// locally, so variants only describe *why* a configuration was rejected.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Two mutually exclusive options were supplied together
    #[error("configuration conflict: {0}")]
    Conflict(String),

    /// A required input was not supplied
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// A vendor, engine, protocol or record type is not recognized
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Malformed value (zero sizes, duplicate construct ids, ...)
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Reading a configuration file failed
    #[error("io error: {0}")]
    Io(String),
}

impl Error {
    /// Create a conflict error with the given message
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a missing dependency error with the given message
    pub fn missing_dependency(msg: impl Into<String>) -> Self {
        Self::MissingDependency(msg.into())
    }

    /// Create an unsupported value error with the given message
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an io error with the given message
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Errors Raised During Synthesis
    // ==========================================================================

    /// Story: mixing the deprecated listener options with port publishers
    /// is rejected before any resource is emitted
    #[test]
    fn story_conflicting_exposure_options() {
        let err = Error::conflict(
            "Cannot use both PortPublisher and ListenerProvider properties at the same time",
        );
        assert!(err.to_string().contains("configuration conflict"));
        assert!(err.to_string().contains("both"));

        match Error::conflict("x") {
            Error::Conflict(msg) => assert_eq!(msg, "x"),
            _ => panic!("Expected Conflict variant"),
        }
    }

    /// Story: a database vendor that needs credentials reports which one
    #[test]
    fn story_missing_credentials() {
        let err = Error::missing_dependency("The mysql database vendor requires credentials");
        assert!(err.to_string().starts_with("missing dependency"));
        assert!(err.to_string().contains("mysql"));
    }

    /// Story: reserved vendors and unknown engines surface as unsupported
    #[test]
    fn story_unsupported_values() {
        let err = Error::unsupported("Unknown engine family: SQLSERVER");
        assert!(err.to_string().contains("unsupported"));
        assert!(err.to_string().contains("SQLSERVER"));
    }

    /// Story: serde failures are folded into the serialization variant
    #[test]
    fn story_serde_errors_convert() {
        let json_err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));

        let yaml_err = serde_yaml::from_str::<u32>("[1, 2").unwrap_err();
        let err: Error = yaml_err.into();
        assert!(err.to_string().starts_with("serialization error"));
    }

    /// Story: errors are categorized so callers can report them
    #[test]
    fn story_error_categorization() {
        fn category(err: &Error) -> &'static str {
            match err {
                Error::Conflict(_) => "conflict",
                Error::MissingDependency(_) => "missing",
                Error::Unsupported(_) => "unsupported",
                Error::Validation(_) => "invalid",
                Error::Serialization(_) => "serde",
                Error::Io(_) => "io",
            }
        }

        assert_eq!(category(&Error::conflict("a")), "conflict");
        assert_eq!(category(&Error::missing_dependency("b")), "missing");
        assert_eq!(category(&Error::unsupported("c")), "unsupported");
        assert_eq!(category(&Error::validation("d")), "invalid");
        assert_eq!(category(&Error::io("e")), "io");
    }
}

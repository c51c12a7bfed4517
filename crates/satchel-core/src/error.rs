//! Error types module
//!
//! Core error types and the [`ErrorMetadata`] trait every satchel error
//! implements, so callers (the CLI, a host web framework) can classify failures
//! without matching on each crate's enum.

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata describing how an error should be reported.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "INTEGRITY_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same operation may succeed
    fn is_recoverable(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

/// Configuration resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown configuration key: {0}")]
    UnknownConfigKey(String),

    #[error("Configuration key '{name}' is not a {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("Configuration key '{0}' is not set")]
    Missing(String),

    #[error("Unknown storage engine: {0}")]
    UnknownStorageEngine(String),
}

impl ErrorMetadata for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            ConfigError::UnknownConfigKey(_) => "UNKNOWN_CONFIG_KEY",
            ConfigError::TypeMismatch { .. } => "CONFIG_TYPE_MISMATCH",
            ConfigError::Missing(_) => "CONFIG_MISSING",
            ConfigError::UnknownStorageEngine(_) => "UNKNOWN_STORAGE_ENGINE",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }

    fn log_level(&self) -> LogLevel {
        LogLevel::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_metadata() {
        let err = ConfigError::UnknownConfigKey("nope".to_string());
        assert_eq!(err.error_code(), "UNKNOWN_CONFIG_KEY");
        assert!(!err.is_recoverable());
        assert_eq!(err.log_level(), LogLevel::Error);
        assert_eq!(err.to_string(), "Unknown configuration key: nope");
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = ConfigError::TypeMismatch {
            name: "permissions".to_string(),
            expected: "int",
        };
        assert_eq!(
            err.to_string(),
            "Configuration key 'permissions' is not a int"
        );
    }
}

//! Error types for configuration loading and validation.

use std::path::PathBuf;

/// Errors that can occur when loading or validating a `vigil.toml` configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("failed to read configuration {}: {source}", path.display())]
    IoError {
        /// The file being read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A configuration value is out of range.
    #[error("invalid {field}: {message}")]
    ValidationError {
        /// Dotted path of the offending key, e.g. `cache.max_bytes`.
        field: String,
        /// What is wrong with the value.
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_parse_error() {
        let err = ConfigError::ParseError("expected '=' at line 3".to_string());
        assert_eq!(
            err.to_string(),
            "failed to parse configuration: expected '=' at line 3"
        );
    }

    #[test]
    fn validation_error_names_the_field() {
        let err = ConfigError::invalid("cache.max_bytes", "must be greater than zero");
        assert_eq!(err.to_string(), "invalid cache.max_bytes: must be greater than zero");
    }

    #[test]
    fn io_error_names_the_file() {
        let err = ConfigError::IoError {
            path: PathBuf::from("/repo/vigil.toml"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("failed to read configuration /repo/vigil.toml:"));
        assert!(msg.ends_with("denied"));
    }
}

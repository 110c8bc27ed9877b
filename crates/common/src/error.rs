//! Configuration and start-up error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading relay configuration
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("failed to read secret file {path}: {source}")]
    SecretFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Shorthand for a validation failure on a named config field.
    pub fn invalid(field: &str, reason: impl std::fmt::Display) -> Self {
        Self::Config(format!("{field} {reason}"))
    }
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_names_the_field() {
        let err = Error::invalid("server.timeout_secs", "must be greater than 0");
        assert_eq!(
            err.to_string(),
            "Configuration error: server.timeout_secs must be greater than 0"
        );
    }

    #[test]
    fn secret_file_error_includes_path() {
        let err = Error::SecretFile {
            path: PathBuf::from("/run/secrets/state"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/run/secrets/state"), "got: {msg}");
        assert!(msg.contains("missing"), "got: {msg}");
    }
}

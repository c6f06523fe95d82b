//! Error types for the Marks application.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the entire Marks application.
///
/// The three variants the sync engine reasons about are `Auth`, `Remote` and
/// `Validation`. Every failure is local to the action that produced it: none of
/// them is fatal and none of them leaves the replica in a state it was not in
/// before the action started.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum MarksError {
    /// Session lookup or session transition failure
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Any remote store, identity endpoint or change-feed call failure
    #[error("Remote error during {operation}: {message}")]
    Remote {
        operation: String, // "list", "insert", "delete", "feed", ...
        message: String,
    },

    /// Input rejected before any network call
    #[error("Validation error: {field} - {message}")]
    Validation {
        field: String,
        message: String,
    },

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization {
        format: String, // "TOML", "JSON", etc.
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MarksError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates an Auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Creates a Remote error for the given operation
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a Validation error for the given input field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is an Auth error
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Check if this is a Remote error
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Check if this is a Validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Check if this is a config error
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Check if this is an IO error
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for MarksError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for MarksError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for MarksError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for MarksError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// Transport-level failures. HTTP status failures are mapped by the adapters,
/// which know which operation was running.
impl From<reqwest::Error> for MarksError {
    fn from(err: reqwest::Error) -> Self {
        let operation = if err.is_timeout() {
            "request (timeout)"
        } else if err.is_connect() {
            "request (connect)"
        } else if err.is_decode() {
            "request (decode)"
        } else {
            "request"
        };
        Self::remote(operation, err.to_string())
    }
}

/// A type alias for `Result<T, MarksError>`.
pub type Result<T> = std::result::Result<T, MarksError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_helpers_map_to_variants() {
        assert!(MarksError::auth("expired").is_auth());
        assert!(MarksError::remote("list", "503").is_remote());
        assert!(MarksError::validation("title", "empty").is_validation());
        assert!(MarksError::config("missing api_url").is_config());
        assert!(!MarksError::internal("boom").is_remote());
    }

    #[test]
    fn test_display_includes_operation() {
        let err = MarksError::remote("insert", "connection reset");
        assert_eq!(
            err.to_string(),
            "Remote error during insert: connection reset"
        );
    }

    #[test]
    fn test_io_conversion_keeps_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: MarksError = io.into();
        assert!(err.is_io());
        assert!(err.to_string().contains("NotFound"));
    }

    #[test]
    fn test_json_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let err: MarksError = parse.into();
        assert!(matches!(err, MarksError::Serialization { ref format, .. } if format == "JSON"));
    }
}

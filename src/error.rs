//! Error types for the writing assistant

use thiserror::Error;
use tower::BoxError;

use crate::turn::ParticipantId;

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, ScribeError>;

/// Main error type.
///
/// Schema-level malformation never shows up here: payloads are always repaired.
#[derive(Debug, Error)]
pub enum ScribeError {
    /// The model call behind a participant failed
    #[error("Inference error in {participant}: {source}")]
    Inference {
        participant: ParticipantId,
        #[source]
        source: BoxError,
    },

    /// A routing decision or override named a participant that is not in the roster
    #[error("Unknown participant: {0}")]
    UnknownParticipant(ParticipantId),

    /// Roster or configuration is inconsistent
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Document inspection failure
    #[error("Document error: {0}")]
    Document(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML configuration parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ScribeError {
    pub fn inference(participant: &ParticipantId, source: impl Into<BoxError>) -> Self {
        ScribeError::Inference {
            participant: participant.clone(),
            source: source.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ScribeError::Config {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScribeError::UnknownParticipant(ParticipantId::new("ghost_agent"));
        assert_eq!(err.to_string(), "Unknown participant: ghost_agent");

        let err = ScribeError::inference(&ParticipantId::new("writer_agent"), "timeout");
        assert_eq!(err.to_string(), "Inference error in writer_agent: timeout");
    }

    #[test]
    fn test_error_from_serde() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ScribeError = parse_err.into();
        assert!(matches!(err, ScribeError::Serialization(_)));
    }

    #[test]
    fn test_config_helper() {
        let err = ScribeError::config("duplicate participant");
        assert!(matches!(err, ScribeError::Config { .. }));
        assert_eq!(err.to_string(), "Configuration error: duplicate participant");
    }
}

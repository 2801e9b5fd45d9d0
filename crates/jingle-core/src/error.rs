//! Error types for the Jingle protocol model.

use thiserror::Error;

/// Errors raised while building or interpreting Jingle payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JingleError {
    /// An action string on the wire did not match any known Jingle action.
    #[error("unknown jingle action: {0}")]
    UnknownAction(String),

    /// A required attribute was absent from a payload or content block.
    #[error("missing attribute: {0}")]
    MissingAttribute(&'static str),

    /// An attribute was present but its value could not be interpreted.
    #[error("invalid value for {field}: {value}")]
    InvalidValue {
        /// Attribute that failed to parse.
        field: &'static str,
        /// Offending raw value.
        value: String,
    },
}

impl JingleError {
    /// Helper to build a [`JingleError::InvalidValue`] without spelling the struct out.
    pub fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            value: value.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, JingleError>;

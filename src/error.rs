//! Error types for the gige-cam crate.

use std::error::Error as StdError;
use std::fmt;

/// Crate-wide error type.
///
/// The taxonomy is deliberately small: configuration mistakes (`NotFound`,
/// `OutOfRange`), transport failures (`Unreachable`) and API misuse
/// (`InvalidState`). Per-buffer delivery problems are not errors; they are
/// reported through [`BufferStatus`](crate::types::BufferStatus).
#[derive(Debug)]
pub enum Error {
    /// No feature or command with the given name exists in the device schema.
    NotFound(String),

    /// A feature write was rejected because the value is outside its bounds.
    OutOfRange {
        feature: String,
        value: i64,
        min: i64,
        max: i64,
    },

    /// The device disconnected or a register/command/stream operation failed
    /// at the transport level.
    Unreachable(String),

    /// API misuse, e.g. pushing a buffer the channel already owns or opening
    /// the stream channel twice.
    InvalidState(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(name) => write!(f, "not found: no feature or command named {:?}", name),
            Error::OutOfRange {
                feature,
                value,
                min,
                max,
            } => write!(
                f,
                "out of range: {} = {} is outside [{}, {}]",
                feature, value, min, max
            ),
            Error::Unreachable(msg) => write!(f, "device unreachable: {}", msg),
            Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
        }
    }
}

impl StdError for Error {}

impl Error {
    /// Create a not-found error for a feature or command name.
    pub fn not_found(name: impl Into<String>) -> Self {
        Error::NotFound(name.into())
    }

    /// Create an unreachable error with a message.
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Error::Unreachable(msg.into())
    }

    /// Create an invalid state error with a message.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Returns true if this is a NotFound error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns true if this is an OutOfRange error.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Error::OutOfRange { .. })
    }

    /// Returns true if this is an Unreachable error.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Error::Unreachable(_))
    }

    /// Returns true if this is an InvalidState error.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Error::InvalidState(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Unreachable(err.to_string())
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates_match_variants() {
        assert!(Error::not_found("Width").is_not_found());
        assert!(Error::unreachable("timeout").is_unreachable());
        assert!(Error::invalid_state("double push").is_invalid_state());
        assert!(Error::OutOfRange {
            feature: "Width".into(),
            value: 5000,
            min: 1,
            max: 1280,
        }
        .is_out_of_range());
    }

    #[test]
    fn test_io_error_maps_to_unreachable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: Error = io.into();
        assert!(err.is_unreachable());
    }

    #[test]
    fn test_out_of_range_display_names_the_feature() {
        let err = Error::OutOfRange {
            feature: "Height".into(),
            value: 0,
            min: 1,
            max: 960,
        };
        let msg = err.to_string();
        assert!(msg.contains("Height"));
        assert!(msg.contains("[1, 960]"));
    }
}

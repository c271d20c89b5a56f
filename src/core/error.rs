//! Error taxonomy for fetching and decoding marker data

use thiserror::Error;

/// Failure of a snapshot fetch, named lookup, or push connection.
///
/// None of these are fatal: adapters report them and keep retrying.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Network-level failure (connection refused, reset, timeout)
    #[error("transport error: {0}")]
    Transport(String),

    /// Server answered with a non-2xx status other than "not found"
    #[error("server responded with status {0}")]
    Status(u16),

    /// Named lookup found no such entity
    #[error("No user named \"{name}\" known...")]
    NotFound { name: String },

    /// Response body could not be decoded as a marker payload
    #[error("malformed payload: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }

    /// Text shown in the error banner
    pub fn user_message(&self) -> String {
        match self {
            FetchError::NotFound { .. } => self.to_string(),
            other => format!("Failed to fetch markers: {other}"),
        }
    }
}

/// Why a single inbound record was dropped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid coordinate '{field}': {value}")]
    InvalidCoordinate { field: &'static str, value: String },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("expected an object or array, got {0}")]
    UnexpectedShape(&'static str),
}

/// Rejected configuration change
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("poll interval must be a positive number of milliseconds")]
    ZeroPollInterval,
}

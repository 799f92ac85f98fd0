//! Error types for rpflow
//!
//! Two taxonomies are kept deliberately apart:
//!
//! - [`RpError`] -- fatal faults (configuration defects, broken internal
//!   invariants, collaborator failures). These propagate through the
//!   crate-wide [`Result`] alias with `?` and abort the current operation.
//! - [`Rejection`] -- protocol-level rejections produced when the
//!   authorization server or the callback violates protocol expectations.
//!   A rejection is an expected outcome the host can render (for example a
//!   login error page). It does not implement [`std::error::Error`] so it can
//!   never be folded into the fatal channel by accident.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal error type for rpflow operations
///
/// Every variant describes a condition that is not recoverable by the caller
/// within the current operation: misconfiguration, a logic defect, or a
/// failing external collaborator.
#[derive(Error, Debug)]
pub enum RpError {
    /// Configuration-related errors (missing registration, bad YAML values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// An internal assumption of the engine was broken
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Client and server capabilities have no common ground
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// The token dispatcher failed (not a rejection of the token itself)
    #[error("Token dispatch error: {0}")]
    TokenDispatch(String),

    /// The backchannel transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type alias for rpflow operations
///
/// Uses `anyhow::Error` so that fatal errors carry context while remaining
/// downcastable to [`RpError`].
pub type Result<T> = anyhow::Result<T>;

/// Outcome of a collaborator call that may be rejected at protocol level.
pub type Verdict<T> = std::result::Result<T, Rejection>;

/// A structured protocol rejection: `(error, error_description, error_uri)`.
///
/// # Examples
///
/// ```
/// use rpflow::error::Rejection;
///
/// let rejection = Rejection::new("access_denied")
///     .with_description("The user denied the request.");
/// assert_eq!(rejection.error, "access_denied");
/// assert_eq!(rejection.to_string(), "access_denied: The user denied the request.");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// OAuth 2.0 error code (e.g. `invalid_request`)
    pub error: String,
    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Link to documentation about the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl Rejection {
    /// Creates a rejection carrying only an error code.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            description: None,
            uri: None,
        }
    }

    /// Attaches a human readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attaches a documentation URI.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Shorthand for an `invalid_request` rejection with a description.
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(crate::protocol::errors::INVALID_REQUEST).with_description(description)
    }

    /// Shorthand for an `invalid_token` rejection with a description.
    pub fn invalid_token(description: impl Into<String>) -> Self {
        Self::new(crate::protocol::errors::INVALID_TOKEN).with_description(description)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.error, description),
            None => write!(f, "{}", self.error),
        }
    }
}

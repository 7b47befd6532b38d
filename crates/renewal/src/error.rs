//! Error types for renewal operations.
//!
//! The orchestrator classifies these into per-resource outcomes: only
//! [`Error::Configuration`] and [`Error::AuthenticationFailed`] abort a run
//! before any resource is touched, everything else is recorded against the
//! resource being processed and the run moves on.

use std::io;

/// Result type alias for renewal operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the directory or the keyring.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid run configuration (unknown group, unregistered connector alias).
    /// Fatal: aborts the run before any resource is touched.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The directory rejected the login ceremony.
    #[error("authentication with the directory server failed")]
    AuthenticationFailed,

    /// HTTP request failed.
    #[error("HTTP request failed: {message}")]
    Http {
        /// Error message.
        message: String,
        /// HTTP status code if available.
        status: Option<u16>,
    },

    /// The directory returned a body we could not make sense of.
    #[error("invalid directory response: {0}")]
    InvalidResponse(String),

    /// A recipient's public key could not be imported into the local keyring.
    /// Blocks the fan-out of the resource being processed.
    #[error("key import failed: {0}")]
    KeyImport(String),

    /// Encrypting the new secret for a recipient failed.
    #[error("encryption failed for key [{key_id}]: {message}")]
    Encrypt {
        /// Recipient key the encryption targeted.
        key_id: String,
        /// Underlying failure.
        message: String,
    },

    /// Decrypting the current secret failed.
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// IO error (keyring subprocess plumbing).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create an HTTP error.
    pub fn http(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Http {
            message: message.into(),
            status,
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error must abort the whole run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::AuthenticationFailed)
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::Http {
                message: format!("HTTP {}", code),
                status: Some(code),
            },
            other => Self::Http {
                message: other.to_string(),
                status: None,
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

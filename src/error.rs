//! Centralized error types for csvfetch.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the csvfetch library.
#[derive(Error, Debug)]
pub enum IngestError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The raw bytes could not be parsed as an RFC 822 message.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A sender or subject pattern is not a valid regular expression.
    #[error("Invalid regular expression \"{pattern}\": {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A CSV payload could not be decoded to text before saving.
    #[error("Attachment '{name}' could not be decoded: {reason}")]
    AttachmentEncoding { name: String, reason: String },

    /// Could not reach the mail server or negotiate TLS.
    #[error("Connection to {server} failed: {reason}")]
    Connect { server: String, reason: String },

    /// The mail server rejected the credentials.
    #[error("Login to {server} as {user} failed: {reason}")]
    Login {
        server: String,
        user: String,
        reason: String,
    },

    /// The session with the mail server broke off mid-run.
    #[error("Connection lost: {0}")]
    ConnectionLost(std::io::Error),

    /// The mail server answered something we did not expect.
    #[error("Mailbox protocol error: {0}")]
    Protocol(String),

    /// Missing or inconsistent settings.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, IngestError>`.
pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error ends the whole run rather than a single message.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Login { .. } | Self::ConnectionLost(_) | Self::Config(_)
        )
    }
}

/// Allow `?` on socket reads and writes in the mailbox transports. File
/// I/O goes through [`IngestError::io`] instead, which keeps the path.
impl From<std::io::Error> for IngestError {
    fn from(source: std::io::Error) -> Self {
        Self::ConnectionLost(source)
    }
}

impl From<imap::Error> for IngestError {
    fn from(e: imap::Error) -> Self {
        match e {
            imap::Error::Io(source) => Self::from(source),
            imap::Error::ConnectionLost => Self::ConnectionLost(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "server closed the connection",
            )),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<native_tls::Error> for IngestError {
    fn from(e: native_tls::Error) -> Self {
        Self::Protocol(format!("TLS: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let login = IngestError::Login {
            server: "pop.example.com".into(),
            user: "lab".into(),
            reason: "bad password".into(),
        };
        assert!(login.is_fatal());
        assert!(!IngestError::MalformedMessage("empty".into()).is_fatal());
        assert!(!IngestError::io("/tmp/x.csv", std::io::Error::other("disk full")).is_fatal());
        let dropped: IngestError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert!(dropped.is_fatal());
    }

    #[test]
    fn test_invalid_pattern_message() {
        let err = IngestError::InvalidPattern {
            pattern: "(".into(),
            reason: "unclosed group".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid regular expression \"(\": unclosed group"
        );
    }
}

//! Error types for the UDP file service
//!
//! NIST 800-53: SI-11 (Error Handling)
//! Implementation: Errors that stay local to a single handler. Failures the
//! peer must hear about are rendered as `ERROR:` replies by the dispatcher and
//! never surface here.

use thiserror::Error;

/// Result type alias for server and client operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// I/O error (socket or filesystem)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unusable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed reply or unexpected protocol state
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Datagram could not be sent or was truncated
    #[error("Transport error: {0}")]
    Transport(String),

    /// No reply arrived in time
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl Error {
    /// Check if a client may simply resend the request
    ///
    /// A lost datagram shows up as a timeout; nothing else is worth retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_are_recoverable() {
        assert!(Error::Timeout("no reply".into()).is_recoverable());
        assert!(!Error::Config("bad".into()).is_recoverable());
        assert!(!Error::Protocol("bad".into()).is_recoverable());
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(format!("{err}").starts_with("I/O error"));
    }
}

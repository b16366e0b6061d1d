use thiserror::Error;

use std::io;
use std::result;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Any failure reading or writing the connection, timeouts included. The connection must be
    /// discarded.
    #[error("peer disconnected: {0}")]
    PeerDisconnected(#[source] io::Error),

    /// The request can't be sent as configured. Nothing was written to the connection.
    #[error("invalid request: {0}")]
    Config(String),

    /// The request body source failed part way through.
    #[error("failed to read request body: {0}")]
    Body(#[source] io::Error),

    /// The backend's stdout could not be parsed as an HTTP message.
    #[error("malformed response: {reason}")]
    Malformed {
        reason: String,
        stderr: Vec<u8>,
    },

    /// The backend produced no stdout, only stderr.
    #[error("fcgi: {0}")]
    Backend(String),

    #[error("no response from server")]
    NoResponse,

    /// The peer sent something that isn't FastCGI, or too much of somebody else's traffic.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    pub(crate) fn malformed<T: Into<String>>(reason: T) -> Error {
        Error::Malformed {
            reason: reason.into(),
            stderr: Vec::new(),
        }
    }

    pub(crate) fn with_stderr(self, diagnostics: &[u8]) -> Error {
        match self {
            Error::Malformed { reason, .. } => Error::Malformed {
                reason,
                stderr: diagnostics.to_vec(),
            },
            other => other,
        }
    }

    /// True if the connection is left in an unknown state and must not be reused.
    pub fn is_disconnect(&self) -> bool {
        match *self {
            Error::PeerDisconnected(_) | Error::Body(_) | Error::Protocol(_) => true,
            Error::Config(_) | Error::Malformed { .. } | Error::Backend(_) | Error::NoResponse
                => false,
        }
    }

    /// Diagnostic bytes the backend wrote to stderr, if this error carries any.
    pub fn stderr(&self) -> Option<&[u8]> {
        match *self {
            Error::Malformed { ref stderr, .. } => Some(stderr.as_slice()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_classification() {
        let e = Error::PeerDisconnected(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(e.is_disconnect());
        assert!(Error::Protocol("bad version".to_owned()).is_disconnect());
        assert!(!Error::NoResponse.is_disconnect());
        assert!(!Error::Config("no length".to_owned()).is_disconnect());
    }

    #[test]
    fn malformed_carries_stderr() {
        let e = Error::malformed("bad header").with_stderr(b"PHP Warning");
        assert_eq!(Some(&b"PHP Warning"[..]), e.stderr());
        assert_eq!("malformed response: bad header", e.to_string());
    }

    #[test]
    fn backend_message() {
        let e = Error::Backend("fatal: file not found".to_owned());
        assert!(e.to_string().contains("fatal: file not found"));
    }
}

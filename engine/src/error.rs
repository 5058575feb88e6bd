//! Error types for the FTP engine.
//!
//! The primary error type is `EngineError`. Per-step failures inside a
//! fail-soft walk are recorded on the `RunReport` as text, not propagated;
//! only failures that end the requested operation surface as `EngineError`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of the control-channel line protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed by server")]
    ConnectionClosed,
    #[error("no reply within the idle timeout")]
    TimedOut,
    #[error("reply line too long")]
    LineTooLong,
    #[error("multi-line reply exceeds {0} lines")]
    TooManyLines(usize),
    #[error("malformed reply line: '{0}'")]
    MalformedLine(String),
    #[error("unexpected reply {code} to {command}: {text}")]
    UnexpectedReply {
        command: String,
        code: u16,
        text: String,
    },
    #[error("control channel I/O failed: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProtocolError::TimedOut,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ProtocolError::ConnectionClosed,
            _ => ProtocolError::Io(err),
        }
    }
}

/// Failures decoding the endpoint out of a `227` reply.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasvParseError {
    #[error("expected 6 address fields, found {0}")]
    MissingFields(usize),
    #[error("address field {index} out of range: {value}")]
    FieldOutOfRange { index: usize, value: String },
    #[error("passive endpoint has port 0")]
    ZeroPort,
}

/// Broad failure classes; the CLI maps each to a distinct exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Configuration or argument problems before any network activity
    Initialization,
    /// Control connection could not be established or login was refused
    Connection,
    /// The requested operation itself failed
    Operation,
}

/// Errors that end a session or the requested operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed line, reply or premature close on the control channel
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Login rejected (fatal, never retried)
    #[error("login as '{username}' rejected: {code} {text}")]
    Authentication {
        username: String,
        code: u16,
        text: String,
    },

    /// Control connection could not be opened
    #[error("cannot connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// PASV reply could not be decoded
    #[error("cannot parse PASV reply '{reply}': {source}")]
    PasvParse {
        reply: String,
        #[source]
        source: PasvParseError,
    },

    /// Data connection to the passive endpoint failed
    #[error("data connection to {endpoint} failed: {source}")]
    DataConnect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// STOR/RETR/DELE/MKD/RMD/LIST rejected or I/O failure mid-transfer
    #[error("{operation} {path} failed: {reason}")]
    Transfer {
        operation: &'static str,
        path: String,
        code: Option<u16>,
        reason: String,
    },

    /// Configuration missing, unreadable or invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Command issued in the wrong session state or with invalid arguments
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Local filesystem failure outside of a single transfer
    #[error("local I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl EngineError {
    /// Build a `Transfer` error from a negative server reply.
    pub fn rejected(operation: &'static str, path: &str, code: u16, text: &str) -> Self {
        EngineError::Transfer {
            operation,
            path: path.to_string(),
            code: Some(code),
            reason: format!("{} {}", code, text),
        }
    }

    /// Build a `Transfer` error from a local or data-channel I/O failure.
    pub fn transfer_io(operation: &'static str, path: &str, err: &io::Error) -> Self {
        EngineError::Transfer {
            operation,
            path: path.to_string(),
            code: None,
            reason: err.to_string(),
        }
    }

    /// Reply code attached to this error, if the server produced one.
    pub fn reply_code(&self) -> Option<u16> {
        match self {
            Self::Authentication { code, .. } => Some(*code),
            Self::Transfer { code, .. } => *code,
            Self::Protocol(ProtocolError::UnexpectedReply { code, .. }) => Some(*code),
            _ => None,
        }
    }

    /// True when the control connection can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::Authentication { .. } | Self::Connect { .. }
        )
    }

    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Config(_) | Self::InvalidOperation(_) => FailureClass::Initialization,
            Self::Connect { .. } | Self::Authentication { .. } => FailureClass::Connection,
            _ => FailureClass::Operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_maps_to_protocol_timeout() {
        let err: ProtocolError = io::Error::new(io::ErrorKind::WouldBlock, "slow").into();
        assert!(matches!(err, ProtocolError::TimedOut));
    }

    #[test]
    fn test_failure_classes() {
        let auth = EngineError::Authentication {
            username: "bob".to_string(),
            code: 530,
            text: "Login incorrect".to_string(),
        };
        assert_eq!(auth.failure_class(), FailureClass::Connection);
        assert_eq!(auth.reply_code(), Some(530));

        let cfg = EngineError::Config("host missing".to_string());
        assert_eq!(cfg.failure_class(), FailureClass::Initialization);

        let stor = EngineError::rejected("STOR", "/site/a.txt", 553, "Permission denied");
        assert_eq!(stor.failure_class(), FailureClass::Operation);
        assert!(stor.to_string().contains("/site/a.txt"));
        assert!(stor.to_string().contains("553"));
    }
}

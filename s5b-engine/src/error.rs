//! Engine error type

use std::io;

use thiserror::Error;

use s5b_common::FileErrorKind;
use s5b_common::framing::FrameError;

use crate::types::TransferId;

/// Errors raised by the rendezvous engine
///
/// Connection-level variants describe why one candidate socket failed; most
/// of them are absorbed by the registry. Only those that end a transfer reach
/// subscribers, as the `Display` text of the error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("connection timed out")]
    ConnectTimeout,

    #[error("connection refused")]
    ConnectRefused,

    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(FrameError),

    #[error("no acceptable authentication method")]
    NoAcceptableMethod,

    #[error("auth token matches no pending transfer")]
    TokenMismatch,

    #[error("peer disconnected")]
    PeerDisconnected,

    #[error("{}", .0.message())]
    FileIo(FileErrorKind),

    #[error("no streamhost could be reached")]
    StreamhostsExhausted,

    #[error("transfer {0} already exists")]
    DuplicateTransfer(TransferId),

    #[error("a send for session {0} to this peer already exists")]
    DuplicateSession(String),

    #[error("unknown transfer {0}")]
    UnknownTransfer(TransferId),

    #[error("unknown correlation id {0}")]
    UnknownCorrelation(String),

    #[error("transfer {0} has the wrong direction for this operation")]
    WrongDirection(TransferId),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<FrameError> for EngineError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::NoAcceptableMethod => Self::NoAcceptableMethod,
            other => Self::ProtocolViolation(other),
        }
    }
}

impl From<FileErrorKind> for EngineError {
    fn from(kind: FileErrorKind) -> Self {
        Self::FileIo(kind)
    }
}

impl EngineError {
    /// Map a connect failure to its variant
    pub(crate) fn from_connect(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::ConnectRefused,
            io::ErrorKind::TimedOut => Self::ConnectTimeout,
            _ => Self::ConnectFailed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_mapping() {
        assert!(matches!(
            EngineError::from(FrameError::NoAcceptableMethod),
            EngineError::NoAcceptableMethod
        ));
        assert!(matches!(
            EngineError::from(FrameError::Truncated),
            EngineError::ProtocolViolation(FrameError::Truncated)
        ));
    }

    #[test]
    fn test_file_error_uses_category_message() {
        let err = EngineError::from(FileErrorKind::NoSpace);
        assert_eq!(err.to_string(), "No space left on device");
    }

    #[test]
    fn test_connect_error_mapping() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(matches!(
            EngineError::from_connect(refused),
            EngineError::ConnectRefused
        ));

        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert!(matches!(
            EngineError::from_connect(timed_out),
            EngineError::ConnectTimeout
        ));

        let other = io::Error::other("no route");
        assert!(matches!(
            EngineError::from_connect(other),
            EngineError::ConnectFailed(_)
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            EngineError::ProtocolViolation(FrameError::UnsupportedVersion(4)).to_string(),
            "protocol violation: unsupported SOCKS version 0x04"
        );
        assert_eq!(
            EngineError::DuplicateTransfer(TransferId::new(3)).to_string(),
            "transfer 3 already exists"
        );
    }
}

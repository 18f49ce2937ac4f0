//! Frame error type

use thiserror::Error;

/// Malformed or unexpected handshake bytes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("unsupported SOCKS version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("greeting offers no authentication methods")]
    NoMethods,

    #[error("{0} methods do not fit a greeting")]
    TooManyMethods(usize),

    #[error("no acceptable authentication method")]
    NoAcceptableMethod,

    #[error("unexpected authentication method {0:#04x}")]
    UnexpectedMethod(u8),

    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("unsupported address type {0:#04x}")]
    UnsupportedAddressType(u8),

    #[error("address is not printable ASCII")]
    InvalidAddress,

    #[error("address of {0} bytes does not fit a length byte")]
    AddressTooLong(usize),

    #[error("request rejected with status {0:#04x}")]
    Rejected(u8),

    #[error("connection closed inside a frame")]
    Truncated,
}

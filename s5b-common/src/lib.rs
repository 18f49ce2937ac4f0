//! SOCKS5 Bytestreams Common Library
//!
//! Runtime-free building blocks shared by the rendezvous engine: the SOCKS5
//! wire codec, the SHA-1 auth token that correlates anonymous connections
//! with transfers, and the file error categories reported to users.

mod error_kind;
pub mod framing;
pub mod token;

pub use error_kind::FileErrorKind;
pub use token::AuthToken;

/// Default size of one file chunk written to a bytestream (64KB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default size of the socket read buffer (64KB)
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default time allowed for an outbound candidate connection, in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Port carried in CONNECT requests and replies (tokens replace real addresses)
pub const RENDEZVOUS_PORT: u16 = 0;

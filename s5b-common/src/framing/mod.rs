//! SOCKS5 framing for bytestream rendezvous
//!
//! Only the subset of RFC 1928 used by SOCKS5 Bytestreams is supported:
//! no-auth method negotiation and the CONNECT command, where the "domain
//! name" address carries the auth token.
//!
//! Wire format (big-endian, no padding):
//!
//! ```text
//! greeting        05 <n_methods> <methods...>
//! method select   05 <method>
//! connect request 05 01 00 <atyp> [len] <addr> <port:2>
//! connect reply   05 <status> 00 <atyp> [len] <addr> <port:2>
//! ```
//!
//! Decoders are incremental: they return `Ok(None)` until the buffer holds a
//! complete frame, and report how many bytes the frame consumed.

mod error;
mod reader;
mod writer;

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

pub use error::FrameError;
pub use reader::{decode_connect, decode_greeting, decode_method_selection};
pub use writer::{
    encode_connect_reply, encode_connect_request, encode_greeting, encode_method_selection,
};

/// Protocol version byte
pub const SOCKS_VERSION: u8 = 0x05;

/// "No authentication required" method
pub const METHOD_NO_AUTH: u8 = 0x00;

/// "No acceptable methods" selection
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

/// CONNECT command
pub const CMD_CONNECT: u8 = 0x01;

/// Reserved byte value
pub const RESERVED: u8 = 0x00;

/// Address type: IPv4
pub const ATYP_IPV4: u8 = 0x01;

/// Address type: domain name with length prefix
pub const ATYP_DOMAIN: u8 = 0x03;

/// Address type: IPv6
pub const ATYP_IPV6: u8 = 0x04;

/// Reply status: succeeded
pub const REPLY_SUCCEEDED: u8 = 0x00;

/// Longest domain a single length byte can describe
pub const MAX_DOMAIN_LENGTH: usize = u8::MAX as usize;

/// Address field of a CONNECT request or reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Domain(String),
    Ipv6(Ipv6Addr),
}

impl Address {
    /// String form of the address as a token claim
    ///
    /// IPv4 and IPv6 addresses render in their usual textual form; they can
    /// never equal a hex token, so such claims simply fail to match.
    #[must_use]
    pub fn as_claim(&self) -> String {
        match self {
            Self::Ipv4(ip) => ip.to_string(),
            Self::Domain(domain) => domain.clone(),
            Self::Ipv6(ip) => ip.to_string(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_claim())
    }
}

/// Client greeting listing the offered authentication methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub methods: Vec<u8>,
}

impl Greeting {
    /// Whether the no-auth method is on offer
    #[must_use]
    pub fn offers_no_auth(&self) -> bool {
        self.methods.contains(&METHOD_NO_AUTH)
    }
}

/// CONNECT request or reply
///
/// Requests and replies share a layout; `code` is the command for a request
/// and the status for a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFrame {
    pub code: u8,
    pub address: Address,
    pub port: u16,
}

/// A decoded frame and the number of bytes it occupied
pub type Decoded<T> = Option<(T, usize)>;

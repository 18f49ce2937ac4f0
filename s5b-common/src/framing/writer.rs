//! Frame encoders

use super::error::FrameError;
use super::{
    ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, Address, CMD_CONNECT, MAX_DOMAIN_LENGTH, RESERVED,
    SOCKS_VERSION,
};

/// Encode a client greeting offering `methods`
///
/// # Errors
///
/// Returns an error if `methods` is empty or has more than 255 entries.
pub fn encode_greeting(methods: &[u8]) -> Result<Vec<u8>, FrameError> {
    if methods.is_empty() {
        return Err(FrameError::NoMethods);
    }
    let count =
        u8::try_from(methods.len()).map_err(|_| FrameError::TooManyMethods(methods.len()))?;

    let mut out = Vec::with_capacity(2 + methods.len());
    out.push(SOCKS_VERSION);
    out.push(count);
    out.extend_from_slice(methods);
    Ok(out)
}

/// Encode the server's method selection
#[must_use]
pub fn encode_method_selection(method: u8) -> [u8; 2] {
    [SOCKS_VERSION, method]
}

/// Encode a CONNECT request
///
/// # Errors
///
/// Returns an error if a domain address is longer than 255 bytes.
pub fn encode_connect_request(address: &Address, port: u16) -> Result<Vec<u8>, FrameError> {
    encode_connect(CMD_CONNECT, address, port)
}

/// Encode a CONNECT reply with the given status
///
/// # Errors
///
/// Returns an error if a domain address is longer than 255 bytes.
pub fn encode_connect_reply(
    status: u8,
    address: &Address,
    port: u16,
) -> Result<Vec<u8>, FrameError> {
    encode_connect(status, address, port)
}

fn encode_connect(code: u8, address: &Address, port: u16) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(8 + MAX_DOMAIN_LENGTH);
    out.extend_from_slice(&[SOCKS_VERSION, code, RESERVED]);

    match address {
        Address::Ipv4(ip) => {
            out.push(ATYP_IPV4);
            out.extend_from_slice(&ip.octets());
        }
        Address::Domain(domain) => {
            let len = domain.len();
            if len > MAX_DOMAIN_LENGTH {
                return Err(FrameError::AddressTooLong(len));
            }
            out.push(ATYP_DOMAIN);
            out.push(len as u8);
            out.extend_from_slice(domain.as_bytes());
        }
        Address::Ipv6(ip) => {
            out.push(ATYP_IPV6);
            out.extend_from_slice(&ip.octets());
        }
    }

    out.extend_from_slice(&port.to_be_bytes());
    Ok(out)
}

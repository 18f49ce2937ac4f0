//! Incremental frame decoders
//!
//! Each decoder inspects the front of a receive buffer. A structurally
//! invalid prefix fails immediately, even before the frame is complete, so a
//! peer speaking another protocol is rejected on its first bytes.

use std::net::{Ipv4Addr, Ipv6Addr};

use super::error::FrameError;
use super::{
    ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, Address, ConnectFrame, Decoded, Greeting,
    METHOD_NO_ACCEPTABLE, SOCKS_VERSION,
};

/// Bytes before the address field: version, code, reserved, address type
const CONNECT_HEADER_LEN: usize = 4;

/// Bytes of the trailing port field
const PORT_LEN: usize = 2;

fn check_version(buf: &[u8]) -> Result<(), FrameError> {
    match buf.first() {
        Some(&version) if version != SOCKS_VERSION => Err(FrameError::UnsupportedVersion(version)),
        _ => Ok(()),
    }
}

/// Decode a client greeting
///
/// # Errors
///
/// Returns an error on a wrong version or a greeting with zero methods.
pub fn decode_greeting(buf: &[u8]) -> Result<Decoded<Greeting>, FrameError> {
    check_version(buf)?;
    let Some(&count) = buf.get(1) else {
        return Ok(None);
    };
    if count == 0 {
        return Err(FrameError::NoMethods);
    }

    let end = 2 + count as usize;
    if buf.len() < end {
        return Ok(None);
    }

    let greeting = Greeting {
        methods: buf[2..end].to_vec(),
    };
    Ok(Some((greeting, end)))
}

/// Decode the server's method selection
///
/// # Errors
///
/// Returns [`FrameError::NoAcceptableMethod`] when the server refused every
/// offered method, or a version error.
pub fn decode_method_selection(buf: &[u8]) -> Result<Decoded<u8>, FrameError> {
    check_version(buf)?;
    let Some(&method) = buf.get(1) else {
        return Ok(None);
    };
    if method == METHOD_NO_ACCEPTABLE {
        return Err(FrameError::NoAcceptableMethod);
    }
    Ok(Some((method, 2)))
}

/// Decode a CONNECT request or reply
///
/// The domain length byte is checked against the bytes actually buffered:
/// a frame is only returned once the whole address and port are present.
///
/// # Errors
///
/// Returns an error on a wrong version, an unknown address type, or a domain
/// that is empty or not printable ASCII.
pub fn decode_connect(buf: &[u8]) -> Result<Decoded<ConnectFrame>, FrameError> {
    check_version(buf)?;
    if buf.len() < CONNECT_HEADER_LEN {
        return Ok(None);
    }

    let code = buf[1];
    let atyp = buf[3];
    let rest = &buf[CONNECT_HEADER_LEN..];

    let (address, address_len) = match atyp {
        ATYP_IPV4 => {
            let Some(octets) = rest.get(..4) else {
                return Ok(None);
            };
            let octets: [u8; 4] = [octets[0], octets[1], octets[2], octets[3]];
            (Address::Ipv4(Ipv4Addr::from(octets)), 4)
        }
        ATYP_DOMAIN => {
            let Some(&len) = rest.first() else {
                return Ok(None);
            };
            let len = len as usize;
            if len == 0 {
                return Err(FrameError::InvalidAddress);
            }
            let Some(raw) = rest.get(1..1 + len) else {
                return Ok(None);
            };
            if !raw.iter().all(u8::is_ascii_graphic) {
                return Err(FrameError::InvalidAddress);
            }
            // All bytes are ASCII, so this cannot fail
            let domain = String::from_utf8_lossy(raw).into_owned();
            (Address::Domain(domain), 1 + len)
        }
        ATYP_IPV6 => {
            let Some(octets) = rest.get(..16) else {
                return Ok(None);
            };
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(octets);
            (Address::Ipv6(Ipv6Addr::from(bytes)), 16)
        }
        other => return Err(FrameError::UnsupportedAddressType(other)),
    };

    let Some(port) = rest.get(address_len..address_len + PORT_LEN) else {
        return Ok(None);
    };
    let port = u16::from_be_bytes([port[0], port[1]]);

    let frame = ConnectFrame {
        code,
        address,
        port,
    };
    Ok(Some((frame, CONNECT_HEADER_LEN + address_len + PORT_LEN)))
}

//! SOCKS5 handshake state machines
//!
//! Both roles are pure: they buffer inbound bytes with `feed`, and each call
//! to `next_step` yields at most one action for the registry to carry out
//! (write bytes, resolve a token, start streaming). The registry keeps
//! calling `next_step` until it returns `NeedMore`, so several frames
//! arriving in one read are all handled.

mod receiver;
mod sender;

pub use receiver::{ReceiverHandshake, ReceiverState, ReceiverStep};
pub use sender::{SenderHandshake, SenderState, SenderStep};

use s5b_common::framing::FrameError;

use crate::error::EngineError;

/// Reason a handshake connection closed
///
/// A close with a partly received frame is a truncated frame; anything else
/// is an ordinary disconnect.
fn close_reason(buffered: &[u8], in_frame: bool) -> EngineError {
    if in_frame && !buffered.is_empty() {
        EngineError::ProtocolViolation(FrameError::Truncated)
    } else {
        EngineError::PeerDisconnected
    }
}

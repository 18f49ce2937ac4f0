//! SOCKS5 client role: we connect to the initiator's streamhost and pull bytes

use s5b_common::framing::{
    Address, FrameError, METHOD_NO_AUTH, REPLY_SUCCEEDED, SOCKS_VERSION, decode_connect,
    decode_method_selection, encode_connect_request,
};
use s5b_common::{AuthToken, RENDEZVOUS_PORT};

use crate::error::EngineError;

use super::close_reason;

/// Progress of a receiving handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Initial,
    GreetingSent,
    GreetingAcked,
    RequestSent,
    RequestAcked,
    Streaming,
}

/// Action requested by a [`ReceiverHandshake`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverStep {
    /// Wait for more bytes
    NeedMore,
    /// Write these bytes to the streamhost
    Send(Vec<u8>),
    /// The streamhost accepted our token; the data phase may begin
    Established,
    /// File bytes received while streaming
    Payload(Vec<u8>),
}

/// Client side of the bytestream rendezvous
#[derive(Debug)]
pub struct ReceiverHandshake {
    state: ReceiverState,
    token: AuthToken,
    buffer: Vec<u8>,
}

impl ReceiverHandshake {
    pub fn new(token: AuthToken) -> Self {
        Self {
            state: ReceiverState::Initial,
            token,
            buffer: Vec::new(),
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Greeting to write once the connection opens
    pub fn start(&mut self) -> Vec<u8> {
        self.state = ReceiverState::GreetingSent;
        vec![SOCKS_VERSION, 1, METHOD_NO_AUTH]
    }

    /// Buffer bytes read from the streamhost
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Advance over buffered bytes
    ///
    /// # Errors
    ///
    /// Returns `NoAcceptableMethod` if the streamhost refused no-auth, or
    /// `ProtocolViolation` for malformed frames and non-success replies.
    pub fn next_step(&mut self) -> Result<ReceiverStep, EngineError> {
        match self.state {
            ReceiverState::Initial | ReceiverState::RequestAcked => Ok(ReceiverStep::NeedMore),
            ReceiverState::GreetingSent => self.read_method_selection(),
            // Request is written in the same step the method is acknowledged
            ReceiverState::GreetingAcked => Ok(ReceiverStep::NeedMore),
            ReceiverState::RequestSent => self.read_connect_reply(),
            ReceiverState::Streaming => {
                if self.buffer.is_empty() {
                    Ok(ReceiverStep::NeedMore)
                } else {
                    Ok(ReceiverStep::Payload(std::mem::take(&mut self.buffer)))
                }
            }
        }
    }

    /// Enter the data phase after `Established`
    pub fn begin_streaming(&mut self) {
        if self.state == ReceiverState::RequestAcked {
            self.state = ReceiverState::Streaming;
        }
    }

    /// Why this handshake ended when its socket closed
    pub fn close_reason(&self) -> EngineError {
        let in_frame = matches!(
            self.state,
            ReceiverState::GreetingSent | ReceiverState::RequestSent
        );
        close_reason(&self.buffer, in_frame)
    }

    fn read_method_selection(&mut self) -> Result<ReceiverStep, EngineError> {
        let Some((method, used)) = decode_method_selection(&self.buffer)? else {
            return Ok(ReceiverStep::NeedMore);
        };
        if method != METHOD_NO_AUTH {
            return Err(FrameError::UnexpectedMethod(method).into());
        }
        self.buffer.drain(..used);
        self.state = ReceiverState::GreetingAcked;

        let request =
            encode_connect_request(&Address::Domain(self.token.to_hex()), RENDEZVOUS_PORT)?;
        self.state = ReceiverState::RequestSent;
        Ok(ReceiverStep::Send(request))
    }

    fn read_connect_reply(&mut self) -> Result<ReceiverStep, EngineError> {
        let Some((reply, used)) = decode_connect(&self.buffer)? else {
            return Ok(ReceiverStep::NeedMore);
        };
        if reply.code != REPLY_SUCCEEDED {
            return Err(FrameError::Rejected(reply.code).into());
        }
        // Bytes after the reply are file data and stay buffered for streaming
        self.buffer.drain(..used);
        self.state = ReceiverState::RequestAcked;
        Ok(ReceiverStep::Established)
    }
}

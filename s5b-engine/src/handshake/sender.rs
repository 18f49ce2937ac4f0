//! SOCKS5 server role: the peer connects to our listener and we push bytes
//!
//! The claimed token is only known after the CONNECT request, so the
//! handshake pauses in `ConnectRead` until the registry either accepts the
//! claim (writing the success reply) or drops the connection.

use s5b_common::RENDEZVOUS_PORT;
use s5b_common::framing::{
    Address, CMD_CONNECT, FrameError, METHOD_NO_ACCEPTABLE, METHOD_NO_AUTH, REPLY_SUCCEEDED,
    decode_connect, decode_greeting, encode_connect_reply, encode_method_selection,
};

use crate::error::EngineError;

use super::close_reason;

/// Progress of a sending handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Initial,
    AuthRead,
    AuthReplied,
    ConnectRead,
    ConnectReplied,
    Streaming,
    /// The greeting offered no usable method; the refusal was produced
    Refused,
}

/// Action requested by a [`SenderHandshake`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderStep {
    /// Wait for more bytes
    NeedMore,
    /// Write these bytes to the peer
    Send(Vec<u8>),
    /// The peer claims this token; resolve it, then `accept` or drop
    Claim(String),
}

/// Server side of the bytestream rendezvous
#[derive(Debug)]
pub struct SenderHandshake {
    state: SenderState,
    buffer: Vec<u8>,
    claim: Option<String>,
}

impl Default for SenderHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl SenderHandshake {
    pub fn new() -> Self {
        Self {
            state: SenderState::Initial,
            buffer: Vec::new(),
            claim: None,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Token claimed by the peer, once its CONNECT request was read
    pub fn claim(&self) -> Option<&str> {
        self.claim.as_deref()
    }

    /// Buffer bytes read from the peer
    ///
    /// Once the success reply is written no further reads are serviced, so
    /// anything the peer sends afterwards is discarded.
    pub fn feed(&mut self, bytes: &[u8]) {
        if matches!(
            self.state,
            SenderState::ConnectReplied | SenderState::Streaming | SenderState::Refused
        ) {
            return;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Advance over buffered bytes
    ///
    /// # Errors
    ///
    /// Returns `NoAcceptableMethod` once the refusal for a greeting without
    /// no-auth was handed out, or `ProtocolViolation` for malformed frames and
    /// commands other than CONNECT.
    pub fn next_step(&mut self) -> Result<SenderStep, EngineError> {
        match self.state {
            SenderState::Initial => self.read_greeting(),
            SenderState::AuthReplied => self.read_connect_request(),
            SenderState::Refused => Err(EngineError::NoAcceptableMethod),
            // AuthRead is transient; the rest wait on the registry or the peer
            SenderState::AuthRead
            | SenderState::ConnectRead
            | SenderState::ConnectReplied
            | SenderState::Streaming => Ok(SenderStep::NeedMore),
        }
    }

    /// Accept the claimed token and build the success reply
    ///
    /// The reply echoes the token as the bound address. Returns `None` unless
    /// a claim is waiting.
    pub fn accept(&mut self) -> Option<Vec<u8>> {
        if self.state != SenderState::ConnectRead {
            return None;
        }
        let claim = self.claim.clone()?;
        let reply =
            encode_connect_reply(REPLY_SUCCEEDED, &Address::Domain(claim), RENDEZVOUS_PORT).ok()?;
        self.state = SenderState::ConnectReplied;
        self.buffer.clear();
        Some(reply)
    }

    /// Enter the data phase
    ///
    /// Returns `true` only on the transition into `Streaming`: `false` if the
    /// reply was not sent yet or the handshake is already streaming.
    pub fn activate(&mut self) -> bool {
        if self.state != SenderState::ConnectReplied {
            return false;
        }
        self.state = SenderState::Streaming;
        true
    }

    /// Why this handshake ended when its socket closed
    pub fn close_reason(&self) -> EngineError {
        let in_frame = matches!(self.state, SenderState::Initial | SenderState::AuthReplied);
        close_reason(&self.buffer, in_frame)
    }

    fn read_greeting(&mut self) -> Result<SenderStep, EngineError> {
        let Some((greeting, used)) = decode_greeting(&self.buffer)? else {
            return Ok(SenderStep::NeedMore);
        };
        self.buffer.drain(..used);
        self.state = SenderState::AuthRead;

        if !greeting.offers_no_auth() {
            self.state = SenderState::Refused;
            return Ok(SenderStep::Send(
                encode_method_selection(METHOD_NO_ACCEPTABLE).to_vec(),
            ));
        }
        self.state = SenderState::AuthReplied;
        Ok(SenderStep::Send(encode_method_selection(METHOD_NO_AUTH).to_vec()))
    }

    fn read_connect_request(&mut self) -> Result<SenderStep, EngineError> {
        let Some((request, used)) = decode_connect(&self.buffer)? else {
            return Ok(SenderStep::NeedMore);
        };
        if request.code != CMD_CONNECT {
            return Err(FrameError::UnsupportedCommand(request.code).into());
        }
        self.buffer.drain(..used);
        self.state = SenderState::ConnectRead;

        let claim = request.address.as_claim();
        self.claim = Some(claim.clone());
        Ok(SenderStep::Claim(claim))
    }
}

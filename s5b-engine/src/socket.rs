//! Non-blocking TCP connection driven by a background task
//!
//! Each `AsyncSocket` owns one spawned task that connects (or adopts an
//! accepted stream), then moves bytes in both directions. The task never
//! touches engine state: it reports readiness as [`SocketEvent`]s on a shared
//! channel that the registry drains one event at a time.
//!
//! Closing a socket, or dropping it, drops its [`Registration`], which aborts
//! the task. Events already queued for a closed socket are discarded by the
//! registry because the socket's route is gone.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

use crate::error::EngineError;

/// Sender half of the channel every socket task reports on
pub type EventSender = mpsc::UnboundedSender<(SocketId, SocketEvent)>;

// =============================================================================
// Identifiers and events
// =============================================================================

/// Registry-assigned socket identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Readiness reported by a socket task
#[derive(Debug)]
pub enum SocketEvent {
    /// The outbound connection completed
    Connected,
    /// Bytes arrived; short reads are normal
    Data(Vec<u8>),
    /// The outbound queue drained to empty
    Flushed,
    /// The connection is gone; no further events follow
    Closed(EngineError),
}

/// Connection state as seen by the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    Closed,
}

// =============================================================================
// Registration
// =============================================================================

/// Owned handle on a socket's background task
///
/// Dropping it aborts the task, which closes the underlying stream.
#[derive(Debug)]
pub struct Registration(JoinHandle<()>);

impl Registration {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self(task)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// =============================================================================
// AsyncSocket
// =============================================================================

/// Non-blocking TCP connection
///
/// Must be created from within a Tokio runtime.
#[derive(Debug)]
pub struct AsyncSocket {
    id: SocketId,
    state: SocketState,
    peer: Option<SocketAddr>,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    registration: Option<Registration>,
}

impl AsyncSocket {
    /// Start connecting to `host:port`
    ///
    /// Failure is reported asynchronously as [`SocketEvent::Closed`] carrying
    /// `ConnectTimeout`, `ConnectRefused` or `ConnectFailed`.
    pub fn connect(
        id: SocketId,
        host: &str,
        port: u16,
        connect_timeout: Duration,
        read_buffer_size: usize,
        events: EventSender,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let host = host.to_string();
        let task = tokio::spawn(async move {
            let connecting = TcpStream::connect((host.as_str(), port));
            let stream = match timeout(connect_timeout, connecting).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    debug!(socket = %id, %host, port, error = %e, "connect failed");
                    let _ = events.send((id, SocketEvent::Closed(EngineError::from_connect(e))));
                    return;
                }
                Err(_) => {
                    debug!(socket = %id, %host, port, "connect timed out");
                    let _ = events.send((id, SocketEvent::Closed(EngineError::ConnectTimeout)));
                    return;
                }
            };
            let _ = stream.set_nodelay(true);
            if events.send((id, SocketEvent::Connected)).is_err() {
                return;
            }
            pump(id, stream, outbound_rx, read_buffer_size, events).await;
        });

        Self {
            id,
            state: SocketState::Connecting,
            peer: None,
            outbound: Some(outbound_tx),
            registration: Some(Registration::new(task)),
        }
    }

    /// Adopt an already connected stream
    pub fn from_stream(
        id: SocketId,
        stream: TcpStream,
        read_buffer_size: usize,
        events: EventSender,
    ) -> Self {
        let peer = stream.peer_addr().ok();
        let _ = stream.set_nodelay(true);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(pump(id, stream, outbound_rx, read_buffer_size, events));

        Self {
            id,
            state: SocketState::Open,
            peer,
            outbound: Some(outbound_tx),
            registration: Some(Registration::new(task)),
        }
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.state == SocketState::Closed
    }

    /// Queue bytes for writing
    ///
    /// Bytes queued while still connecting go out once the connection opens.
    /// Returns `false` if the socket is already closed.
    pub fn send(&self, bytes: Vec<u8>) -> bool {
        match &self.outbound {
            Some(tx) if self.state != SocketState::Closed => tx.send(bytes).is_ok(),
            _ => false,
        }
    }

    /// Close the connection; safe to call repeatedly
    pub fn close(&mut self) {
        if self.state == SocketState::Closed {
            return;
        }
        self.state = SocketState::Closed;
        self.outbound = None;
        self.registration = None;
    }

    /// Track state changes implied by an event from this socket's task
    pub fn observe(&mut self, event: &SocketEvent) {
        match event {
            SocketEvent::Connected => {
                if self.state == SocketState::Connecting {
                    self.state = SocketState::Open;
                }
            }
            SocketEvent::Closed(_) => self.close(),
            SocketEvent::Data(_) | SocketEvent::Flushed => {}
        }
    }
}

impl Drop for AsyncSocket {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Background task
// =============================================================================

/// Move bytes until either direction fails, then report the close
async fn pump(
    id: SocketId,
    stream: TcpStream,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    read_buffer_size: usize,
    events: EventSender,
) {
    let (reader, writer) = stream.into_split();

    let reason = tokio::select! {
        reason = read_loop(id, reader, read_buffer_size, &events) => reason,
        reason = write_loop(id, writer, outbound, &events) => reason,
    };

    if let Some(reason) = reason {
        debug!(socket = %id, reason = %reason, "socket closed");
        let _ = events.send((id, SocketEvent::Closed(reason)));
    }
}

async fn read_loop(
    id: SocketId,
    mut reader: OwnedReadHalf,
    read_buffer_size: usize,
    events: &EventSender,
) -> Option<EngineError> {
    let mut buf = vec![0u8; read_buffer_size];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return Some(EngineError::PeerDisconnected),
            Ok(n) => {
                if events.send((id, SocketEvent::Data(buf[..n].to_vec()))).is_err() {
                    return None;
                }
            }
            Err(e) => {
                debug!(socket = %id, error = %e, "read failed");
                return Some(EngineError::PeerDisconnected);
            }
        }
    }
}

/// Write queued buffers in order, reporting `Flushed` whenever the queue empties
///
/// Returns `None` when the owner dropped its sender.
async fn write_loop(
    id: SocketId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    events: &EventSender,
) -> Option<EngineError> {
    while let Some(bytes) = outbound.recv().await {
        let mut next = Some(bytes);
        while let Some(bytes) = next.take() {
            if let Err(e) = writer.write_all(&bytes).await {
                debug!(socket = %id, error = %e, "write failed");
                return Some(EngineError::PeerDisconnected);
            }
            next = outbound.try_recv().ok();
        }
        if events.send((id, SocketEvent::Flushed)).is_err() {
            return None;
        }
    }
    None
}

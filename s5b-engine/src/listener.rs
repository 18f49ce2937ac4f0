//! Passive socket accepting inbound candidate connections

use std::io;
use std::net::{IpAddr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::socket::Registration;

/// Backlog for pending inbound connections
const LISTEN_BACKLOG: i32 = 128;

/// An accepted connection, tagged with the listener run that produced it
#[derive(Debug)]
pub struct Accepted {
    pub generation: u64,
    pub stream: TcpStream,
    pub peer: SocketAddr,
}

/// Ephemeral-port TCP listener
///
/// Accepted streams go out on the channel given to [`Listener::new`]. Each
/// `start` after a `stop` begins a new generation, so the owner can ignore
/// connections that were queued by an earlier run.
#[derive(Debug)]
pub struct Listener {
    bind_address: IpAddr,
    accepted: mpsc::UnboundedSender<Accepted>,
    generation: u64,
    running: Option<Running>,
}

#[derive(Debug)]
struct Running {
    port: u16,
    _task: Registration,
}

impl Listener {
    pub fn new(bind_address: IpAddr, accepted: mpsc::UnboundedSender<Accepted>) -> Self {
        Self {
            bind_address,
            accepted,
            generation: 0,
            running: None,
        }
    }

    /// Bind an ephemeral port and start accepting
    ///
    /// Idempotent: returns the current port if already running. Must be
    /// called from within a Tokio runtime.
    pub fn start(&mut self) -> io::Result<u16> {
        if let Some(running) = &self.running {
            return Ok(running.port);
        }

        let listener = bind(SocketAddr::new(self.bind_address, 0))?;
        let port = listener.local_addr()?.port();

        self.generation += 1;
        let generation = self.generation;
        let accepted = self.accepted.clone();
        let task = tokio::spawn(accept_loop(listener, generation, accepted));

        info!(port, generation, "listener started");
        self.running = Some(Running {
            port,
            _task: Registration::new(task),
        });
        Ok(port)
    }

    /// Stop accepting; safe to call when not running
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            info!(port = running.port, "listener stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn port(&self) -> Option<u16> {
        self.running.as_ref().map(|r| r.port)
    }

    /// Generation of the current (or most recent) run
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Create a non-blocking listening socket with address reuse enabled
fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}

async fn accept_loop(
    listener: TcpListener,
    generation: u64,
    accepted: mpsc::UnboundedSender<Accepted>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%peer, error = %e, "failed to disable Nagle");
                }
                debug!(%peer, generation, "accepted connection");
                let accepted_conn = Accepted {
                    generation,
                    stream,
                    peer,
                };
                if accepted.send(accepted_conn).is_err() {
                    return;
                }
            }
            Err(e) => {
                // Transient (e.g. EMFILE); keep accepting
                warn!(error = %e, "accept failed");
                tokio::task::yield_now().await;
            }
        }
    }
}

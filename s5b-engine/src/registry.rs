//! Transfer registry: owns every transfer, socket and the listener
//!
//! The registry is an arena. Transfers are stored by [`TransferId`] and own
//! their sockets; inbound connections that have not presented a token yet
//! float in a separate table keyed by [`SocketId`]. Socket tasks and the
//! listener report on channels that [`TransferRegistry::process_next`] drains
//! one event at a time, so every map is mutated from a single place and no
//! locks are needed.
//!
//! Events produced by transfers are re-published to subscribers tagged with
//! the transfer id. A transfer that completes or is interrupted is removed
//! right after its events go out.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{debug, info};

use s5b_common::AuthToken;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::RegistryEvent;
use crate::handshake::{ReceiverHandshake, ReceiverStep, SenderHandshake, SenderState, SenderStep};
use crate::listener::{Accepted, Listener};
use crate::signaling::Signaling;
use crate::socket::{AsyncSocket, EventSender, SocketEvent, SocketId};
use crate::transfer::{Connection, Role, Transfer};
use crate::types::{Candidate, Direction, TransferId, TransferInfo, TransferStatus};

/// Inbound connection whose token is not known yet
#[derive(Debug)]
struct PendingSender {
    socket: AsyncSocket,
    handshake: SenderHandshake,
}

/// Owner of all transfers and their sockets
pub struct TransferRegistry<S: Signaling> {
    config: EngineConfig,
    local_identity: String,
    signaling: S,

    transfers: HashMap<TransferId, Transfer>,
    /// Tokens of send transfers still waiting for their inbound connection
    pending_tokens: HashMap<AuthToken, TransferId>,
    correlations: HashMap<String, TransferId>,
    floating: HashMap<SocketId, PendingSender>,
    /// Owning transfer of every socket bound to one
    routes: HashMap<SocketId, TransferId>,

    listener: Listener,
    socket_tx: EventSender,
    socket_rx: mpsc::UnboundedReceiver<(SocketId, SocketEvent)>,
    accept_rx: mpsc::UnboundedReceiver<Accepted>,
    next_socket: u64,

    subscribers: Vec<mpsc::UnboundedSender<RegistryEvent>>,
}

impl<S: Signaling> TransferRegistry<S> {
    /// Create an empty registry
    ///
    /// `local_identity` is our full address, used for tokens and as the
    /// label of the streamhost we offer.
    pub fn new(config: EngineConfig, local_identity: impl Into<String>, signaling: S) -> Self {
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let listener = Listener::new(config.bind_address, accept_tx);

        Self {
            config,
            local_identity: local_identity.into(),
            signaling,
            transfers: HashMap::new(),
            pending_tokens: HashMap::new(),
            correlations: HashMap::new(),
            floating: HashMap::new(),
            routes: HashMap::new(),
            listener,
            socket_tx,
            socket_rx,
            accept_rx,
            next_socket: 1,
            subscribers: Vec::new(),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Receive every transfer event from now on
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<RegistryEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn transfer(&self, id: TransferId) -> Option<&Transfer> {
        self.transfers.get(&id)
    }

    /// Snapshot of every transfer, ordered by id
    pub fn snapshot(&self) -> Vec<TransferInfo> {
        let mut infos: Vec<TransferInfo> = self.transfers.values().map(Transfer::info).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn active_count(&self) -> usize {
        self.transfers.len()
    }

    /// Inbound connections that have not presented a token yet
    pub fn floating_count(&self) -> usize {
        self.floating.len()
    }

    /// Port of the running listener
    pub fn listener_port(&self) -> Option<u16> {
        self.listener.port()
    }

    pub fn signaling(&self) -> &S {
        &self.signaling
    }

    // =========================================================================
    // Operations from the chat layer
    // =========================================================================

    /// Register an incoming file
    ///
    /// Streamhosts arrive later through [`receive_streamhosts`].
    ///
    /// [`receive_streamhosts`]: Self::receive_streamhosts
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTransfer` if `id` is taken.
    pub fn begin_receive(
        &mut self,
        id: TransferId,
        session_id: &str,
        peer: &str,
        path: impl Into<PathBuf>,
        file_size: u64,
    ) -> Result<&Transfer, EngineError> {
        if self.transfers.contains_key(&id) {
            return Err(EngineError::DuplicateTransfer(id));
        }

        let transfer = Transfer::new(
            id,
            Direction::Receive,
            session_id,
            peer,
            &self.local_identity,
            path,
            file_size,
            self.config.chunk_size(),
        );
        info!(
            transfer = %id,
            %peer,
            size = file_size,
            token = %transfer.token().short(),
            "receive registered"
        );
        Ok(self.transfers.entry(id).or_insert(transfer))
    }

    /// Connect to the streamhosts offered for a receive
    ///
    /// Candidates whose label was already seen are ignored. Returns how many
    /// new connections were opened. If the transfer is left without any
    /// usable candidate it is interrupted and the initiator is told.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTransfer` or `WrongDirection`.
    pub fn receive_streamhosts(
        &mut self,
        id: TransferId,
        correlation_id: &str,
        candidates: &[Candidate],
    ) -> Result<usize, EngineError> {
        let transfer = self
            .transfers
            .get_mut(&id)
            .ok_or(EngineError::UnknownTransfer(id))?;
        if transfer.direction() != Direction::Receive {
            return Err(EngineError::WrongDirection(id));
        }

        transfer.set_correlation_id(correlation_id.to_string());
        self.correlations.insert(correlation_id.to_string(), id);

        let mut opened = 0;
        if transfer.active_socket().is_none() {
            for candidate in candidates {
                if !transfer.add_candidate(&candidate.host, candidate.port, &candidate.label) {
                    debug!(transfer = %id, label = %candidate.label, "duplicate candidate ignored");
                    continue;
                }
                let socket_id = allocate(&mut self.next_socket);
                let socket = AsyncSocket::connect(
                    socket_id,
                    &candidate.host,
                    candidate.port,
                    self.config.connect_timeout(),
                    self.config.read_buffer_size(),
                    self.socket_tx.clone(),
                );
                debug!(
                    transfer = %id,
                    socket = %socket_id,
                    host = %candidate.host,
                    port = candidate.port,
                    label = %candidate.label,
                    "connecting to streamhost"
                );
                transfer.insert_connection(Connection {
                    socket,
                    role: Role::Receiver {
                        handshake: ReceiverHandshake::new(transfer.token()),
                        candidate: candidate.clone(),
                    },
                });
                self.routes.insert(socket_id, id);
                opened += 1;
            }
        }

        if transfer.connection_count() == 0 {
            self.streamhosts_exhausted(id);
        }
        self.publish(id);
        Ok(opened)
    }

    /// Register an outgoing file and offer our streamhost
    ///
    /// Starts the listener if it is not running, then sends the offer
    /// through the signaling layer and records its correlation id.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTransfer` if `id` is taken, `DuplicateSession` if
    /// another send already waits on the same token, or `Io` if the listener
    /// cannot bind.
    pub fn begin_send(
        &mut self,
        id: TransferId,
        session_id: &str,
        peer: &str,
        path: impl Into<PathBuf>,
        file_size: u64,
    ) -> Result<&Transfer, EngineError> {
        if self.transfers.contains_key(&id) {
            return Err(EngineError::DuplicateTransfer(id));
        }
        let token =
            Transfer::compute_auth_token(Direction::Send, session_id, peer, &self.local_identity);
        if self.pending_tokens.contains_key(&token) {
            return Err(EngineError::DuplicateSession(session_id.to_string()));
        }

        let port = self.listener.start()?;
        let mut transfer = Transfer::new(
            id,
            Direction::Send,
            session_id,
            peer,
            &self.local_identity,
            path,
            file_size,
            self.config.chunk_size(),
        );
        self.pending_tokens.insert(token, id);

        transfer.add_candidate(&self.config.advertise_host, port, &self.local_identity);
        let correlation_id = self
            .signaling
            .send_streamhost_offer(peer, session_id, transfer.candidates());
        transfer.set_correlation_id(correlation_id.clone());
        self.correlations.insert(correlation_id.clone(), id);

        info!(
            transfer = %id,
            %peer,
            size = file_size,
            port,
            token = %token.short(),
            correlation = %correlation_id,
            "send registered"
        );
        Ok(self.transfers.entry(id).or_insert(transfer))
    }

    /// The peer chose a streamhost for one of our sends
    ///
    /// Starts streaming on the bound connection. If the peer's connection has
    /// not been bound yet, the activation is applied when it is. Activating a
    /// transfer that already streams is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCorrelation` or `WrongDirection`.
    pub fn activate(&mut self, correlation_id: &str, chosen_label: &str) -> Result<(), EngineError> {
        let id = *self
            .correlations
            .get(correlation_id)
            .ok_or_else(|| EngineError::UnknownCorrelation(correlation_id.to_string()))?;
        let transfer = self
            .transfers
            .get_mut(&id)
            .ok_or(EngineError::UnknownTransfer(id))?;
        if transfer.direction() != Direction::Send {
            return Err(EngineError::WrongDirection(id));
        }
        if transfer.status() != TransferStatus::Initial
            && transfer.status() != TransferStatus::Connected
        {
            debug!(transfer = %id, status = %transfer.status(), "repeated activation ignored");
            return Ok(());
        }

        transfer.set_chosen_label(chosen_label);
        match transfer.active_socket() {
            Some(socket) => {
                info!(transfer = %id, label = %chosen_label, "activated");
                self.start_sending(id, socket);
            }
            None => {
                debug!(transfer = %id, label = %chosen_label, "activation deferred until bind");
                transfer.defer_activation(chosen_label);
            }
        }
        self.publish(id);
        Ok(())
    }

    /// Drop a transfer, closing its sockets
    ///
    /// Stops the listener once no send transfers remain.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTransfer` if `id` is not registered.
    pub fn remove(&mut self, id: TransferId) -> Result<TransferInfo, EngineError> {
        let mut transfer = self
            .transfers
            .remove(&id)
            .ok_or(EngineError::UnknownTransfer(id))?;

        for socket in transfer.close_all_connections() {
            self.routes.remove(&socket);
        }
        transfer.close_file();
        self.pending_tokens.retain(|_, owner| *owner != id);
        self.correlations.retain(|_, owner| *owner != id);

        debug!(transfer = %id, status = %transfer.status(), "transfer removed");

        let sending = self
            .transfers
            .values()
            .any(|t| t.direction() == Direction::Send);
        if !sending && self.listener.is_running() {
            self.listener.stop();
            // Nothing is left for them to match
            self.floating.clear();
        }
        Ok(transfer.info())
    }

    /// Remove every transfer; a no-op when there are none
    pub fn shutdown(&mut self) {
        let ids: Vec<TransferId> = self.transfers.keys().copied().collect();
        for id in ids {
            let _ = self.remove(id);
        }
        self.listener.stop();
        self.floating.clear();
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Wait for one socket or listener event and handle it
    ///
    /// Cancel-safe: the only await is a channel receive, so this can sit in a
    /// `tokio::select!` next to the owner's other work.
    pub async fn process_next(&mut self) {
        tokio::select! {
            Some((socket, event)) = self.socket_rx.recv() => self.on_socket_event(socket, event),
            Some(accepted) = self.accept_rx.recv() => self.on_accepted(accepted),
            else => {}
        }
    }

    fn on_accepted(&mut self, accepted: Accepted) {
        if !self.listener.is_running() || accepted.generation != self.listener.generation() {
            debug!(peer = %accepted.peer, "dropping connection from stopped listener");
            return;
        }

        let socket_id = allocate(&mut self.next_socket);
        let socket = AsyncSocket::from_stream(
            socket_id,
            accepted.stream,
            self.config.read_buffer_size(),
            self.socket_tx.clone(),
        );
        debug!(socket = %socket_id, peer = %accepted.peer, "inbound connection");
        self.floating.insert(
            socket_id,
            PendingSender {
                socket,
                handshake: SenderHandshake::new(),
            },
        );
    }

    fn on_socket_event(&mut self, socket: SocketId, event: SocketEvent) {
        if let Some(pending) = self.floating.remove(&socket) {
            self.on_floating_event(socket, pending, event);
            return;
        }

        let Some(&id) = self.routes.get(&socket) else {
            debug!(%socket, "event for closed socket discarded");
            return;
        };

        let receiving = match self
            .transfers
            .get_mut(&id)
            .and_then(|t| t.connection_mut(socket))
        {
            Some(connection) => {
                connection.socket.observe(&event);
                matches!(connection.role, Role::Receiver { .. })
            }
            None => {
                self.routes.remove(&socket);
                return;
            }
        };

        if receiving {
            self.on_receiver_event(id, socket, event);
        } else {
            self.on_sender_event(id, socket, event);
        }
        self.publish(id);
    }

    // =========================================================================
    // Inbound (send) side
    // =========================================================================

    fn on_floating_event(&mut self, socket: SocketId, mut pending: PendingSender, event: SocketEvent) {
        match event {
            SocketEvent::Data(bytes) => pending.handshake.feed(&bytes),
            SocketEvent::Closed(_) => {
                debug!(
                    %socket,
                    reason = %pending.handshake.close_reason(),
                    "inbound connection closed before binding"
                );
                return;
            }
            SocketEvent::Flushed if pending.handshake.state() == SenderState::Refused => {
                debug!(%socket, "method refusal flushed, closing");
                return;
            }
            SocketEvent::Connected | SocketEvent::Flushed => {
                self.floating.insert(socket, pending);
                return;
            }
        }

        loop {
            match pending.handshake.next_step() {
                Ok(SenderStep::NeedMore) => break,
                Ok(SenderStep::Send(bytes)) => {
                    pending.socket.send(bytes);
                }
                Ok(SenderStep::Claim(claim)) => {
                    self.resolve_claim(socket, pending, &claim);
                    return;
                }
                // Keep the socket until the refusal reaches the peer
                Err(e) if pending.handshake.state() == SenderState::Refused => {
                    debug!(%socket, error = %e, "inbound greeting refused");
                    break;
                }
                Err(e) => {
                    debug!(%socket, error = %e, "inbound handshake failed");
                    return;
                }
            }
        }
        self.floating.insert(socket, pending);
    }

    /// Match a claimed token against pending sends and bind on success
    ///
    /// A claim that matches nothing drops the connection without any event.
    fn resolve_claim(&mut self, socket: SocketId, mut pending: PendingSender, claim: &str) {
        let owner = AuthToken::parse(claim).and_then(|token| self.pending_tokens.remove(&token));
        let Some(id) = owner else {
            debug!(%socket, reason = %EngineError::TokenMismatch, "closing unmatched connection");
            return;
        };
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };

        let Some(reply) = pending.handshake.accept() else {
            return;
        };
        pending.socket.send(reply);

        info!(transfer = %id, %socket, peer = ?pending.socket.peer(), "inbound connection bound");
        transfer.mark_connected();
        transfer.set_active(socket);
        transfer.insert_connection(Connection {
            socket: pending.socket,
            role: Role::Sender(pending.handshake),
        });
        self.routes.insert(socket, id);

        if let Some(label) = transfer.take_pending_activation() {
            info!(transfer = %id, %label, "applying deferred activation");
            self.start_sending(id, socket);
        }
        self.publish(id);
    }

    /// Switch a bound sender to streaming and write the first chunk
    fn start_sending(&mut self, id: TransferId, socket: SocketId) {
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };
        let activated = match transfer.connection_mut(socket) {
            Some(Connection {
                role: Role::Sender(handshake),
                ..
            }) => handshake.activate(),
            _ => false,
        };
        if !activated {
            return;
        }
        transfer.begin_streaming();
        self.send_next_chunk(id, socket);
    }

    /// Write one chunk, or release the socket once the file is exhausted
    fn send_next_chunk(&mut self, id: TransferId, socket: SocketId) {
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };
        match transfer.next_chunk() {
            Some(chunk) => {
                if let Some(connection) = transfer.connection_mut(socket) {
                    connection.socket.send(chunk);
                }
            }
            None => {
                transfer.remove_connection(socket);
                self.routes.remove(&socket);
            }
        }
    }

    fn on_sender_event(&mut self, id: TransferId, socket: SocketId, event: SocketEvent) {
        match event {
            SocketEvent::Flushed => {
                let streaming = self
                    .transfers
                    .get_mut(&id)
                    .and_then(|t| t.connection_mut(socket))
                    .is_some_and(|c| {
                        matches!(&c.role, Role::Sender(hs) if hs.state() == SenderState::Streaming)
                    });
                if streaming {
                    self.send_next_chunk(id, socket);
                }
            }
            SocketEvent::Data(bytes) => {
                if let Some(Connection {
                    role: Role::Sender(handshake),
                    ..
                }) = self
                    .transfers
                    .get_mut(&id)
                    .and_then(|t| t.connection_mut(socket))
                {
                    handshake.feed(&bytes);
                }
            }
            SocketEvent::Closed(_) => {
                self.routes.remove(&socket);
                if let Some(transfer) = self.transfers.get_mut(&id) {
                    let reason = match transfer.remove_connection(socket) {
                        Some(Connection {
                            role: Role::Sender(handshake),
                            ..
                        }) => handshake.close_reason(),
                        _ => EngineError::PeerDisconnected,
                    };
                    transfer.interrupt(&reason);
                }
            }
            SocketEvent::Connected => {}
        }
    }

    // =========================================================================
    // Outbound (receive) side
    // =========================================================================

    fn on_receiver_event(&mut self, id: TransferId, socket: SocketId, event: SocketEvent) {
        match event {
            SocketEvent::Connected => {
                if let Some(Connection {
                    socket: sock,
                    role: Role::Receiver { handshake, .. },
                }) = self
                    .transfers
                    .get_mut(&id)
                    .and_then(|t| t.connection_mut(socket))
                {
                    debug!(transfer = %id, %socket, "streamhost connected");
                    sock.send(handshake.start());
                }
            }
            SocketEvent::Data(bytes) => {
                if let Some(Connection {
                    role: Role::Receiver { handshake, .. },
                    ..
                }) = self
                    .transfers
                    .get_mut(&id)
                    .and_then(|t| t.connection_mut(socket))
                {
                    handshake.feed(&bytes);
                }
                self.drive_receiver(id, socket);
            }
            SocketEvent::Closed(err) => {
                let Some(transfer) = self.transfers.get_mut(&id) else {
                    return;
                };
                let is_active = transfer.active_socket() == Some(socket);
                let reason = match transfer.connection_mut(socket) {
                    Some(Connection {
                        role: Role::Receiver { handshake, .. },
                        ..
                    }) if matches!(err, EngineError::PeerDisconnected) => handshake.close_reason(),
                    _ => err,
                };
                if is_active {
                    transfer.remove_connection(socket);
                    self.routes.remove(&socket);
                    transfer.interrupt(&reason);
                } else {
                    self.candidate_failed(id, socket, &reason);
                }
            }
            SocketEvent::Flushed => {}
        }
    }

    /// Run the receiver handshake over whatever is buffered
    fn drive_receiver(&mut self, id: TransferId, socket: SocketId) {
        loop {
            let Some(transfer) = self.transfers.get_mut(&id) else {
                return;
            };
            let Some(Connection {
                socket: sock,
                role: Role::Receiver {
                    handshake,
                    candidate,
                },
            }) = transfer.connection_mut(socket)
            else {
                return;
            };

            match handshake.next_step() {
                Ok(ReceiverStep::NeedMore) => return,
                Ok(ReceiverStep::Send(bytes)) => {
                    sock.send(bytes);
                }
                Ok(ReceiverStep::Established) => {
                    handshake.begin_streaming();
                    let label = candidate.label.clone();
                    self.candidate_won(id, socket, &label);
                }
                Ok(ReceiverStep::Payload(bytes)) => {
                    if !transfer.append_bytes(&bytes) {
                        transfer.remove_connection(socket);
                        self.routes.remove(&socket);
                        return;
                    }
                }
                Err(e) => {
                    self.candidate_failed(id, socket, &e);
                    return;
                }
            }
        }
    }

    /// First candidate to finish its handshake takes the transfer
    fn candidate_won(&mut self, id: TransferId, socket: SocketId, label: &str) {
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };
        if transfer.active_socket().is_some_and(|active| active != socket) {
            // Lost the race
            if transfer.remove_connection(socket).is_some() {
                self.routes.remove(&socket);
            }
            return;
        }

        transfer.set_active(socket);
        transfer.set_chosen_label(label);
        transfer.mark_connected();
        for loser in transfer.close_other_connections(socket) {
            self.routes.remove(&loser);
        }
        info!(transfer = %id, %socket, %label, "streamhost selected");

        let correlation_id = transfer.correlation_id().unwrap_or_default().to_string();
        self.signaling
            .send_streamhost_result(transfer.peer(), &correlation_id, label);

        transfer.begin_streaming();
        if transfer.status().is_finished() {
            transfer.remove_connection(socket);
            self.routes.remove(&socket);
        }
    }

    /// Drop one candidate; interrupt the receive if none are left
    fn candidate_failed(&mut self, id: TransferId, socket: SocketId, reason: &EngineError) {
        self.routes.remove(&socket);
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };
        transfer.remove_connection(socket);
        debug!(
            transfer = %id,
            %socket,
            reason = %reason,
            remaining = transfer.connection_count(),
            "candidate failed"
        );

        if transfer.connection_count() == 0 && transfer.active_socket().is_none() {
            self.streamhosts_exhausted(id);
        }
    }

    fn streamhosts_exhausted(&mut self, id: TransferId) {
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };
        if transfer.status().is_finished() {
            return;
        }
        transfer.interrupt(&EngineError::StreamhostsExhausted);
        let correlation_id = transfer.correlation_id().unwrap_or_default().to_string();
        self.signaling
            .send_streamhost_error(transfer.peer(), &correlation_id);
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    /// Publish a transfer's queued events and reap it if it has finished
    fn publish(&mut self, id: TransferId) {
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };
        let events = transfer.take_events();
        let finished = transfer.status().is_finished();

        for kind in events {
            let event = RegistryEvent { id, kind };
            self.subscribers
                .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        }

        if finished {
            let _ = self.remove(id);
        }
    }
}

fn allocate(counter: &mut u64) -> SocketId {
    let id = SocketId::new(*counter);
    *counter += 1;
    id
}

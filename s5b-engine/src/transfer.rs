//! Per-transfer state, file I/O and candidate connections
//!
//! A `Transfer` moves one file in one direction. It owns the open file handle
//! and every socket currently racing (receive) or bound (send) for it. State
//! changes queue [`TransferEvent`]s which the registry drains and publishes;
//! the transfer itself never talks to subscribers.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use s5b_common::{AuthToken, FileErrorKind};

use crate::error::EngineError;
use crate::events::TransferEvent;
use crate::handshake::{ReceiverHandshake, SenderHandshake};
use crate::socket::{AsyncSocket, SocketId};
use crate::types::{Candidate, Direction, TransferId, TransferInfo, TransferStatus};

// =============================================================================
// Connections
// =============================================================================

/// Protocol role of a socket owned by a transfer
#[derive(Debug)]
pub(crate) enum Role {
    /// Outbound connection to one of the initiator's streamhosts
    Receiver {
        handshake: ReceiverHandshake,
        candidate: Candidate,
    },
    /// Inbound connection bound to this transfer by its token
    Sender(SenderHandshake),
}

/// A socket and the handshake driving it
#[derive(Debug)]
pub(crate) struct Connection {
    pub socket: AsyncSocket,
    pub role: Role,
}

// =============================================================================
// Transfer
// =============================================================================

/// One file moving between us and a peer
#[derive(Debug)]
pub struct Transfer {
    id: TransferId,
    direction: Direction,
    peer: String,
    session_id: String,
    path: PathBuf,
    file_size: u64,
    bytes_moved: u64,
    status: TransferStatus,
    token: AuthToken,
    candidates: Vec<Candidate>,
    file: Option<File>,
    chunk_size: usize,
    started_at: Instant,

    /// Correlation id of the streamhost offer (send) or of the offer we answer (receive)
    correlation_id: Option<String>,
    /// Activation that arrived before the inbound connection was bound
    pending_activation: Option<String>,
    /// Label of the streamhost that carries the data
    chosen_label: Option<String>,

    events: Vec<TransferEvent>,
    connections: HashMap<SocketId, Connection>,
    active: Option<SocketId>,
}

impl Transfer {
    /// Create a transfer and derive its auth token
    ///
    /// `local_identity` is our own full address; whether it is the
    /// initiator or the target of the token depends on `direction`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TransferId,
        direction: Direction,
        session_id: &str,
        peer: &str,
        local_identity: &str,
        path: impl Into<PathBuf>,
        file_size: u64,
        chunk_size: usize,
    ) -> Self {
        let session_id = session_id.to_string();
        let token = Self::compute_auth_token(direction, &session_id, peer, local_identity);
        Self {
            id,
            direction,
            peer: peer.to_string(),
            session_id,
            path: path.into(),
            file_size,
            bytes_moved: 0,
            status: TransferStatus::Initial,
            token,
            candidates: Vec::new(),
            file: None,
            chunk_size: chunk_size.max(1),
            started_at: Instant::now(),
            correlation_id: None,
            pending_activation: None,
            chosen_label: None,
            events: Vec::new(),
            connections: HashMap::new(),
            active: None,
        }
    }

    /// Token for a session, with identities ordered by role
    ///
    /// The sender offered the streamhosts, so it is always the initiator.
    /// Both peers derive the same value from their own point of view.
    pub fn compute_auth_token(
        direction: Direction,
        session_id: &str,
        peer: &str,
        local_identity: &str,
    ) -> AuthToken {
        match direction {
            Direction::Send => AuthToken::compute(session_id, local_identity, peer),
            Direction::Receive => AuthToken::compute(session_id, peer, local_identity),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn bytes_moved(&self) -> u64 {
        self.bytes_moved
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn token(&self) -> AuthToken {
        self.token
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn chosen_label(&self) -> Option<&str> {
        self.chosen_label.as_deref()
    }

    /// Whether a file handle is currently open
    pub fn has_open_file(&self) -> bool {
        self.file.is_some()
    }

    /// Time since the transfer was created
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Snapshot for the chat layer
    pub fn info(&self) -> TransferInfo {
        TransferInfo {
            id: self.id,
            direction: self.direction,
            peer: self.peer.clone(),
            session_id: self.session_id.clone(),
            path: self.path.clone(),
            file_size: self.file_size,
            bytes_moved: self.bytes_moved,
            status: self.status,
            elapsed: self.elapsed(),
        }
    }

    // -------------------------------------------------------------------------
    // Candidates and signaling state
    // -------------------------------------------------------------------------

    /// Add a streamhost candidate; returns `false` for a duplicate label
    pub fn add_candidate(&mut self, host: &str, port: u16, label: &str) -> bool {
        if self.candidates.iter().any(|c| c.label == label) {
            return false;
        }
        self.candidates.push(Candidate::new(host, port, label));
        true
    }

    pub(crate) fn set_correlation_id(&mut self, correlation_id: String) {
        self.correlation_id = Some(correlation_id);
    }

    pub(crate) fn set_chosen_label(&mut self, label: &str) {
        self.chosen_label = Some(label.to_string());
    }

    pub(crate) fn defer_activation(&mut self, label: &str) {
        self.pending_activation = Some(label.to_string());
    }

    pub(crate) fn take_pending_activation(&mut self) -> Option<String> {
        self.pending_activation.take()
    }

    // -------------------------------------------------------------------------
    // State transitions
    // -------------------------------------------------------------------------

    /// A handshake completed on one of our sockets
    pub fn mark_connected(&mut self) {
        if self.status == TransferStatus::Initial {
            self.status = TransferStatus::Connected;
            debug!(transfer = %self.id, "connected");
        }
    }

    /// Enter the data phase
    ///
    /// Opens the file for the transfer's direction. An empty file completes
    /// immediately.
    pub fn begin_streaming(&mut self) {
        if self.status.is_finished() || self.status == TransferStatus::Transferring {
            return;
        }
        self.status = TransferStatus::Transferring;

        let opened = match self.direction {
            Direction::Send => self.open_for_read(),
            Direction::Receive => self.open_for_write(),
        };
        if let Err(e) = opened {
            self.interrupt(&e);
            return;
        }

        info!(
            transfer = %self.id,
            direction = %self.direction,
            size = self.file_size,
            "streaming started"
        );
        if self.bytes_moved == self.file_size {
            self.complete();
        }
    }

    /// End the transfer with an error
    ///
    /// No-op once the transfer has finished.
    pub fn interrupt(&mut self, reason: &EngineError) {
        if self.status.is_finished() {
            return;
        }
        warn!(
            transfer = %self.id,
            moved = self.bytes_moved,
            size = self.file_size,
            reason = %reason,
            "transfer interrupted"
        );
        self.status = TransferStatus::Interrupted;
        self.close_file();
        self.events.push(TransferEvent::Error(reason.to_string()));
    }

    fn complete(&mut self) {
        if self.status.is_finished() {
            return;
        }
        self.status = TransferStatus::Completed;
        self.close_file();
        info!(
            transfer = %self.id,
            size = self.file_size,
            elapsed_ms = self.elapsed().as_millis() as u64,
            "transfer complete"
        );
        self.events.push(TransferEvent::Complete);
    }

    fn record_progress(&mut self, bytes: u64) {
        self.bytes_moved += bytes;
        self.events.push(TransferEvent::Progress {
            bytes_moved: self.bytes_moved,
            file_size: self.file_size,
        });
    }

    /// Drain events queued since the last call
    pub fn take_events(&mut self) -> Vec<TransferEvent> {
        mem::take(&mut self.events)
    }

    // -------------------------------------------------------------------------
    // File I/O
    // -------------------------------------------------------------------------

    /// Open the source file; reuses an open handle
    ///
    /// # Errors
    ///
    /// Returns `FileIo` with the failure's category.
    pub fn open_for_read(&mut self) -> Result<(), EngineError> {
        if self.file.is_none() {
            let file = File::open(&self.path).map_err(|e| file_error(&e))?;
            if file.metadata().map_err(|e| file_error(&e))?.is_dir() {
                return Err(EngineError::FileIo(FileErrorKind::IsDirectory));
            }
            self.file = Some(file);
        }
        Ok(())
    }

    /// Create (or truncate) the destination file; reuses an open handle
    ///
    /// # Errors
    ///
    /// Returns `FileIo` with the failure's category.
    pub fn open_for_write(&mut self) -> Result<(), EngineError> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path)
                .map_err(|e| file_error(&e))?;
            self.file = Some(file);
        }
        Ok(())
    }

    /// Release the file handle; safe to call repeatedly
    pub fn close_file(&mut self) {
        if let Some(file) = self.file.take()
            && self.direction == Direction::Receive
            && let Err(e) = file.sync_all()
        {
            debug!(transfer = %self.id, error = %e, "sync on close failed");
        }
    }

    /// Write received bytes to the destination file
    ///
    /// Bytes beyond the declared size are discarded. Returns `false` once
    /// the transfer is finished (including when this call finished it).
    pub fn append_bytes(&mut self, buf: &[u8]) -> bool {
        if self.status != TransferStatus::Transferring {
            return false;
        }

        let remaining = self.file_size - self.bytes_moved;
        let take = (buf.len() as u64).min(remaining) as usize;
        if take < buf.len() {
            debug!(
                transfer = %self.id,
                discarded = buf.len() - take,
                "discarding bytes beyond declared size"
            );
        }

        if take > 0 {
            if let Err(e) = self.open_for_write() {
                self.interrupt(&e);
                return false;
            }
            let written = match self.file.as_mut() {
                Some(file) => file.write_all(&buf[..take]),
                None => Ok(()),
            };
            if let Err(e) = written {
                self.interrupt(&file_error(&e));
                return false;
            }
            self.record_progress(take as u64);
        }

        if self.bytes_moved == self.file_size {
            self.complete();
            return false;
        }
        true
    }

    /// Read the next block of the source file
    ///
    /// Returns `None` once every byte was handed out; that call performs the
    /// transition to `Completed`. A file shorter than declared interrupts the
    /// transfer.
    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if self.status != TransferStatus::Transferring {
            return None;
        }

        let remaining = self.file_size - self.bytes_moved;
        if remaining == 0 {
            self.complete();
            return None;
        }

        if let Err(e) = self.open_for_read() {
            self.interrupt(&e);
            return None;
        }

        let want = remaining.min(self.chunk_size as u64);
        let mut chunk = Vec::with_capacity(want as usize);
        let read = match self.file.as_mut() {
            Some(file) => file.take(want).read_to_end(&mut chunk),
            None => Ok(0),
        };
        match read {
            Err(e) => {
                self.interrupt(&file_error(&e));
                None
            }
            Ok(n) if (n as u64) < want => {
                self.interrupt(&EngineError::FileIo(FileErrorKind::Truncated));
                None
            }
            Ok(n) => {
                self.record_progress(n as u64);
                Some(chunk)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Connections
    // -------------------------------------------------------------------------

    pub(crate) fn insert_connection(&mut self, connection: Connection) {
        self.connections.insert(connection.socket.id(), connection);
    }

    pub(crate) fn connection_mut(&mut self, socket: SocketId) -> Option<&mut Connection> {
        self.connections.get_mut(&socket)
    }

    pub(crate) fn remove_connection(&mut self, socket: SocketId) -> Option<Connection> {
        if self.active == Some(socket) {
            self.active = None;
        }
        self.connections.remove(&socket)
    }

    /// Number of sockets still racing or bound
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Socket carrying the data, once chosen
    pub fn active_socket(&self) -> Option<SocketId> {
        self.active
    }

    pub(crate) fn set_active(&mut self, socket: SocketId) {
        self.active = Some(socket);
    }

    /// Close and drop every connection except `keep`
    ///
    /// Returns the ids that were dropped so their routes can be removed.
    pub(crate) fn close_other_connections(&mut self, keep: SocketId) -> Vec<SocketId> {
        let losers: Vec<SocketId> = self
            .connections
            .keys()
            .copied()
            .filter(|id| *id != keep)
            .collect();
        for id in &losers {
            if let Some(mut connection) = self.connections.remove(id) {
                connection.socket.close();
            }
        }
        losers
    }

    /// Close every connection, returning their ids
    pub(crate) fn close_all_connections(&mut self) -> Vec<SocketId> {
        self.active = None;
        self.connections
            .drain()
            .map(|(id, mut connection)| {
                connection.socket.close();
                id
            })
            .collect()
    }
}

fn file_error(err: &std::io::Error) -> EngineError {
    EngineError::FileIo(FileErrorKind::from_io(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn receive(dir: &TempDir, size: u64) -> Transfer {
        Transfer::new(
            TransferId::new(1),
            Direction::Receive,
            "s1",
            "a@x/r",
            "b@x/r",
            dir.path().join("received.bin"),
            size,
            64,
        )
    }

    fn send(path: PathBuf, size: u64, chunk_size: usize) -> Transfer {
        Transfer::new(
            TransferId::new(2),
            Direction::Send,
            "s1",
            "b@x/r",
            "a@x/r",
            path,
            size,
            chunk_size,
        )
    }

    fn count_complete(events: &[TransferEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, TransferEvent::Complete))
            .count()
    }

    #[test]
    fn test_tokens_agree_across_roles() {
        let dir = TempDir::new().unwrap();
        // a@x/r sends to b@x/r; b@x/r receives from a@x/r
        let sender = send(dir.path().join("f"), 1, 1);
        let receiver = receive(&dir, 1);
        assert_eq!(sender.token(), receiver.token());
        assert_eq!(
            sender.token(),
            AuthToken::compute("s1", "a@x/r", "b@x/r")
        );
    }

    #[test]
    fn test_compute_auth_token_orders_by_role() {
        let sent = Transfer::compute_auth_token(Direction::Send, "s1", "b@x/r", "a@x/r");
        let received = Transfer::compute_auth_token(Direction::Receive, "s1", "a@x/r", "b@x/r");
        assert_eq!(sent, received);

        // Swapping roles changes the token
        let swapped = Transfer::compute_auth_token(Direction::Receive, "s1", "b@x/r", "a@x/r");
        assert_ne!(sent, swapped);
        assert_ne!(
            sent,
            Transfer::compute_auth_token(Direction::Send, "s2", "b@x/r", "a@x/r")
        );
    }

    #[test]
    fn test_add_candidate_ignores_duplicate_labels() {
        let dir = TempDir::new().unwrap();
        let mut t = receive(&dir, 1);
        assert!(t.add_candidate("10.0.0.1", 7777, "h1"));
        assert!(!t.add_candidate("10.0.0.2", 8888, "h1"));
        assert!(t.add_candidate("10.0.0.2", 8888, "h2"));
        assert_eq!(t.candidates().len(), 2);
        assert_eq!(t.candidates()[0].host, "10.0.0.1");
    }

    #[test]
    fn test_append_any_split_completes_once() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        for split in [1usize, 7, 64, 333, 999, 1000] {
            let dir = TempDir::new().unwrap();
            let mut t = receive(&dir, data.len() as u64);
            t.begin_streaming();

            let mut chunks = data.chunks(split).peekable();
            while let Some(chunk) = chunks.next() {
                let more = t.append_bytes(chunk);
                assert_eq!(more, chunks.peek().is_some(), "split {split}");
            }

            assert_eq!(t.status(), TransferStatus::Completed);
            assert_eq!(t.bytes_moved(), data.len() as u64);
            assert!(!t.has_open_file());
            assert_eq!(count_complete(&t.take_events()), 1);
            assert_eq!(std::fs::read(t.path()).unwrap(), data);
        }
    }

    #[test]
    fn test_append_never_exceeds_declared_size() {
        let dir = TempDir::new().unwrap();
        let mut t = receive(&dir, 10);
        t.begin_streaming();

        assert!(!t.append_bytes(b"0123456789extra"));
        assert_eq!(t.bytes_moved(), 10);
        assert_eq!(t.status(), TransferStatus::Completed);

        // Later bytes are rejected without another Complete
        assert!(!t.append_bytes(b"more"));
        assert_eq!(t.bytes_moved(), 10);
        assert_eq!(count_complete(&t.take_events()), 1);
        assert_eq!(std::fs::read(t.path()).unwrap(), b"0123456789");
    }

    #[test]
    fn test_append_before_streaming_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut t = receive(&dir, 10);
        assert!(!t.append_bytes(b"abc"));
        assert_eq!(t.bytes_moved(), 0);
    }

    #[test]
    fn test_progress_events() {
        let dir = TempDir::new().unwrap();
        let mut t = receive(&dir, 6);
        t.begin_streaming();
        t.append_bytes(b"abc");
        t.append_bytes(b"def");
        assert_eq!(
            t.take_events(),
            vec![
                TransferEvent::Progress {
                    bytes_moved: 3,
                    file_size: 6
                },
                TransferEvent::Progress {
                    bytes_moved: 6,
                    file_size: 6
                },
                TransferEvent::Complete,
            ]
        );
        assert!(t.take_events().is_empty());
    }

    #[test]
    fn test_zero_length_completes_on_streaming() {
        let dir = TempDir::new().unwrap();
        let mut t = receive(&dir, 0);
        t.begin_streaming();
        assert_eq!(t.status(), TransferStatus::Completed);
        assert_eq!(t.take_events(), vec![TransferEvent::Complete]);
        assert!(t.path().exists());
    }

    #[test]
    fn test_next_chunk_reads_blocks_then_completes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("source.bin");
        std::fs::write(&path, vec![7u8; 1024]).unwrap();

        let mut t = send(path, 1024, 256);
        t.mark_connected();
        t.begin_streaming();

        let mut chunks = 0;
        while let Some(chunk) = t.next_chunk() {
            assert_eq!(chunk.len(), 256);
            chunks += 1;
            // Not complete until exhaustion is observed
            if chunks < 4 {
                assert_eq!(t.status(), TransferStatus::Transferring);
            }
        }
        assert_eq!(chunks, 4);
        assert_eq!(t.status(), TransferStatus::Completed);
        assert_eq!(count_complete(&t.take_events()), 1);
        assert_eq!(t.next_chunk(), None);
    }

    #[test]
    fn test_next_chunk_last_block_is_short() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("source.bin");
        std::fs::write(&path, vec![1u8; 300]).unwrap();

        let mut t = send(path, 300, 256);
        t.begin_streaming();
        assert_eq!(t.next_chunk().unwrap().len(), 256);
        assert_eq!(t.next_chunk().unwrap().len(), 44);
        assert_eq!(t.next_chunk(), None);
        assert_eq!(t.status(), TransferStatus::Completed);
    }

    #[test]
    fn test_file_shorter_than_declared() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, vec![1u8; 100]).unwrap();

        let mut t = send(path, 200, 256);
        t.begin_streaming();
        assert_eq!(t.next_chunk(), None);
        assert_eq!(t.status(), TransferStatus::Interrupted);
        assert_eq!(
            t.take_events(),
            vec![TransferEvent::Error(
                FileErrorKind::Truncated.message().to_string()
            )]
        );
    }

    #[test]
    fn test_missing_source_interrupts() {
        let dir = TempDir::new().unwrap();
        let mut t = send(dir.path().join("missing"), 10, 4);
        t.begin_streaming();
        assert_eq!(t.status(), TransferStatus::Interrupted);
        assert_eq!(
            t.take_events(),
            vec![TransferEvent::Error("File not found".to_string())]
        );
    }

    #[test]
    fn test_directory_destination_interrupts() {
        let dir = TempDir::new().unwrap();
        let mut t = Transfer::new(
            TransferId::new(3),
            Direction::Receive,
            "s1",
            "a@x/r",
            "b@x/r",
            dir.path(),
            10,
            64,
        );
        t.begin_streaming();
        assert_eq!(t.status(), TransferStatus::Interrupted);
        assert!(!t.has_open_file());
    }

    #[test]
    fn test_open_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut t = receive(&dir, 10);
        t.open_for_write().unwrap();
        t.open_for_write().unwrap();
        assert!(t.has_open_file());
        t.close_file();
        t.close_file();
        assert!(!t.has_open_file());
    }

    #[test]
    fn test_interrupt_once() {
        let dir = TempDir::new().unwrap();
        let mut t = receive(&dir, 10);
        t.begin_streaming();
        t.interrupt(&EngineError::PeerDisconnected);
        t.interrupt(&EngineError::PeerDisconnected);
        assert_eq!(t.status(), TransferStatus::Interrupted);
        assert_eq!(
            t.take_events(),
            vec![TransferEvent::Error("peer disconnected".to_string())]
        );
        assert!(!t.append_bytes(b"late"));
    }

    #[test]
    fn test_info_snapshot() {
        let dir = TempDir::new().unwrap();
        let mut t = receive(&dir, 10);
        t.mark_connected();
        let info = t.info();
        assert_eq!(info.id, TransferId::new(1));
        assert_eq!(info.direction, Direction::Receive);
        assert_eq!(info.status, TransferStatus::Connected);
        assert_eq!(info.peer, "a@x/r");
        assert_eq!(info.file_size, 10);
    }
}

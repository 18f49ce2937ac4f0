//! Shared value types

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Caller-assigned transfer identifier, unique within one registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(u64);

impl TransferId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TransferId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a file transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We read the file and push it to the peer
    Send,
    /// The peer pushes the file and we write it
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => write!(f, "send"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

/// Lifecycle of a transfer
///
/// ```text
/// Initial -> Connected -> Transferring -> Completed
///    \___________\______________\______> Interrupted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Initial,
    Connected,
    Transferring,
    Completed,
    Interrupted,
}

impl TransferStatus {
    /// Whether the transfer has reached a final state
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Interrupted)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::Connected => "connected",
            Self::Transferring => "transferring",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// A streamhost endpoint offered by the initiator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub host: String,
    pub port: u16,
    /// Peer-assigned label, echoed back when the candidate is chosen
    pub label: String,
}

impl Candidate {
    pub fn new(host: impl Into<String>, port: u16, label: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            label: label.into(),
        }
    }
}

/// Point-in-time view of a transfer for the chat layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    pub id: TransferId,
    pub direction: Direction,
    pub peer: String,
    pub session_id: String,
    pub path: PathBuf,
    pub file_size: u64,
    pub bytes_moved: u64,
    pub status: TransferStatus,
    pub elapsed: Duration,
}

impl TransferInfo {
    /// Completion ratio in `0.0..=1.0` (an empty file counts as done)
    pub fn fraction(&self) -> f64 {
        if self.file_size == 0 {
            1.0
        } else {
            self.bytes_moved as f64 / self.file_size as f64
        }
    }
}

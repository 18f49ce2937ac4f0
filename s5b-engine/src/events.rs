//! Transfer events delivered to subscribers

use crate::types::TransferId;

/// Something observable happened to one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// More bytes were moved
    Progress { bytes_moved: u64, file_size: u64 },
    /// Every declared byte was moved; emitted exactly once
    Complete,
    /// The transfer was interrupted, with a human-readable reason
    Error(String),
}

/// A transfer event tagged with the transfer it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEvent {
    pub id: TransferId,
    pub kind: TransferEvent,
}

impl RegistryEvent {
    /// Whether this event ends the transfer
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, TransferEvent::Complete | TransferEvent::Error(_))
    }
}

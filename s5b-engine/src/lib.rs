//! SOCKS5 Bytestreams rendezvous engine
//!
//! Establishes a direct TCP channel between two chat participants and moves
//! one file over it. The SOCKS5 handshake serves as a rendezvous: the CONNECT
//! "domain name" carries a SHA-1 token derived from the session id and both
//! identities, which is all that ties an anonymous connection to a transfer.
//!
//! The [`TransferRegistry`] owns everything. Its owner drives it by awaiting
//! [`TransferRegistry::process_next`] in a loop and subscribes to
//! [`RegistryEvent`]s for progress, completion and errors. Stanzas are left
//! to the chat layer through the [`Signaling`] trait.

pub mod config;
pub mod error;
pub mod events;
pub mod handshake;
pub mod listener;
pub mod registry;
pub mod signaling;
pub mod socket;
pub mod transfer;
pub mod types;

pub use config::EngineConfig;
pub use error::EngineError;
pub use events::{RegistryEvent, TransferEvent};
pub use registry::TransferRegistry;
pub use signaling::Signaling;
pub use transfer::Transfer;
pub use types::{Candidate, Direction, TransferId, TransferInfo, TransferStatus};

pub use s5b_common::{AuthToken, FileErrorKind};

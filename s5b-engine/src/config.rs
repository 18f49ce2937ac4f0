//! Engine configuration
//!
//! Every field has a default so the chat application can embed an
//! `EngineConfig` in its own settings file and only override what it needs.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use s5b_common::{DEFAULT_CHUNK_SIZE, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_READ_BUFFER_SIZE};

/// Tunables for the rendezvous engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Address the listener binds to (port is always ephemeral)
    pub bind_address: IpAddr,

    /// Host advertised to peers in streamhost offers
    pub advertise_host: String,

    /// Time allowed for one outbound candidate connection
    pub connect_timeout_secs: u64,

    /// Bytes read from the source file per outbound write
    pub chunk_size: usize,

    /// Size of each socket read
    pub read_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertise_host: Ipv4Addr::LOCALHOST.to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl EngineConfig {
    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Chunk size, never zero
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }

    /// Read buffer size, never zero
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size.max(1)
    }
}

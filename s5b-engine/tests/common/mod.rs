//! Shared helpers for engine integration tests

#![allow(dead_code)]

use std::time::Duration;

use s5b_engine::{Candidate, EngineConfig, RegistryEvent, Signaling, TransferRegistry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

/// Upper bound for any single scenario
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(20);

/// How often `pump_until` rechecks its condition while idle
const TICK: Duration = Duration::from_millis(10);

// ============================================================================
// Signaling
// ============================================================================

/// A streamhost offer captured by [`MockSignaling`]
#[derive(Debug, Clone)]
pub struct Offer {
    pub peer: String,
    pub session_id: String,
    pub candidates: Vec<Candidate>,
    pub correlation_id: String,
}

/// Records every outbound signaling call; correlation ids are "1", "2", ...
#[derive(Debug, Default)]
pub struct MockSignaling {
    pub offers: Vec<Offer>,
    /// (peer, correlation id, chosen label)
    pub results: Vec<(String, String, String)>,
    /// (peer, correlation id)
    pub errors: Vec<(String, String)>,
}

impl Signaling for MockSignaling {
    fn send_streamhost_offer(
        &mut self,
        peer: &str,
        session_id: &str,
        candidates: &[Candidate],
    ) -> String {
        let correlation_id = (self.offers.len() + 1).to_string();
        self.offers.push(Offer {
            peer: peer.to_string(),
            session_id: session_id.to_string(),
            candidates: candidates.to_vec(),
            correlation_id: correlation_id.clone(),
        });
        correlation_id
    }

    fn send_streamhost_result(&mut self, peer: &str, correlation_id: &str, chosen_label: &str) {
        self.results.push((
            peer.to_string(),
            correlation_id.to_string(),
            chosen_label.to_string(),
        ));
    }

    fn send_streamhost_error(&mut self, peer: &str, correlation_id: &str) {
        self.errors.push((peer.to_string(), correlation_id.to_string()));
    }
}

// ============================================================================
// Registry helpers
// ============================================================================

/// Config bound to loopback with a small chunk size
pub fn test_config(chunk_size: usize) -> EngineConfig {
    EngineConfig {
        bind_address: "127.0.0.1".parse().unwrap(),
        advertise_host: "127.0.0.1".to_string(),
        chunk_size,
        connect_timeout_secs: 5,
        ..EngineConfig::default()
    }
}

pub fn test_registry(identity: &str, chunk_size: usize) -> TransferRegistry<MockSignaling> {
    TransferRegistry::new(test_config(chunk_size), identity, MockSignaling::default())
}

/// Drive the registry until `done` holds
///
/// Panics after [`SCENARIO_TIMEOUT`].
pub async fn pump_until<F>(registry: &mut TransferRegistry<MockSignaling>, mut done: F)
where
    F: FnMut(&TransferRegistry<MockSignaling>) -> bool,
{
    let result = timeout(SCENARIO_TIMEOUT, async {
        while !done(registry) {
            tokio::select! {
                _ = registry.process_next() => {}
                _ = sleep(TICK) => {}
            }
        }
    })
    .await;
    assert!(result.is_ok(), "condition not reached in time");
}

/// Everything published so far
pub fn drain(rx: &mut mpsc::UnboundedReceiver<RegistryEvent>) -> Vec<RegistryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Deterministic file content
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ============================================================================
// Raw SOCKS5 peers
// ============================================================================

fn connect_request(domain: &str) -> Vec<u8> {
    let mut request = vec![0x05, 0x01, 0x00, 0x03, domain.len() as u8];
    request.extend_from_slice(domain.as_bytes());
    request.extend_from_slice(&[0x00, 0x00]);
    request
}

/// Act as the receiving client against our listener
///
/// Returns the stream after the CONNECT reply, or `None` if the listener
/// closed the connection instead of replying.
pub async fn socks_client(port: u16, domain: &str) -> Option<TcpStream> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.ok()?;
    stream.write_all(&[0x05, 0x01, 0x00]).await.ok()?;

    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.ok()?;
    assert_eq!(method, [0x05, 0x00]);

    stream.write_all(&connect_request(domain)).await.ok()?;

    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await.ok()?;
    assert_eq!(&header[..4], &[0x05, 0x00, 0x00, 0x03]);
    let mut rest = vec![0u8; header[4] as usize + 2];
    stream.read_exact(&mut rest).await.ok()?;
    assert_eq!(&rest[..rest.len() - 2], domain.as_bytes());
    Some(stream)
}

/// Act as an initiator's streamhost that serves `payload`
///
/// The CONNECT reply and the payload go out in a single write. Returns the
/// token domain the client presented.
pub async fn fake_streamhost(listener: TcpListener, payload: Vec<u8>) -> String {
    let (mut stream, _) = listener.accept().await.unwrap();

    let mut greeting = [0u8; 3];
    stream.read_exact(&mut greeting).await.unwrap();
    assert_eq!(greeting, [0x05, 0x01, 0x00]);
    stream.write_all(&[0x05, 0x00]).await.unwrap();

    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await.unwrap();
    assert_eq!(&header[..4], &[0x05, 0x01, 0x00, 0x03]);
    let mut rest = vec![0u8; header[4] as usize + 2];
    stream.read_exact(&mut rest).await.unwrap();
    let domain = String::from_utf8(rest[..rest.len() - 2].to_vec()).unwrap();

    let mut out = vec![0x05, 0x00, 0x00, 0x03, domain.len() as u8];
    out.extend_from_slice(domain.as_bytes());
    out.extend_from_slice(&[0x00, 0x00]);
    out.extend_from_slice(&payload);
    stream.write_all(&out).await.unwrap();

    // Hold the connection until the receiver lets go
    let mut sink = [0u8; 64];
    while let Ok(n) = stream.read(&mut sink).await {
        if n == 0 {
            break;
        }
    }
    domain
}

/// Accept one connection and never answer; returns once the client closes it
pub async fn silent_streamhost(listener: TcpListener) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut sink = [0u8; 64];
    while let Ok(n) = stream.read(&mut sink).await {
        if n == 0 {
            break;
        }
    }
}

/// A loopback port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

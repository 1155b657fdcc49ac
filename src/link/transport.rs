// Peer transport interface
//
// The delivery loop only needs two things from a link: push one short text
// payload, and know whether a peer is reachable. Connection state has exactly
// one source, a watch channel owned by the transport.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::info;

/// Addressing for one connected peer (device plus the channel written to)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerTarget {
    pub peer: String,
    pub channel: String,
}

impl PeerTarget {
    pub fn new(peer: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            channel: channel.into(),
        }
    }
}

/// `session` is unique per connection, so a drop and reconnect to the same
/// peer is a different state even if nobody observed the gap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected { target: PeerTarget, session: u64 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn target(&self) -> Option<&PeerTarget> {
        match self {
            ConnectionState::Connected { target, .. } => Some(target),
            ConnectionState::Disconnected => None,
        }
    }

    pub fn session(&self) -> Option<u64> {
        match self {
            ConnectionState::Connected { session, .. } => Some(*session),
            ConnectionState::Disconnected => None,
        }
    }
}

/// Error types for a single write attempt
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No peer connected")]
    NotConnected,

    #[error("Peer {peer} rejected payload: {reason}")]
    Rejected { peer: String, reason: String },

    #[error("Timeout writing to peer {peer}")]
    Timeout { peer: String },

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zenoh error: {0}")]
    Zenoh(String),

    #[error("Write task aborted: {0}")]
    Task(String),
}

/// A link to the peripheral
pub trait Transport: Send + Sync + 'static {
    /// Live connection state; every change is a notification
    fn connection(&self) -> watch::Receiver<ConnectionState>;

    fn is_connected(&self) -> bool {
        self.connection().borrow().is_connected()
    }

    /// Single write attempt, no retry
    fn write(
        &self,
        target: &PeerTarget,
        payload: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Owner side of a transport's connection state
#[derive(Debug)]
pub struct ConnectionCell {
    tx: watch::Sender<ConnectionState>,
    sessions: AtomicU64,
}

impl Default for ConnectionCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            tx,
            sessions: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    /// Mark a peer as connected, notifying only on change. Every new
    /// connection gets a fresh session number.
    pub fn connected(&self, target: PeerTarget) {
        let mut opened = None;
        self.tx.send_if_modified(|state| {
            if state.target() == Some(&target) {
                return false;
            }
            let session = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
            *state = ConnectionState::Connected {
                target: target.clone(),
                session,
            };
            opened = Some(session);
            true
        });
        if let Some(session) = opened {
            info!(
                "Peer {} connected on {} (session {})",
                target.peer, target.channel, session
            );
        }
    }

    pub fn disconnected(&self) {
        let changed = self.tx.send_if_modified(|state| {
            if state.is_connected() {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if changed {
            info!("Peer disconnected");
        }
    }
}

// In-process peer for running without hardware
//
// Accepts writes after an optional latency, records every attempt, and can be
// told to reject payloads. Doubles as the transport used in tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use super::transport::{ConnectionCell, ConnectionState, PeerTarget, Transport, TransportError};

pub const SIMULATED_CHANNEL: &str = "simulated";

/// Which payloads the fake peer refuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePlan {
    #[default]
    AcceptAll,
    /// Refuse the `A..,B..,C..` format, accept the fallback
    RejectPrimary,
    RejectAll,
}

pub struct SimulatedTransport {
    peer: String,
    cell: ConnectionCell,
    latency: Duration,
    failures: FailurePlan,
    attempts: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// Counts a write as active until dropped, also when the write is cancelled
struct ActiveWrite<'a>(&'a AtomicUsize);

impl Drop for ActiveWrite<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimulatedTransport {
    /// A fake peer that is not connected yet
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            cell: ConnectionCell::new(),
            latency: Duration::ZERO,
            failures: FailurePlan::AcceptAll,
            attempts: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn connected(peer: impl Into<String>) -> Self {
        let transport = Self::new(peer);
        transport.connect();
        transport
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_failures(mut self, failures: FailurePlan) -> Self {
        self.failures = failures;
        self
    }

    pub fn target(&self) -> PeerTarget {
        PeerTarget::new(self.peer.clone(), SIMULATED_CHANNEL)
    }

    pub fn connect(&self) {
        self.cell.connected(self.target());
    }

    /// Connect after a delay, like a real link negotiating
    pub async fn connect_after(&self, delay: Duration) {
        info!("Simulating connection to {}...", self.peer);
        sleep(delay).await;
        self.connect();
    }

    pub fn disconnect(&self) {
        self.cell.disconnected();
    }

    /// Every payload the peer was asked to accept, in order
    pub fn attempts(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Highest number of writes that were in progress at the same time
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn accepts(&self, payload: &str) -> bool {
        match self.failures {
            FailurePlan::AcceptAll => true,
            FailurePlan::RejectPrimary => !payload.starts_with('A'),
            FailurePlan::RejectAll => false,
        }
    }
}

impl Transport for SimulatedTransport {
    fn connection(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.cell.subscribe()
    }

    async fn write(&self, target: &PeerTarget, payload: &str) -> Result<(), TransportError> {
        let state = self.cell.current();
        if state.target() != Some(target) {
            return Err(TransportError::NotConnected);
        }

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _active = ActiveWrite(&self.active);
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(payload.to_string());

        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        // The connection the write started on must still be the live one
        if self.cell.current().session() != state.session() {
            return Err(TransportError::NotConnected);
        }
        if !self.accepts(payload) {
            return Err(TransportError::Rejected {
                peer: target.peer.clone(),
                reason: "format not understood".to_string(),
            });
        }

        debug!("Simulated peer {} accepted {}", target.peer, payload);
        Ok(())
    }
}

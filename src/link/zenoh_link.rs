// Zenoh link to the platform bridge
//
// The bridge next to the microcontroller declares a liveliness token
// `stewart/peer/<id>` and subscribes to `stewart/link/<id>/legs`.
// Token appearing/disappearing is the connection state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zenoh::Session;
use zenoh::sample::SampleKind;

use super::transport::{ConnectionCell, ConnectionState, PeerTarget, Transport, TransportError};
use crate::config::{LINK_PREFIX, PEER_LIVELINESS};

fn zenoh_err(e: zenoh::Error) -> TransportError {
    TransportError::Zenoh(e.to_string())
}

/// Peer id from a liveliness key (`stewart/peer/esp32` -> `esp32`)
fn peer_id(key: &str) -> Option<&str> {
    key.strip_prefix(PEER_LIVELINESS)?
        .strip_prefix('/')
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

fn peer_target(id: &str) -> PeerTarget {
    PeerTarget::new(id, format!("{}/{}/legs", LINK_PREFIX, id))
}

/// Live peer tokens, and which one the link should use
#[derive(Debug, Default)]
struct PeerTracker {
    preferred: Option<String>,
    live: BTreeSet<String>,
}

impl PeerTracker {
    fn new(preferred: Option<String>) -> Self {
        Self {
            preferred,
            live: BTreeSet::new(),
        }
    }

    fn accepts(&self, id: &str) -> bool {
        self.preferred.as_deref().is_none_or(|p| p == id)
    }

    fn update(&mut self, id: &str, kind: SampleKind) {
        if !self.accepts(id) {
            debug!("Ignoring peer {}", id);
            return;
        }
        match kind {
            SampleKind::Put => {
                self.live.insert(id.to_string());
            }
            SampleKind::Delete => {
                self.live.remove(id);
            }
        }
    }

    /// Keep the current peer while it lives, else fall back to any live one
    fn choose<'a>(&'a self, current: Option<&'a str>) -> Option<&'a str> {
        match current {
            Some(id) if self.live.contains(id) => Some(id),
            _ => self.live.first().map(String::as_str),
        }
    }
}

/// Point the connection at whichever peer the tracker picks
fn follow(cell: &ConnectionCell, tracker: &PeerTracker) {
    let state = cell.current();
    let current = state.target().map(|t| t.peer.as_str());
    let next = tracker.choose(current);
    if next == current {
        return;
    }
    match next {
        Some(id) => {
            if let Some(old) = current {
                info!("Peer {} is gone, switching to {}", old, id);
            }
            cell.connected(peer_target(id));
        }
        None => cell.disconnected(),
    }
}

pub struct ZenohTransport {
    session: Session,
    cell: Arc<ConnectionCell>,
    watcher: JoinHandle<()>,
}

impl ZenohTransport {
    /// Start tracking peers. With `preferred` set, only that peer is used.
    pub async fn open(
        session: Session,
        preferred: Option<String>,
        scan_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let selector = format!("{}/*", PEER_LIVELINESS);
        let cell = Arc::new(ConnectionCell::new());

        // Subscribe before scanning so a token declared in between is not
        // missed; history replays the tokens that are already live
        let tokens = session
            .liveliness()
            .declare_subscriber(selector.as_str())
            .history(true)
            .await
            .map_err(zenoh_err)?;

        let transport_cell = Arc::clone(&cell);
        let mut tracker = PeerTracker::new(preferred.clone());
        let watcher = tokio::spawn(async move {
            while let Ok(sample) = tokens.recv_async().await {
                let Some(id) = peer_id(sample.key_expr().as_str()) else {
                    continue;
                };
                tracker.update(id, sample.kind());
                follow(&cell, &tracker);
            }
            warn!("Peer liveliness stream closed");
            cell.disconnected();
        });

        let transport = Self {
            session,
            cell: transport_cell,
            watcher,
        };

        let peers = transport.scan(scan_timeout).await?;
        if !transport.cell.current().is_connected() {
            let chosen = match &preferred {
                Some(id) => peers.iter().find(|p| *p == id),
                None => peers.first(),
            };
            match chosen {
                Some(id) => transport.cell.connected(peer_target(id)),
                None => info!("No peer found yet, waiting for one to appear"),
            }
        }

        Ok(transport)
    }

    /// List live peers, bounded by `timeout`
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<String>, TransportError> {
        info!("Scanning for peers ({}s)...", timeout.as_secs());
        let replies = self
            .session
            .liveliness()
            .get(format!("{}/*", PEER_LIVELINESS))
            .timeout(timeout)
            .await
            .map_err(zenoh_err)?;

        let mut peers = Vec::new();
        while let Ok(reply) = replies.recv_async().await {
            match reply.result() {
                Ok(sample) => {
                    if let Some(id) = peer_id(sample.key_expr().as_str()) {
                        info!("Found peer {}", id);
                        peers.push(id.to_string());
                    }
                }
                Err(e) => debug!("Liveliness reply error: {:?}", e),
            }
        }
        Ok(peers)
    }
}

impl Drop for ZenohTransport {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

impl Transport for ZenohTransport {
    fn connection(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.cell.subscribe()
    }

    async fn write(&self, target: &PeerTarget, payload: &str) -> Result<(), TransportError> {
        if self.cell.current().target() != Some(target) {
            return Err(TransportError::NotConnected);
        }
        self.session
            .put(target.channel.as_str(), payload.to_string())
            .await
            .map_err(zenoh_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_from_key() {
        assert_eq!(peer_id("stewart/peer/esp32"), Some("esp32"));
        assert_eq!(peer_id("stewart/peer/"), None);
        assert_eq!(peer_id("stewart/peer/a/b"), None);
        assert_eq!(peer_id("stewart/peerless"), None);
        assert_eq!(peer_id("other/peer/esp32"), None);
    }

    #[test]
    fn test_peer_target_channel() {
        let target = peer_target("esp32");
        assert_eq!(target.peer, "esp32");
        assert_eq!(target.channel, "stewart/link/esp32/legs");
    }
    #[test]
    fn test_tracker_falls_back_to_other_live_peer() {
        let mut tracker = PeerTracker::new(None);
        tracker.update("beta", SampleKind::Put);
        tracker.update("alpha", SampleKind::Put);
        assert_eq!(tracker.choose(Some("beta")), Some("beta"));

        tracker.update("beta", SampleKind::Delete);
        assert_eq!(tracker.choose(Some("beta")), Some("alpha"));

        tracker.update("alpha", SampleKind::Delete);
        assert_eq!(tracker.choose(Some("alpha")), None);
    }

    #[test]
    fn test_tracker_sticks_to_preferred_peer() {
        let mut tracker = PeerTracker::new(Some("esp32".to_string()));
        tracker.update("other", SampleKind::Put);
        assert_eq!(tracker.choose(None), None);

        tracker.update("esp32", SampleKind::Put);
        assert_eq!(tracker.choose(None), Some("esp32"));

        tracker.update("esp32", SampleKind::Delete);
        assert_eq!(tracker.choose(Some("esp32")), None);
    }

    #[test]
    fn test_follow_switches_on_delete() {
        let cell = ConnectionCell::new();
        let mut tracker = PeerTracker::new(None);
        tracker.update("alpha", SampleKind::Put);
        tracker.update("beta", SampleKind::Put);
        follow(&cell, &tracker);
        assert_eq!(cell.current().target(), Some(&peer_target("alpha")));

        // A new token does not steal the link
        tracker.update("aaa", SampleKind::Put);
        follow(&cell, &tracker);
        assert_eq!(cell.current().target(), Some(&peer_target("alpha")));

        tracker.update("alpha", SampleKind::Delete);
        follow(&cell, &tracker);
        assert_eq!(cell.current().target(), Some(&peer_target("aaa")));

        tracker.update("aaa", SampleKind::Delete);
        tracker.update("beta", SampleKind::Delete);
        follow(&cell, &tracker);
        assert!(!cell.current().is_connected());
    }

    // Local session without scouting; liveliness and put are routed in-process
    async fn local_session() -> Session {
        let mut config = zenoh::Config::default();
        config.insert_json5("mode", r#""peer""#).unwrap();
        config
            .insert_json5("scouting/multicast/enabled", "false")
            .unwrap();
        config
            .insert_json5("listen/endpoints", r#"["tcp/127.0.0.1:0"]"#)
            .unwrap();
        zenoh::open(config).await.unwrap()
    }

    async fn wait_for_peer(
        rx: &mut tokio::sync::watch::Receiver<ConnectionState>,
        peer: Option<&str>,
    ) -> ConnectionState {
        let wait = rx.wait_for(|state| state.target().map(|t| t.peer.as_str()) == peer);
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("connection state did not change in time")
            .unwrap()
            .clone()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_liveliness_drives_connection() {
        let session = local_session().await;
        let alpha = session
            .liveliness()
            .declare_token("stewart/peer/alpha")
            .await
            .unwrap();

        let transport = ZenohTransport::open(session.clone(), None, Duration::from_millis(500))
            .await
            .unwrap();
        let mut rx = transport.connection();
        let first = wait_for_peer(&mut rx, Some("alpha")).await;

        // A second peer appearing does not take over the link
        let beta = session
            .liveliness()
            .declare_token("stewart/peer/beta")
            .await
            .unwrap();

        // Writes land on the connected peer's channel
        let target = peer_target("alpha");
        let legs = session
            .declare_subscriber(target.channel.as_str())
            .await
            .unwrap();
        transport.write(&target, "A0,B16,C-15").await.unwrap();
        let sample = tokio::time::timeout(Duration::from_secs(5), legs.recv_async())
            .await
            .expect("no payload received")
            .unwrap();
        assert_eq!(sample.payload().to_bytes().as_ref(), b"A0,B16,C-15");

        // Losing the current peer falls back to the one still alive
        alpha.undeclare().await.unwrap();
        let second = wait_for_peer(&mut rx, Some("beta")).await;
        assert_ne!(first.session(), second.session());
        assert!(matches!(
            transport.write(&target, "A0,B0,C0").await,
            Err(TransportError::NotConnected)
        ));

        beta.undeclare().await.unwrap();
        wait_for_peer(&mut rx, None).await;
        assert!(!transport.is_connected());

        drop(transport);
        session.close().await.unwrap();
    }
}

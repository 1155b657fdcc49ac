// Peer link for the platform controller
//
// Provides:
// - Transport trait and connection state (single notification path)
// - Wire payload formats
// - Throttled delivery loop with fallback retry and stale-result guard
// - Zenoh, serial and simulated transports

pub mod delivery;
pub mod payload;
pub mod serial;
pub mod simulated;
pub mod transport;
pub mod zenoh_link;

pub use delivery::{deliver, DeliveryLoop, DeliveryReport, Phase, SendRequest, TransmissionState};
pub use payload::WireFormat;
pub use serial::SerialTransport;
pub use simulated::{FailurePlan, SimulatedTransport};
pub use transport::{ConnectionCell, ConnectionState, PeerTarget, Transport, TransportError};
pub use zenoh_link::ZenohTransport;

// Timeouts, topics, link configuration
use std::time::Duration;

use crate::platform::PlatformConstants;

// Minimum time between two transmissions to the peer
pub const MIN_SEND_INTERVAL: Duration = Duration::from_millis(200);

// Wait after a fresh connection before the first send
pub const CONNECT_SETTLE: Duration = Duration::from_millis(100);

// Peer discovery window, scan is cancelled after this
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

// Joystick radius in logical pixels, offsets beyond it are clamped
pub const MAX_GESTURE_RADIUS: f64 = 50.0;

// Keyboard stick springs back to center after this long without a key
pub const KEY_RELEASE_TIMEOUT: Duration = Duration::from_millis(150);

// Zenoh topics
pub const TOPIC_CONSTANTS: &str = "stewart/config/constants"; // constants updates
pub const TOPIC_LINK_STATE: &str = "stewart/state/link"; // status report
pub const TOPIC_GESTURE: &str = "stewart/input/gesture"; // remote gesture samples
pub const PEER_LIVELINESS: &str = "stewart/peer"; // peers declare tokens below this
pub const LINK_PREFIX: &str = "stewart/link"; // payloads go to <prefix>/<peer>/legs

// Serial link to the microcontroller
pub const SERIAL_BAUDRATE: u32 = 115_200;
pub const SERIAL_TIMEOUT: Duration = Duration::from_millis(100);

/// Which peer link carries the payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LinkKind {
    /// Zenoh session, peer found by liveliness token
    Zenoh,
    /// USB serial port straight to the microcontroller
    Serial,
    /// Fake peer that accepts everything (no hardware needed)
    Simulated,
}

/// Where gesture samples come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum InputKind {
    Keyboard,
    Zenoh,
}

/// Everything `runtime::run` needs, assembled from the command line
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub link: LinkKind,
    pub input: InputKind,
    pub serial_port: Option<String>,
    pub peer: Option<String>,
    pub min_interval: Duration,
    pub connect_settle: Duration,
    pub scan_timeout: Duration,
    pub max_radius: f64,
    pub constants: PlatformConstants,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            link: LinkKind::Simulated,
            input: InputKind::Keyboard,
            serial_port: None,
            peer: None,
            min_interval: MIN_SEND_INTERVAL,
            connect_settle: CONNECT_SETTLE,
            scan_timeout: SCAN_TIMEOUT,
            max_radius: MAX_GESTURE_RADIUS,
            constants: PlatformConstants::default(),
        }
    }
}

// USB-serial link straight to the microcontroller
//
// Frame format: payload ASCII followed by '\n'. The firmware parses one line
// per command; there is no response.

use serialport::SerialPort;
use std::io::{ErrorKind, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::payload::MAX_PAYLOAD_LEN;
use super::transport::{ConnectionCell, ConnectionState, PeerTarget, Transport, TransportError};

pub const SERIAL_CHANNEL: &str = "uart";

/// Line terminator expected by the firmware
const LINE_END: u8 = b'\n';

/// Build a frame, refusing payloads the line protocol cannot carry
fn frame(peer: &str, payload: &str) -> Result<Vec<u8>, TransportError> {
    if !payload.is_ascii() || payload.bytes().any(|b| b == LINE_END || b == b'\r') {
        return Err(TransportError::Rejected {
            peer: peer.to_string(),
            reason: format!("payload {:?} is not a single ASCII line", payload),
        });
    }
    // Firmware line buffer is sized for the longest angle command
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(TransportError::Rejected {
            peer: peer.to_string(),
            reason: format!("payload is {} bytes, limit {}", payload.len(), MAX_PAYLOAD_LEN),
        });
    }
    let mut bytes = Vec::with_capacity(payload.len() + 1);
    bytes.extend_from_slice(payload.as_bytes());
    bytes.push(LINE_END);
    Ok(bytes)
}

pub struct SerialTransport {
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    cell: ConnectionCell,
}

impl SerialTransport {
    /// Open the port; an open port counts as a connected peer
    pub fn open(port_name: &str, baudrate: u32, timeout: Duration) -> Result<Self, TransportError> {
        info!("Opening serial link on {} at {} baud", port_name, baudrate);
        let port = serialport::new(port_name, baudrate).timeout(timeout).open()?;

        let cell = ConnectionCell::new();
        cell.connected(PeerTarget::new(port_name, SERIAL_CHANNEL));

        Ok(Self {
            port: Arc::new(Mutex::new(port)),
            cell,
        })
    }
}

impl Transport for SerialTransport {
    fn connection(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.cell.subscribe()
    }

    async fn write(&self, target: &PeerTarget, payload: &str) -> Result<(), TransportError> {
        if self.cell.current().target() != Some(target) {
            return Err(TransportError::NotConnected);
        }
        let bytes = frame(&target.peer, payload)?;

        // serialport is blocking, keep it off the event loop
        let port = Arc::clone(&self.port);
        let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut port = port.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            port.write_all(&bytes)?;
            port.flush()
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))?;

        match result {
            Ok(()) => {
                debug!("Wrote {} to {}", payload, target.peer);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(TransportError::Timeout {
                peer: target.peer.clone(),
            }),
            Err(e) => {
                // Anything but a timeout means the device went away
                warn!("Serial link {} failed: {}", target.peer, e);
                self.cell.disconnected();
                Err(TransportError::Io(e))
            }
        }
    }
}

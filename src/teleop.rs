// Gesture sources: keyboard virtual stick and remote gesture topic
//
// Keyboard: arrows/WASD deflect the stick, R/F change deflection, Q quits.
// The stick springs back to center when no movement key arrives for a while.

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};
use zenoh::Session;

use crate::config::{KEY_RELEASE_TIMEOUT, TOPIC_GESTURE};
use crate::platform::GestureEvent;

/// Fraction of the stick radius a key press deflects to
const DEFLECTIONS: [f64; 3] = [0.25, 0.5, 1.0];
const DEFLECTION_LABELS: [&str; 3] = ["LOW", "MED", "FULL"];

/// Keyboard poll period (50Hz effective rate)
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyAction {
    Gesture(GestureEvent),
    Deflection(&'static str),
    Quit,
    Ignored,
}

/// Stick state driven by key presses
pub struct KeyboardStick {
    max_radius: f64,
    level: usize,
    dx: f64,
    dy: f64,
    last_movement: Instant,
    released: bool,
}

impl KeyboardStick {
    pub fn new(max_radius: f64) -> Self {
        Self {
            max_radius,
            level: 0,
            dx: 0.0,
            dy: 0.0,
            last_movement: Instant::now(),
            released: true,
        }
    }

    fn deflection(&self) -> f64 {
        DEFLECTIONS[self.level] * self.max_radius
    }

    fn moved(&mut self, now: Instant) -> KeyAction {
        self.last_movement = now;
        self.released = false;
        KeyAction::Gesture(GestureEvent::Move {
            dx: self.dx,
            dy: self.dy,
        })
    }

    /// Apply one key press
    pub fn on_key(&mut self, code: KeyCode, now: Instant) -> KeyAction {
        match code {
            // Screen coordinates: +dx right, +dy down
            KeyCode::Up | KeyCode::Char('w') => {
                self.dy = -self.deflection();
                self.moved(now)
            }
            KeyCode::Down | KeyCode::Char('s') => {
                self.dy = self.deflection();
                self.moved(now)
            }
            KeyCode::Left | KeyCode::Char('a') => {
                self.dx = -self.deflection();
                self.moved(now)
            }
            KeyCode::Right | KeyCode::Char('d') => {
                self.dx = self.deflection();
                self.moved(now)
            }
            KeyCode::Char('r') => {
                self.level = (self.level + 1).min(DEFLECTIONS.len() - 1);
                KeyAction::Deflection(DEFLECTION_LABELS[self.level])
            }
            KeyCode::Char('f') => {
                self.level = self.level.saturating_sub(1);
                KeyAction::Deflection(DEFLECTION_LABELS[self.level])
            }
            KeyCode::Char('q') | KeyCode::Esc => KeyAction::Quit,
            _ => KeyAction::Ignored,
        }
    }

    /// Spring back once movement keys stop
    pub fn tick(&mut self, now: Instant) -> Option<GestureEvent> {
        if self.released || now.saturating_duration_since(self.last_movement) <= KEY_RELEASE_TIMEOUT {
            return None;
        }
        self.released = true;
        self.dx = 0.0;
        self.dy = 0.0;
        Some(GestureEvent::Release)
    }
}

fn read_keys(stick: &mut KeyboardStick, tx: &mpsc::Sender<GestureEvent>) -> std::io::Result<()> {
    loop {
        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                if pressed {
                    match stick.on_key(code, Instant::now()) {
                        KeyAction::Gesture(gesture) => {
                            if tx.blocking_send(gesture).is_err() {
                                return Ok(());
                            }
                        }
                        KeyAction::Deflection(label) => info!("Deflection: {}", label),
                        KeyAction::Quit => return Ok(()),
                        KeyAction::Ignored => {}
                    }
                }
            }
        }

        if let Some(release) = stick.tick(Instant::now()) {
            if tx.blocking_send(release).is_err() {
                return Ok(());
            }
        }
    }
}

/// Read the keyboard on a blocking thread; the sender drops on quit
pub fn spawn_keyboard(
    tx: mpsc::Sender<GestureEvent>,
    max_radius: f64,
) -> std::io::Result<JoinHandle<()>> {
    enable_raw_mode()?;
    info!("Controls: arrows/WASD=tilt, R/F=deflection, Q=quit");

    Ok(tokio::task::spawn_blocking(move || {
        let mut stick = KeyboardStick::new(max_radius);
        if let Err(e) = read_keys(&mut stick, &tx) {
            warn!("Keyboard input failed: {}", e);
        }
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to restore terminal: {}", e);
        }
    }))
}

/// Forward gesture samples published on the bus
pub async fn spawn_remote(
    session: &Session,
    tx: mpsc::Sender<GestureEvent>,
) -> Result<JoinHandle<()>, zenoh::Error> {
    let subscriber = session.declare_subscriber(TOPIC_GESTURE).await?;
    info!("Listening for gestures on {}", TOPIC_GESTURE);

    Ok(tokio::spawn(async move {
        while let Ok(sample) = subscriber.recv_async().await {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<GestureEvent>(&payload) {
                Ok(gesture) => {
                    if tx.send(gesture).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to parse gesture: {}", e),
            }
        }
    }))
}

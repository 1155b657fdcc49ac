// Throttled, non-overlapping delivery of leg angles to the peer
//
// The loop is a small state machine driven from the runtime's event loop:
//   Idle (no peer) -> Ready -> Sending -> Ready -> ... -> Idle
// `offer` decides whether fresh angles go out now, `deliver` performs the
// write (with one fallback retry) and `complete` records the result.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::payload::WireFormat;
use super::transport::{ConnectionState, PeerTarget, Transport};
use crate::log_throttle::{LogCategory, LogThrottle};
use crate::messages::{LinkStatus, SendOutcome};
use crate::platform::LegAngles;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Ready,
    Sending,
}

/// Send bookkeeping, readable by the status display
#[derive(Debug, Clone)]
pub struct TransmissionState {
    pub last_send: Option<Instant>,
    pub min_interval: Duration,
    pub in_flight: bool,
    pub last_outcome: Option<SendOutcome>,
}

/// One write the runtime should perform
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub generation: u64,
    pub target: PeerTarget,
    pub angles: LegAngles,
}

/// Result of `deliver`, tagged with the connection it was sent on
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub generation: u64,
    pub outcome: SendOutcome,
    pub attempts: u8,
    /// Format the peer accepted, if any
    pub accepted: Option<WireFormat>,
}

impl DeliveryReport {
    /// Report for a write task that never finished (cancelled or panicked)
    pub fn aborted(generation: u64) -> Self {
        Self {
            generation,
            outcome: SendOutcome::Failure,
            attempts: 0,
            accepted: None,
        }
    }
}

#[derive(Debug)]
struct Session {
    id: u64,
    target: PeerTarget,
    ready_at: Instant,
}

pub struct DeliveryLoop {
    transmission: TransmissionState,
    session: Option<Session>,
    settle: Duration,
    // Bumped on every connect and disconnect so late results can be recognized
    generation: u64,
    pending: Option<LegAngles>,
    idle_reported: bool,
    logs: LogThrottle,
}

impl DeliveryLoop {
    pub fn new(min_interval: Duration, settle: Duration) -> Self {
        Self {
            transmission: TransmissionState {
                last_send: None,
                min_interval,
                in_flight: false,
                last_outcome: None,
            },
            session: None,
            settle,
            generation: 0,
            pending: None,
            idle_reported: false,
            logs: LogThrottle::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        match (&self.session, self.transmission.in_flight) {
            (None, _) => Phase::Idle,
            (Some(_), true) => Phase::Sending,
            (Some(_), false) => Phase::Ready,
        }
    }

    pub fn transmission(&self) -> &TransmissionState {
        &self.transmission
    }

    pub fn last_outcome(&self) -> Option<SendOutcome> {
        self.transmission.last_outcome
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn peer(&self) -> Option<&PeerTarget> {
        self.session.as_ref().map(|s| &s.target)
    }

    pub fn status(&self) -> LinkStatus {
        match (self.phase(), self.transmission.last_outcome) {
            (Phase::Idle, _) => LinkStatus::Disconnected,
            (_, Some(SendOutcome::Failure)) => LinkStatus::Degraded,
            _ => LinkStatus::Connected,
        }
    }

    /// Mirror the transport's connection state
    pub fn on_connection(&mut self, state: &ConnectionState, now: Instant) {
        match state {
            ConnectionState::Connected { target, session } => {
                if self.session.as_ref().is_some_and(|s| s.id == *session) {
                    return;
                }
                self.generation += 1;
                self.session = Some(Session {
                    id: *session,
                    target: target.clone(),
                    ready_at: now + self.settle,
                });
                self.transmission.in_flight = false;
                self.transmission.last_send = None;
                self.transmission.last_outcome = None;
                self.pending = None;
                self.idle_reported = false;
                info!(
                    "Delivery ready for {} (generation {}, {}ms throttle)",
                    target.peer,
                    self.generation,
                    self.transmission.min_interval.as_millis()
                );
            }
            ConnectionState::Disconnected => {
                if let Some(session) = self.session.take() {
                    self.generation += 1;
                    self.transmission.in_flight = false;
                    self.pending = None;
                    info!("Lost {}, delivery idle", session.target.peer);
                }
            }
        }
    }

    /// Earliest moment a new send may start
    fn eligible_at(&self, session: &Session) -> Instant {
        match self.transmission.last_send {
            Some(last) => (last + self.transmission.min_interval).max(session.ready_at),
            None => session.ready_at,
        }
    }

    /// Offer freshly computed angles. Returns a request when a write should
    /// start now.
    pub fn offer(&mut self, angles: LegAngles, now: Instant) -> Option<SendRequest> {
        match self.phase() {
            Phase::Idle => {
                if !self.idle_reported {
                    info!("No peer connected, angle updates are not sent");
                    self.idle_reported = true;
                }
                None
            }
            Phase::Sending => {
                if self.logs.should_log(LogCategory::Throttle, now) {
                    debug!(
                        "Send in flight, dropping update ({} throttled so far)",
                        self.logs.seen(LogCategory::Throttle)
                    );
                }
                None
            }
            Phase::Ready => {
                let eligible = self.eligible_at(self.session.as_ref()?);
                if now >= eligible {
                    self.begin(angles)
                } else {
                    if self.logs.should_log(LogCategory::Throttle, now) {
                        debug!(
                            "Throttled, holding latest angles for {:?}",
                            eligible.saturating_duration_since(now)
                        );
                    }
                    self.pending = Some(angles);
                    None
                }
            }
        }
    }

    /// When the held angles become sendable, if any are held
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.phase() != Phase::Ready || self.pending.is_none() {
            return None;
        }
        self.session.as_ref().map(|s| self.eligible_at(s))
    }

    /// Release the held angles once the throttle window has opened
    pub fn poll(&mut self, now: Instant) -> Option<SendRequest> {
        let deadline = self.next_deadline()?;
        if now < deadline {
            return None;
        }
        let angles = self.pending.take()?;
        self.begin(angles)
    }

    fn begin(&mut self, angles: LegAngles) -> Option<SendRequest> {
        let target = self.session.as_ref()?.target.clone();
        self.pending = None;
        self.transmission.in_flight = true;
        Some(SendRequest {
            generation: self.generation,
            target,
            angles,
        })
    }

    /// Record the result of a write. Returns false when the report belongs
    /// to an earlier connection and was ignored.
    pub fn complete(&mut self, report: &DeliveryReport, now: Instant) -> bool {
        if report.generation != self.generation || self.session.is_none() {
            debug!(
                "Discarding result from generation {} (current {})",
                report.generation, self.generation
            );
            return false;
        }
        if !self.transmission.in_flight {
            debug!("Result arrived with no send in flight, ignoring");
            return false;
        }

        self.transmission.in_flight = false;
        self.transmission.last_outcome = Some(report.outcome);
        match report.outcome {
            SendOutcome::Success => {
                self.transmission.last_send = Some(now);
            }
            SendOutcome::Failure => {
                // last_send stays put so the next update retries right away
                if self.logs.should_log(LogCategory::Error, now) {
                    warn!("Send failed after {} attempt(s)", report.attempts);
                }
            }
        }
        true
    }
}

/// Write one angle triple, retrying once in the fallback format.
/// Transport errors end up in the report, never in the caller.
pub async fn deliver<T: Transport>(transport: &T, request: SendRequest) -> DeliveryReport {
    let SendRequest {
        generation,
        target,
        angles,
    } = request;

    let primary = WireFormat::Primary.encode(&angles);
    match transport.write(&target, &primary).await {
        Ok(()) => {
            debug!("Sent {} to {}", primary, target.peer);
            return DeliveryReport {
                generation,
                outcome: SendOutcome::Success,
                attempts: 1,
                accepted: Some(WireFormat::Primary),
            };
        }
        Err(e) => {
            warn!("Write {} to {} failed: {}, trying fallback format", primary, target.peer, e);
        }
    }

    let fallback = WireFormat::Fallback.encode(&angles);
    match transport.write(&target, &fallback).await {
        Ok(()) => {
            info!("Sent {} to {} using fallback format", fallback, target.peer);
            DeliveryReport {
                generation,
                outcome: SendOutcome::Success,
                attempts: 2,
                accepted: Some(WireFormat::Fallback),
            }
        }
        Err(e) => {
            warn!("Fallback write {} to {} failed: {}", fallback, target.peer, e);
            DeliveryReport {
                generation,
                outcome: SendOutcome::Failure,
                attempts: 2,
                accepted: None,
            }
        }
    }
}

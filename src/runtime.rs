// Event loop tying gestures, kinematics and the peer link together
//
// Everything runs on one logical thread: gesture events, connection changes,
// constants updates, write results and the throttle timer are all handled by
// a single `select!`. Only the transport write itself runs in a task.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

// local imports
use crate::config::{
    InputKind, LinkKind, RuntimeConfig, SERIAL_BAUDRATE, SERIAL_TIMEOUT, TOPIC_CONSTANTS,
    TOPIC_LINK_STATE,
};
use crate::link::{
    deliver, ConnectionState, DeliveryLoop, DeliveryReport, SendRequest, SerialTransport,
    SimulatedTransport, Transport, ZenohTransport,
};
use crate::log_throttle::{LogCategory, LogThrottle};
use crate::messages::{LinkReport, LinkStatus, SendOutcome};
use crate::platform::{
    compute_leg_angles, ConstantsError, Gesture, GestureEvent, LegAngles, NormalizedInput,
    PlatformConstants,
};
use crate::teleop;

/// Simulated peer takes this long to "connect"
const SIMULATED_CONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(1);
const SIMULATED_PEER: &str = "simulated-esp32";

/// Configuration setter for the platform constants.
/// Every update replaces the whole snapshot.
pub struct ConstantsHandle {
    tx: watch::Sender<PlatformConstants>,
}

impl ConstantsHandle {
    pub fn new(initial: PlatformConstants) -> Result<Self, ConstantsError> {
        initial.validate()?;
        let (tx, _rx) = watch::channel(initial);
        Ok(Self { tx })
    }

    pub fn set(&self, constants: PlatformConstants) -> Result<(), ConstantsError> {
        constants.validate()?;
        self.tx.send_replace(constants);
        info!("Platform constants updated: {:?}", constants);
        Ok(())
    }

    pub fn get(&self) -> PlatformConstants {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlatformConstants> {
        self.tx.subscribe()
    }
}

/// Input -> angles -> delivery decisions, free of any I/O
pub struct Controller {
    gesture: Gesture,
    input: NormalizedInput,
    constants: PlatformConstants,
    angles: Option<LegAngles>,
    delivery: DeliveryLoop,
    logs: LogThrottle,
}

impl Controller {
    pub fn new(gesture: Gesture, constants: PlatformConstants, delivery: DeliveryLoop) -> Self {
        Self {
            gesture,
            input: NormalizedInput::center(),
            constants,
            angles: None,
            delivery,
            logs: LogThrottle::new(),
        }
    }

    pub fn on_gesture(&mut self, event: GestureEvent, now: Instant) -> Option<SendRequest> {
        let input = self.gesture.apply(event);
        if self.logs.should_log(LogCategory::Position, now) {
            debug!("Stick at x={:.2}, y={:.2}", input.x, input.y);
        }
        self.on_input(input, now)
    }

    pub fn on_input(&mut self, input: NormalizedInput, now: Instant) -> Option<SendRequest> {
        self.input = input;
        self.recompute(now)
    }

    /// Swap in a new constants snapshot and recompute for the current input
    pub fn set_constants(&mut self, constants: PlatformConstants, now: Instant) -> Option<SendRequest> {
        self.constants = constants;
        self.recompute(now)
    }

    fn recompute(&mut self, now: Instant) -> Option<SendRequest> {
        match compute_leg_angles(self.input, &self.constants) {
            Ok(angles) => {
                if self.logs.should_log(LogCategory::Angles, now) {
                    debug!("Leg angles: A={} B={} C={}", angles.a, angles.b, angles.c);
                }
                self.angles = Some(angles);
                self.delivery.offer(angles, now)
            }
            Err(e) => {
                // Keep the last reachable pose
                if self.logs.should_log(LogCategory::Kinematics, now) {
                    warn!("{}, holding previous angles", e);
                }
                None
            }
        }
    }

    /// Follow the transport's connection state. A new peer gets the current
    /// pose as soon as it may be sent.
    pub fn on_connection(&mut self, state: &ConnectionState, now: Instant) -> Option<SendRequest> {
        self.delivery.on_connection(state, now);
        match (state.is_connected(), self.angles) {
            (true, Some(angles)) => self.delivery.offer(angles, now),
            _ => None,
        }
    }

    pub fn on_report(&mut self, report: &DeliveryReport, now: Instant) -> bool {
        self.delivery.complete(report, now)
    }

    pub fn poll(&mut self, now: Instant) -> Option<SendRequest> {
        self.delivery.poll(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.delivery.next_deadline()
    }

    pub fn generation(&self) -> u64 {
        self.delivery.generation()
    }

    pub fn angles(&self) -> Option<LegAngles> {
        self.angles
    }

    pub fn input(&self) -> NormalizedInput {
        self.input
    }

    pub fn last_outcome(&self) -> Option<SendOutcome> {
        self.delivery.last_outcome()
    }

    pub fn status(&self) -> LinkStatus {
        self.delivery.status()
    }

    pub fn report(&self) -> LinkReport {
        LinkReport {
            status: self.status(),
            peer: self.delivery.peer().map(|p| p.peer.clone()),
            angles: self.angles,
            last_outcome: self.last_outcome(),
        }
    }
}

/// Runs writes as tasks and funnels their reports back to the loop
struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    reports: mpsc::UnboundedSender<DeliveryReport>,
    in_flight: Option<AbortHandle>,
    logs: LogThrottle,
}

impl<T: Transport> Dispatcher<T> {
    fn new(transport: Arc<T>, reports: mpsc::UnboundedSender<DeliveryReport>) -> Self {
        Self {
            transport,
            reports,
            in_flight: None,
            logs: LogThrottle::new(),
        }
    }

    fn dispatch(&mut self, request: SendRequest) {
        if self.logs.should_log(LogCategory::Transport, Instant::now()) {
            debug!(
                "Dispatching angles {:?} to {} (generation {})",
                request.angles.rounded(),
                request.target.peer,
                request.generation
            );
        }

        let generation = request.generation;
        let transport = Arc::clone(&self.transport);
        let write = tokio::spawn(async move { deliver(transport.as_ref(), request).await });
        self.in_flight = Some(write.abort_handle());

        // A panicking or cancelled write still produces a report
        let reports = self.reports.clone();
        tokio::spawn(async move {
            let report = match write.await {
                Ok(report) => report,
                Err(e) => {
                    if e.is_panic() {
                        warn!("Write task panicked, counting as failure");
                    }
                    DeliveryReport::aborted(generation)
                }
            };
            let _ = reports.send(report);
        });
    }

    /// Abort the current write, its late report is discarded by generation
    fn cancel(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

/// Drive the controller until the gesture source closes
pub async fn drive<T: Transport>(
    transport: Arc<T>,
    mut controller: Controller,
    mut gestures: mpsc::Receiver<GestureEvent>,
    mut constants: watch::Receiver<PlatformConstants>,
    status: watch::Sender<LinkReport>,
) -> Controller {
    let mut connection = transport.connection();
    let (report_tx, mut reports) = mpsc::unbounded_channel();
    let mut dispatcher = Dispatcher::new(transport, report_tx);
    let mut constants_open = true;

    let initial = connection.borrow_and_update().clone();
    if let Some(request) = controller.on_connection(&initial, Instant::now()) {
        dispatcher.dispatch(request);
    }
    publish(&status, controller.report());

    loop {
        let deadline = controller.next_deadline();

        let request = tokio::select! {
            event = gestures.recv() => match event {
                Some(event) => controller.on_gesture(event, Instant::now()),
                None => {
                    info!("Gesture input closed, stopping");
                    break;
                }
            },
            changed = connection.changed() => {
                if changed.is_err() {
                    warn!("Transport went away, stopping");
                    break;
                }
                let state = connection.borrow_and_update().clone();
                let generation = controller.generation();
                let request = controller.on_connection(&state, Instant::now());
                if controller.generation() != generation {
                    dispatcher.cancel();
                }
                request
            },
            changed = constants.changed(), if constants_open => {
                if changed.is_err() {
                    constants_open = false;
                    None
                } else {
                    let snapshot = *constants.borrow_and_update();
                    controller.set_constants(snapshot, Instant::now())
                }
            },
            Some(report) = reports.recv() => {
                controller.on_report(&report, Instant::now());
                None
            },
            _ = async {
                if let Some(at) = deadline {
                    sleep_until(at).await;
                }
            }, if deadline.is_some() => controller.poll(Instant::now()),
        };

        if let Some(request) = request {
            dispatcher.dispatch(request);
        }
        publish(&status, controller.report());
    }

    dispatcher.cancel();
    controller
}

fn publish(status: &watch::Sender<LinkReport>, report: LinkReport) {
    status.send_if_modified(|current| {
        if *current == report {
            false
        } else {
            if current.status != report.status {
                info!("Link status: {:?}", report.status);
            }
            *current = report;
            true
        }
    });
}

pub async fn run(config: RuntimeConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let constants = Arc::new(ConstantsHandle::new(config.constants)?);

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let constants_sub = session.declare_subscriber(TOPIC_CONSTANTS).await?;
    let pub_status = session.declare_publisher(TOPIC_LINK_STATE).await?;

    // Constants updates from the bus, rejected values keep the old snapshot
    let setter = Arc::clone(&constants);
    tokio::spawn(async move {
        while let Ok(sample) = constants_sub.recv_async().await {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<PlatformConstants>(&payload) {
                Ok(update) => {
                    if let Err(e) = setter.set(update) {
                        warn!("Rejected constants: {}", e);
                    }
                }
                Err(e) => warn!("Failed to parse constants: {}", e),
            }
        }
    });

    // Status reports out to the bus
    let initial = LinkReport {
        status: LinkStatus::Disconnected,
        peer: None,
        angles: None,
        last_outcome: None,
    };
    let (status_tx, mut status_rx) = watch::channel(initial);
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let json = match serde_json::to_string(&*status_rx.borrow_and_update()) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to encode status: {}", e);
                    continue;
                }
            };
            if let Err(e) = pub_status.put(json).await {
                warn!("Failed to publish status: {}", e);
            }
        }
    });

    let (gesture_tx, gesture_rx) = mpsc::channel(64);
    match config.input {
        InputKind::Keyboard => {
            teleop::spawn_keyboard(gesture_tx, config.max_radius)?;
        }
        InputKind::Zenoh => {
            teleop::spawn_remote(&session, gesture_tx).await?;
        }
    }

    let controller = Controller::new(
        Gesture::new(config.max_radius),
        constants.get(),
        DeliveryLoop::new(config.min_interval, config.connect_settle),
    );
    let constants_rx = constants.subscribe();

    info!(
        "Runtime started: {:?} link, {:?} input, {}ms throttle",
        config.link,
        config.input,
        config.min_interval.as_millis()
    );
    info!("Constants on: {}, status on: {}", TOPIC_CONSTANTS, TOPIC_LINK_STATE);

    match config.link {
        LinkKind::Zenoh => {
            let transport =
                ZenohTransport::open(session.clone(), config.peer.clone(), config.scan_timeout)
                    .await?;
            drive(Arc::new(transport), controller, gesture_rx, constants_rx, status_tx).await;
        }
        LinkKind::Serial => {
            let port = config
                .serial_port
                .as_deref()
                .ok_or("serial link needs a port (--port)")?;
            let transport = SerialTransport::open(port, SERIAL_BAUDRATE, SERIAL_TIMEOUT)?;
            drive(Arc::new(transport), controller, gesture_rx, constants_rx, status_tx).await;
        }
        LinkKind::Simulated => {
            let peer = config.peer.clone().unwrap_or_else(|| SIMULATED_PEER.to_string());
            let transport = Arc::new(SimulatedTransport::new(peer));
            let connector = Arc::clone(&transport);
            tokio::spawn(async move { connector.connect_after(SIMULATED_CONNECT_DELAY).await });
            drive(transport, controller, gesture_rx, constants_rx, status_tx).await;
        }
    }

    info!("Runtime stopped");
    Ok(())
}

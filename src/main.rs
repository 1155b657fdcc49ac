use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use stewart_link::config::{
    InputKind, LinkKind, RuntimeConfig, CONNECT_SETTLE, MAX_GESTURE_RADIUS, MIN_SEND_INTERVAL,
    SCAN_TIMEOUT,
};
use stewart_link::platform::PlatformConstants;

/// Joystick controller for a 3-leg tilt platform
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Link that carries leg angles to the platform
    #[arg(long, value_enum, default_value = "simulated")]
    link: LinkKind,

    /// Gesture source
    #[arg(long, value_enum, default_value = "keyboard")]
    input: InputKind,

    /// Serial port for --link serial
    #[arg(long)]
    port: Option<String>,

    /// Only talk to this peer id
    #[arg(long)]
    peer: Option<String>,

    /// Minimum time between sends, in milliseconds
    #[arg(long, default_value_t = MIN_SEND_INTERVAL.as_millis() as u64)]
    interval_ms: u64,

    /// Wait after connecting before the first send, in milliseconds
    #[arg(long, default_value_t = CONNECT_SETTLE.as_millis() as u64)]
    settle_ms: u64,

    /// Peer discovery window, in seconds
    #[arg(long, default_value_t = SCAN_TIMEOUT.as_secs())]
    scan_secs: u64,

    /// JSON file with platform constants {d, e, f, g, hz, scale}
    #[arg(long)]
    constants: Option<PathBuf>,
}

fn load_constants(
    path: Option<&PathBuf>,
) -> Result<PlatformConstants, Box<dyn std::error::Error + Send + Sync>> {
    let Some(path) = path else {
        return Ok(PlatformConstants::default());
    };
    let text = std::fs::read_to_string(path)?;
    let constants: PlatformConstants = serde_json::from_str(&text)?;
    constants.validate()?;
    Ok(constants)
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let constants = match load_constants(args.constants.as_ref()) {
        Ok(constants) => constants,
        Err(e) => {
            eprintln!("Invalid constants: {}", e);
            std::process::exit(2);
        }
    };

    let config = RuntimeConfig {
        link: args.link,
        input: args.input,
        serial_port: args.port,
        peer: args.peer,
        min_interval: Duration::from_millis(args.interval_ms),
        connect_settle: Duration::from_millis(args.settle_ms),
        scan_timeout: Duration::from_secs(args.scan_secs),
        max_radius: MAX_GESTURE_RADIUS,
        constants,
    };

    if let Err(e) = stewart_link::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

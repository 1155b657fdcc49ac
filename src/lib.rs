pub mod config;
pub mod link;
pub mod log_throttle;
pub mod messages;
pub mod platform;
pub mod runtime;
pub mod teleop;

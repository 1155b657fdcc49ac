// Per-category log rate limiting
//
// Input and send events fire tens of times per second. Each component that
// logs them owns a LogThrottle and asks it before emitting a line.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// How often a category may produce a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Every event
    Always,
    /// At most once per interval
    Every(Duration),
    /// One event out of n
    OneIn(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    Position,
    Angles,
    Throttle,
    Transport,
    Kinematics,
    Error,
}

impl LogCategory {
    pub fn cadence(self) -> Cadence {
        match self {
            LogCategory::Position => Cadence::Every(Duration::from_secs(1)),
            LogCategory::Angles => Cadence::Every(Duration::from_secs(2)),
            LogCategory::Throttle => Cadence::OneIn(10),
            LogCategory::Transport => Cadence::Every(Duration::from_millis(500)),
            LogCategory::Kinematics => Cadence::Every(Duration::from_secs(1)),
            LogCategory::Error => Cadence::Always,
        }
    }
}

#[derive(Debug, Default)]
pub struct LogThrottle {
    last_logged: HashMap<LogCategory, Instant>,
    seen: HashMap<LogCategory, u32>,
}

impl LogThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event and report whether it should be logged
    pub fn should_log(&mut self, category: LogCategory, now: Instant) -> bool {
        let count = self.seen.entry(category).or_insert(0);
        *count = count.wrapping_add(1);

        match category.cadence() {
            Cadence::Always => true,
            Cadence::OneIn(n) => count.wrapping_sub(1) % n.max(1) == 0,
            Cadence::Every(interval) => match self.last_logged.get(&category) {
                Some(&at) if now.saturating_duration_since(at) < interval => false,
                _ => {
                    self.last_logged.insert(category, now);
                    true
                }
            },
        }
    }

    /// Events seen in a category, logged or not
    pub fn seen(&self, category: LogCategory) -> u32 {
        self.seen.get(&category).copied().unwrap_or(0)
    }
}

// Message types shared by the runtime, the delivery loop and the bus

use serde::{Deserialize, Serialize};

use crate::platform::LegAngles;

/// Result of the most recent transmission
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    Success,
    Failure,
}

/// What the status indicator shows
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Connected,
    /// Connected, but the last send failed
    Degraded,
    Disconnected,
}

/// Status published by runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkReport {
    pub status: LinkStatus,
    pub peer: Option<String>,
    pub angles: Option<LegAngles>,
    pub last_outcome: Option<SendOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_json_shape() {
        let report = LinkReport {
            status: LinkStatus::Degraded,
            peer: Some("esp32".to_string()),
            angles: Some(LegAngles::new(0.19, 0.19, 0.19)),
            last_outcome: Some(SendOutcome::Failure),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["last_outcome"], "failure");
        assert_eq!(json["angles"]["b"], 0.19);
    }
}

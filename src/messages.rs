// Message types emitted by the base monitor

use serde::{Deserialize, Serialize};

use crate::kobuki::{Feedback, Hazards};

/// Whether the base is still talking to us
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackHealth {
    Ok,
    Stale,
}

/// One line of `monitor --json` output
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    Feedback { feedback: Feedback },
    Health { health: FeedbackHealth },
    Hazard { hazards: Hazards, stopped: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_event_json() {
        let event = MonitorEvent::Health {
            health: FeedbackHealth::Stale,
        };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"event":"health","health":"stale"}"#
        );
    }

    #[test]
    fn test_feedback_event_json() {
        let event = MonitorEvent::Feedback {
            feedback: Feedback::Unrecognized { len: 9 },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "feedback");
        assert_eq!(json["feedback"]["kind"], "unrecognized");
        assert_eq!(json["feedback"]["len"], 9);
    }
}

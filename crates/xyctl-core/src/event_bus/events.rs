//! Event type definitions for the controller event queue.
//!
//! Events cross the thread boundary between the worker running a stream and
//! the presentation layer. They are cloneable and serializable for logging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Kind of controller event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Handshake succeeded
    Connected,
    /// Transport closed on request
    Disconnected,
    /// Transport closed after an I/O failure or failed liveness checks
    ConnectionLost,
    /// A move was rejected locally by the soft-limit guard
    LimitViolation,
    /// An alarm was seen and the firmware unlocked
    AlarmRecovered,
    /// A line command got no terminal reply in time
    CommandTimeout,
    /// Firmware answered a line with an error
    CommandRejected,
    /// Origin redefined and envelope activated
    OriginEstablished,
    /// Override pulses or speed command sent
    OverrideApplied,
    /// Feed hold and jog cancel sent
    EmergencyStop,
    /// Cycle start sent
    Resumed,
    /// Stream session started
    StreamStarted,
    /// Stream session finished (normally or by limit abort)
    StreamFinished,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::ConnectionLost => "connection_lost",
            EventKind::LimitViolation => "limit_violation",
            EventKind::AlarmRecovered => "alarm_recovered",
            EventKind::CommandTimeout => "command_timeout",
            EventKind::CommandRejected => "command_rejected",
            EventKind::OriginEstablished => "origin_established",
            EventKind::OverrideApplied => "override_applied",
            EventKind::EmergencyStop => "emergency_stop",
            EventKind::Resumed => "resumed",
            EventKind::StreamStarted => "stream_started",
            EventKind::StreamFinished => "stream_finished",
        };
        write!(f, "{}", name)
    }
}

/// A single controller event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique id
    pub id: Uuid,
    /// What happened
    pub kind: EventKind,
    /// Free-form details (e.g. "detail", "port", "alarm")
    pub payload: BTreeMap<String, String>,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event with an empty payload
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Add a payload entry
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.payload.insert(key.into(), value.to_string());
        self
    }

    /// Look up a payload entry
    pub fn get(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }

    /// Short description for logging
    pub fn description(&self) -> String {
        match self.get("detail") {
            Some(detail) => format!("{}: {}", self.kind, detail),
            None => self.kind.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payload() {
        let event = Event::new(EventKind::LimitViolation)
            .with("detail", "X=21.000 outside [-20.000, 20.000]")
            .with("axis", "X");
        assert_eq!(event.get("axis"), Some("X"));
        assert_eq!(
            event.description(),
            "limit_violation: X=21.000 outside [-20.000, 20.000]"
        );
        assert!(event.get("missing").is_none());
    }

    #[test]
    fn test_event_serializes() {
        let event = Event::new(EventKind::Connected).with("port", "/dev/ttyUSB0");
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"kind\":\"Connected\""));
        assert!(json.contains("/dev/ttyUSB0"));
    }
}

// Common types for Port Forward

use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime state of the single forwarding listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Stopped,        // nothing bound
    Starting,       // engine start in flight
    Listening(u16), // bound and accepting on this port
    Stopping,       // engine stop in flight
    Failed(String), // last transition failed (reason)
}

impl ListenerState {
    /// Check if a start/stop transition is in flight
    pub fn is_in_progress(&self) -> bool {
        matches!(self, ListenerState::Starting | ListenerState::Stopping)
    }

    /// Port currently being served, if any
    pub fn listening_port(&self) -> Option<u16> {
        match self {
            ListenerState::Listening(port) => Some(*port),
            _ => None,
        }
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerState::Stopped => write!(f, "stopped"),
            ListenerState::Starting => write!(f, "starting"),
            ListenerState::Listening(port) => write!(f, "listening on :{}", port),
            ListenerState::Stopping => write!(f, "stopping"),
            ListenerState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Info,
    Error,
}

/// Notice published by the controller after a transition settles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "lowercase")]
pub enum Event {
    Info(String),
    Error(String),
}

impl Event {
    pub fn info(message: impl Into<String>) -> Self {
        Event::Info(message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Event::Error(message.into())
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Info(_) => EventKind::Info,
            Event::Error(_) => EventKind::Error,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Event::Info(message) | Event::Error(message) => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_progress_states() {
        assert!(ListenerState::Starting.is_in_progress());
        assert!(ListenerState::Stopping.is_in_progress());
        assert!(!ListenerState::Stopped.is_in_progress());
        assert!(!ListenerState::Listening(9090).is_in_progress());
        assert!(!ListenerState::Failed("x".into()).is_in_progress());
    }

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_string(&Event::info("listening on :9090")).unwrap();
        assert_eq!(json, r#"{"kind":"info","message":"listening on :9090"}"#);

        let back: Event = serde_json::from_str(r#"{"kind":"error","message":"port busy"}"#).unwrap();
        assert_eq!(back, Event::error("port busy"));
        assert_eq!(back.kind(), EventKind::Error);
        assert_eq!(back.message(), "port busy");
    }
}

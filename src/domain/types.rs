//! Shared types for NVR event envelopes

use serde::Deserialize;
use std::time::Instant;

/// Lifecycle phase of an upstream NVR event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    New,
    Update,
    End,
    #[serde(other)]
    Other,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::New => "new",
            EventKind::Update => "update",
            EventKind::End => "end",
            EventKind::Other => "other",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked-object state as reported by the NVR in `before`/`after`
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectState {
    pub id: String,
    pub camera: String,
    pub label: String,
    #[serde(default)]
    pub current_zones: Vec<String>,
    #[serde(default)]
    pub entered_zones: Vec<String>,
    /// Epoch seconds when the NVR first saw the object
    #[serde(default)]
    pub start_time: Option<f64>,
}

/// Raw event envelope published on the NVR events topic
#[derive(Debug, Deserialize)]
pub struct NvrEnvelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub before: Option<ObjectState>,
    #[serde(default)]
    pub after: Option<ObjectState>,
}

/// Parsed event for internal processing
///
/// The event kind travels with the event rather than through any shared
/// state, so concurrent tasks for different events never observe each
/// other's lifecycle phase.
#[derive(Debug, Clone)]
pub struct VehicleEvent {
    pub kind: EventKind,
    pub after: ObjectState,
    pub received_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_from_json() {
        let envelope: NvrEnvelope =
            serde_json::from_str(r#"{"type": "new", "after": null}"#).unwrap();
        assert_eq!(envelope.kind, EventKind::New);

        let envelope: NvrEnvelope =
            serde_json::from_str(r#"{"type": "end", "after": null}"#).unwrap();
        assert_eq!(envelope.kind, EventKind::End);

        let envelope: NvrEnvelope =
            serde_json::from_str(r#"{"type": "something_else", "after": null}"#).unwrap();
        assert_eq!(envelope.kind, EventKind::Other);
    }

    #[test]
    fn test_object_state_defaults() {
        let state: ObjectState = serde_json::from_str(
            r#"{"id": "e1", "camera": "drive", "label": "car"}"#,
        )
        .unwrap();
        assert!(state.current_zones.is_empty());
        assert!(state.entered_zones.is_empty());
        assert!(state.start_time.is_none());
    }
}

//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client for receiving NVR detection events
//! - `ha_egress` - Home Assistant discovery publisher and egress channel
//! - `nvr` - HTTP client for camera snapshots
//! - `recognizer` - opaque plate-recognition interface + REST adapter
//! - `snapshots` - annotated snapshot persistence and retention
//! - `store` - SQLite plate store (dedupe and match state)

pub mod ha_egress;
pub mod mqtt;
pub mod nvr;
pub mod recognizer;
pub mod snapshots;
pub mod store;

// Re-export commonly used types
pub use ha_egress::{create_ha_channel, publish_stored, HaPublisher, HaSender};
pub use nvr::{NvrClient, SnapshotSource};
pub use recognizer::{PlateReading, PlateRecognizer, RestRecognizer};
pub use snapshots::SnapshotWriter;
pub use store::PlateStore;

//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `dispatcher` - central event router and worker-pool fan-out
//! - `filter` - eligibility filtering for inbound events
//! - `matcher` - fuzzy watch-list matching
//! - `detection` - per-event recognition attempts
//! - `trigger` - zone-trigger gating for deferred notifications
//! - `direction` - one-shot vehicle direction inference

pub mod detection;
pub mod direction;
pub mod dispatcher;
pub mod filter;
pub mod matcher;
pub mod trigger;

// Re-export commonly used types
pub use detection::DetectionRunner;
pub use direction::DirectionDetector;
pub use dispatcher::Dispatcher;
pub use filter::EventFilter;
pub use matcher::{MatchOutcome, MatchPolicy, PlateMatcher};
pub use trigger::TriggerGate;

//! Persistent plate record and the partial-field patch used to upsert it

use chrono::{DateTime, Utc};

/// Inferred travel direction for a vehicle, computed at most once per event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleDirection {
    Entering,
    Exiting,
    Unknown,
}

impl VehicleDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleDirection::Entering => "entering",
            VehicleDirection::Exiting => "exiting",
            VehicleDirection::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for VehicleDirection {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "entering" => VehicleDirection::Entering,
            "exiting" => VehicleDirection::Exiting,
            _ => VehicleDirection::Unknown,
        })
    }
}

/// One row per upstream event id
///
/// Tri-state booleans stay `None` until a component decides them;
/// `is_plate_matched` in particular is never written as `false`, so an
/// unmatched attempt leaves the next update free to retry.
#[derive(Debug, Clone)]
pub struct PlateRecord {
    pub event_id: String,
    pub camera_name: Option<String>,
    pub detected_plate: Option<String>,
    pub matched_plate: Option<String>,
    pub vehicle_owner: Option<String>,
    pub vehicle_brand: Option<String>,
    pub fuzzy_score: Option<f64>,
    pub is_plate_matched: Option<bool>,
    pub is_trigger_zone_reached: Option<bool>,
    pub trigger_zones: Vec<String>,
    pub entered_zones: Vec<String>,
    pub vehicle_direction: Option<VehicleDirection>,
    pub image_path: Option<String>,
    pub detection_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PlateRecord {
    /// Terminal state: a watch-list match has been confirmed for this event
    pub fn is_matched(&self) -> bool {
        self.is_plate_matched == Some(true)
    }

    pub fn is_trigger_satisfied(&self) -> bool {
        self.is_trigger_zone_reached == Some(true)
    }
}

/// Partial field set for an upsert; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub camera_name: Option<String>,
    pub detected_plate: Option<String>,
    pub matched_plate: Option<String>,
    pub vehicle_owner: Option<String>,
    pub vehicle_brand: Option<String>,
    pub fuzzy_score: Option<f64>,
    pub is_plate_matched: Option<bool>,
    pub is_trigger_zone_reached: Option<bool>,
    pub trigger_zones: Option<Vec<String>>,
    pub entered_zones: Option<Vec<String>>,
    pub vehicle_direction: Option<VehicleDirection>,
    pub image_path: Option<String>,
    pub detection_time: Option<DateTime<Utc>>,
}

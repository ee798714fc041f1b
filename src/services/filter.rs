//! Eligibility filtering for inbound NVR events
//!
//! Pure predicate over the event's `after` state. Empty allow-lists mean
//! allow-all; the configured cameras map doubles as the camera allow-list.

use crate::domain::ObjectState;
use crate::infra::config::Config;
use tracing::debug;

pub struct EventFilter {
    cameras: Vec<String>,
    zones: Vec<String>,
    objects: Vec<String>,
}

impl EventFilter {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cameras: config.cameras().keys().cloned().collect(),
            zones: config.zones().to_vec(),
            objects: config.objects().to_vec(),
        }
    }

    #[cfg(test)]
    pub fn new(cameras: Vec<String>, zones: Vec<String>, objects: Vec<String>) -> Self {
        Self { cameras, zones, objects }
    }

    /// Whether this event should be processed at all
    pub fn is_eligible(&self, after: &ObjectState) -> bool {
        let matching_camera = self.cameras.is_empty() || self.cameras.contains(&after.camera);
        let matching_zone = self.zones.is_empty()
            || after.current_zones.iter().any(|zone| self.zones.contains(zone));

        if !(matching_camera && matching_zone) {
            debug!(
                event_id = %after.id,
                camera = %after.camera,
                "event_skipped: camera/zone not configured"
            );
            return false;
        }

        if !self.objects.contains(&after.label) {
            debug!(event_id = %after.id, label = %after.label, "event_skipped: label not allowed");
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(camera: &str, label: &str, current_zones: &[&str]) -> ObjectState {
        ObjectState {
            id: "e1".to_string(),
            camera: camera.to_string(),
            label: label.to_string(),
            current_zones: current_zones.iter().map(|z| z.to_string()).collect(),
            entered_zones: Vec::new(),
            start_time: None,
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn default_objects() -> Vec<String> {
        strings(&["car", "motorcycle", "bus"])
    }

    #[test]
    fn test_empty_allow_lists_allow_all() {
        let filter = EventFilter::new(Vec::new(), Vec::new(), default_objects());
        assert!(filter.is_eligible(&state("anything", "car", &[])));
    }

    #[test]
    fn test_camera_allow_list() {
        let filter = EventFilter::new(strings(&["drive"]), Vec::new(), default_objects());
        assert!(filter.is_eligible(&state("drive", "car", &[])));
        assert!(!filter.is_eligible(&state("garage", "car", &[])));
    }

    #[test]
    fn test_zone_allow_list() {
        let filter = EventFilter::new(Vec::new(), strings(&["driveway"]), default_objects());
        assert!(filter.is_eligible(&state("drive", "car", &["driveway", "lawn"])));
        assert!(!filter.is_eligible(&state("drive", "car", &["lawn"])));
        assert!(!filter.is_eligible(&state("drive", "car", &[])));
    }

    #[test]
    fn test_label_rejected_even_when_camera_and_zone_match() {
        let filter = EventFilter::new(strings(&["drive"]), strings(&["driveway"]), default_objects());
        assert!(!filter.is_eligible(&state("drive", "person", &["driveway"])));
    }

    #[test]
    fn test_label_allow_list() {
        let filter = EventFilter::new(Vec::new(), Vec::new(), default_objects());
        assert!(filter.is_eligible(&state("drive", "motorcycle", &[])));
        assert!(filter.is_eligible(&state("drive", "bus", &[])));
        assert!(!filter.is_eligible(&state("drive", "bicycle", &[])));
    }

    #[test]
    fn test_from_config_uses_camera_map_keys() {
        use crate::infra::config::CameraConfig;
        let config = Config::default().with_camera("drive", CameraConfig::default());
        let filter = EventFilter::from_config(&config);
        assert!(filter.is_eligible(&state("drive", "car", &[])));
        assert!(!filter.is_eligible(&state("garage", "car", &[])));
    }
}

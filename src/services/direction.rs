//! One-shot vehicle direction inference
//!
//! The first reported zone membership is compared against the camera's
//! configured first/last zone markers. The result is persisted once; any
//! stored direction, including `unknown`, suppresses recomputation.

use crate::domain::{ObjectState, RecordPatch, VehicleDirection};
use crate::infra::config::Config;
use crate::io::PlateStore;
use tracing::{debug, info};

pub struct DirectionDetector {
    store: PlateStore,
    config: Config,
}

impl DirectionDetector {
    pub fn new(store: PlateStore, config: Config) -> Self {
        Self { store, config }
    }

    /// Infer and persist the direction for this event, at most once
    pub async fn infer(&self, event: &ObjectState) -> anyhow::Result<()> {
        let event_id = &event.id;

        let Some(zone) = event.current_zones.first() else {
            debug!(event_id = %event_id, "direction_skipped: no current zones");
            return Ok(());
        };
        let Some(markers) =
            self.config.camera(&event.camera).and_then(|camera| camera.direction.as_ref())
        else {
            debug!(event_id = %event_id, camera = %event.camera, "direction_inert: not configured");
            return Ok(());
        };

        if let Some(record) = self.store.get(event_id).await? {
            if let Some(direction) = record.vehicle_direction {
                debug!(
                    event_id = %event_id,
                    direction = %direction.as_str(),
                    "direction_skipped: already set"
                );
                return Ok(());
            }
        }

        let direction = infer_direction(
            zone,
            markers.first_zone.as_deref(),
            markers.last_zone.as_deref(),
        );

        self.store
            .upsert(
                event_id,
                RecordPatch {
                    camera_name: Some(event.camera.clone()),
                    vehicle_direction: Some(direction),
                    ..Default::default()
                },
            )
            .await?;
        info!(
            event_id = %event_id,
            zone = %zone,
            direction = %direction.as_str(),
            "direction_inferred"
        );
        Ok(())
    }
}

fn infer_direction(
    zone: &str,
    first_zone: Option<&str>,
    last_zone: Option<&str>,
) -> VehicleDirection {
    if first_zone.is_some_and(|first| first.eq_ignore_ascii_case(zone)) {
        VehicleDirection::Entering
    } else if last_zone.is_some_and(|last| last.eq_ignore_ascii_case(zone)) {
        VehicleDirection::Exiting
    } else {
        VehicleDirection::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::{CameraConfig, DirectionZones};

    fn config() -> Config {
        Config::default().with_camera(
            "drive",
            CameraConfig {
                trigger_zones: Vec::new(),
                direction: Some(DirectionZones {
                    first_zone: Some("north".to_string()),
                    last_zone: Some("south".to_string()),
                }),
            },
        )
    }

    fn event(camera: &str, current_zones: &[&str]) -> ObjectState {
        ObjectState {
            id: "e1".to_string(),
            camera: camera.to_string(),
            label: "car".to_string(),
            current_zones: current_zones.iter().map(|z| z.to_string()).collect(),
            entered_zones: Vec::new(),
            start_time: None,
        }
    }

    async fn detector() -> (DirectionDetector, PlateStore) {
        let store = PlateStore::open_in_memory().await.unwrap();
        (DirectionDetector::new(store.clone(), config()), store)
    }

    #[test]
    fn test_infer_direction() {
        assert_eq!(
            infer_direction("north", Some("north"), Some("south")),
            VehicleDirection::Entering
        );
        assert_eq!(
            infer_direction("south", Some("north"), Some("south")),
            VehicleDirection::Exiting
        );
        assert_eq!(
            infer_direction("east", Some("north"), Some("south")),
            VehicleDirection::Unknown
        );
        assert_eq!(infer_direction("north", None, None), VehicleDirection::Unknown);
        // comparison ignores case
        assert_eq!(
            infer_direction("NORTH", Some("north"), None),
            VehicleDirection::Entering
        );
    }

    #[tokio::test]
    async fn test_entering_persisted() {
        let (detector, store) = detector().await;
        detector.infer(&event("drive", &["north"])).await.unwrap();

        let record = store.get("e1").await.unwrap().unwrap();
        assert_eq!(record.vehicle_direction, Some(VehicleDirection::Entering));
    }

    #[tokio::test]
    async fn test_exiting_persisted() {
        let (detector, store) = detector().await;
        detector.infer(&event("drive", &["south"])).await.unwrap();

        let record = store.get("e1").await.unwrap().unwrap();
        assert_eq!(record.vehicle_direction, Some(VehicleDirection::Exiting));
    }

    #[tokio::test]
    async fn test_unmarked_zone_persists_unknown() {
        let (detector, store) = detector().await;
        detector.infer(&event("drive", &["east"])).await.unwrap();

        let record = store.get("e1").await.unwrap().unwrap();
        assert_eq!(record.vehicle_direction, Some(VehicleDirection::Unknown));
    }

    #[tokio::test]
    async fn test_runs_at_most_once() {
        let (detector, store) = detector().await;
        detector.infer(&event("drive", &["north"])).await.unwrap();
        // Later zones must not change the stored direction
        detector.infer(&event("drive", &["south"])).await.unwrap();

        let record = store.get("e1").await.unwrap().unwrap();
        assert_eq!(record.vehicle_direction, Some(VehicleDirection::Entering));
    }

    #[tokio::test]
    async fn test_noop_without_zones() {
        let (detector, store) = detector().await;
        detector.infer(&event("drive", &[])).await.unwrap();
        assert!(store.get("e1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_noop_without_direction_config() {
        let store = PlateStore::open_in_memory().await.unwrap();
        let config = Config::default().with_camera("drive", CameraConfig::default());
        let detector = DirectionDetector::new(store.clone(), config);

        detector.infer(&event("drive", &["north"])).await.unwrap();
        assert!(store.get("e1").await.unwrap().is_none());
    }
}

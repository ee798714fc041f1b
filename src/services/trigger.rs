//! Zone-trigger gating for deferred notifications
//!
//! Runs on every eligible event. When a plate-matched record is still
//! waiting on its trigger zone, a non-empty intersection between the
//! camera's configured trigger zones and the vehicle's entered zones flips
//! `is_trigger_zone_reached` and releases the pending notification. The
//! flag never reverts, so the gate emits at most once per event.

use crate::domain::{ObjectState, RecordPatch};
use crate::infra::config::Config;
use crate::io::ha_egress::{publish_stored, HaSender};
use crate::io::PlateStore;
use tracing::{debug, info};

pub struct TriggerGate {
    store: PlateStore,
    ha: HaSender,
    config: Config,
}

impl TriggerGate {
    pub fn new(store: PlateStore, ha: HaSender, config: Config) -> Self {
        Self { store, ha, config }
    }

    /// Check whether this event's zones satisfy the camera's trigger zones
    pub async fn evaluate(&self, event: &ObjectState) -> anyhow::Result<()> {
        let event_id = &event.id;

        let Some(camera) = self.config.camera(&event.camera) else {
            return Ok(());
        };
        if camera.trigger_zones.is_empty() {
            // Emission already happened at match time for this camera
            debug!(event_id = %event_id, "trigger_gate_inert: no trigger zones configured");
            return Ok(());
        }

        let Some(record) = self.store.get(event_id).await? else {
            return Ok(());
        };
        if !record.is_matched() {
            debug!(event_id = %event_id, "trigger_gate_skipped: not plate-matched yet");
            return Ok(());
        }
        if record.is_trigger_satisfied() {
            debug!(event_id = %event_id, "trigger_gate_skipped: already satisfied");
            return Ok(());
        }

        let reached = camera.trigger_zones.iter().any(|zone| event.entered_zones.contains(zone));
        if !reached {
            debug!(
                event_id = %event_id,
                trigger_zones = ?camera.trigger_zones,
                entered_zones = ?event.entered_zones,
                "trigger_zone_not_reached"
            );
            return Ok(());
        }

        self.store
            .upsert(
                event_id,
                RecordPatch {
                    is_trigger_zone_reached: Some(true),
                    entered_zones: Some(event.entered_zones.clone()),
                    ..Default::default()
                },
            )
            .await?;
        info!(
            event_id = %event_id,
            entered_zones = ?event.entered_zones,
            "trigger_zone_reached"
        );
        publish_stored(&self.store, &self.ha, event_id).await?;
        Ok(())
    }
}

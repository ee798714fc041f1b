//! Per-event detection attempts
//!
//! One attempt per delivered `new`/`update` event: fetch a snapshot, run
//! recognition, match against the watch-list, persist, publish. Re-delivery
//! drives retries; a matched record is terminal and short-circuits before
//! any external call, which is what makes repeated delivery safe.

use crate::domain::{ObjectState, RecordPatch};
use crate::infra::config::Config;
use crate::io::ha_egress::{publish_stored, HaSender};
use crate::io::recognizer::PlateRecognizer;
use crate::io::{PlateStore, SnapshotSource, SnapshotWriter};
use crate::services::matcher::{MatchOutcome, PlateMatcher};
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct DetectionRunner {
    store: PlateStore,
    snapshots: Arc<dyn SnapshotSource>,
    recognizer: Arc<dyn PlateRecognizer>,
    writer: Arc<SnapshotWriter>,
    matcher: PlateMatcher,
    ha: HaSender,
    config: Config,
}

impl DetectionRunner {
    pub fn new(
        store: PlateStore,
        snapshots: Arc<dyn SnapshotSource>,
        recognizer: Arc<dyn PlateRecognizer>,
        writer: Arc<SnapshotWriter>,
        matcher: PlateMatcher,
        ha: HaSender,
        config: Config,
    ) -> Self {
        Self { store, snapshots, recognizer, writer, matcher, ha, config }
    }

    /// Run a single recognition attempt for this event
    ///
    /// Returns `Ok(true)` when this attempt confirmed a match (and thus
    /// published or deferred to the trigger gate), `Ok(false)` when the
    /// event stays pending.
    pub async fn attempt(&self, event: &ObjectState) -> anyhow::Result<bool> {
        let event_id = &event.id;

        // Terminal-state guard; a read failure only risks a duplicate
        // attempt, never the loss of a confirmed match
        match self.store.get(event_id).await {
            Ok(Some(record)) if record.is_matched() => {
                debug!(event_id = %event_id, "attempt_skipped: already matched");
                return Ok(false);
            }
            Ok(_) => {}
            Err(e) => warn!(event_id = %event_id, error = %e, "store_read_failed, proceeding"),
        }

        let image = self
            .snapshots
            .latest_jpeg(&event.camera)
            .await
            .with_context(|| format!("snapshot fetch for event {event_id}"))?;

        let Some(reading) = self
            .recognizer
            .recognize(&image)
            .await
            .with_context(|| format!("recognition for event {event_id}"))?
        else {
            debug!(event_id = %event_id, "no plate this attempt");
            return Ok(false);
        };

        let (matched_entry, fuzzy_score) = match self.matcher.check(Some(reading.plate.as_str())) {
            MatchOutcome::Matched { entry, score } => (Some(entry), Some(score)),
            // Matching off means any recognized plate is a result worth
            // persisting and publishing
            MatchOutcome::Disabled | MatchOutcome::NoWatchList => (None, None),
            MatchOutcome::NoMatch { best_score } => {
                debug!(
                    event_id = %event_id,
                    plate = %reading.plate,
                    best_score = %best_score,
                    "no watch match this attempt"
                );
                return Ok(false);
            }
            MatchOutcome::NoPlate => return Ok(false),
        };

        let trigger_zones = self
            .config
            .camera(&event.camera)
            .map(|camera| camera.trigger_zones.clone())
            .unwrap_or_default();

        let image_path = self
            .writer
            .save(&event.camera, Some((&reading.plate, reading.confidence)), &image)
            .context("snapshot save")?;

        self.store
            .upsert(
                event_id,
                RecordPatch {
                    camera_name: Some(event.camera.clone()),
                    detected_plate: Some(reading.plate.clone()),
                    matched_plate: matched_entry.as_ref().map(|e| e.number.clone()),
                    vehicle_owner: matched_entry.as_ref().and_then(|e| e.owner.clone()),
                    vehicle_brand: matched_entry.as_ref().and_then(|e| e.brand.clone()),
                    fuzzy_score,
                    is_plate_matched: Some(true),
                    trigger_zones: Some(trigger_zones.clone()),
                    entered_zones: Some(event.entered_zones.clone()),
                    image_path: Some(image_path.display().to_string()),
                    detection_time: Some(detection_time(event)),
                    ..Default::default()
                },
            )
            .await?;

        info!(
            event_id = %event_id,
            plate = %reading.plate,
            matched = %matched_entry.as_ref().map(|e| e.number.as_str()).unwrap_or("-"),
            score = ?fuzzy_score,
            "plate_matched"
        );

        // Trigger gating, evaluated once synchronously before emitting
        if trigger_zones.is_empty() {
            publish_stored(&self.store, &self.ha, event_id).await?;
        } else if trigger_zones.iter().any(|zone| event.entered_zones.contains(zone)) {
            self.store
                .upsert(
                    event_id,
                    RecordPatch { is_trigger_zone_reached: Some(true), ..Default::default() },
                )
                .await?;
            publish_stored(&self.store, &self.ha, event_id).await?;
        } else {
            self.store
                .upsert(
                    event_id,
                    RecordPatch { is_trigger_zone_reached: Some(false), ..Default::default() },
                )
                .await?;
            info!(
                event_id = %event_id,
                trigger_zones = ?trigger_zones,
                "publish_deferred: trigger zone not reached"
            );
        }

        Ok(true)
    }
}

/// Detection timestamp: the NVR's start time when present, else now
fn detection_time(event: &ObjectState) -> DateTime<Utc> {
    event
        .start_time
        .and_then(|t| DateTime::from_timestamp(t as i64, 0))
        .unwrap_or_else(Utc::now)
}

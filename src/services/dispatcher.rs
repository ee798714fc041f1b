//! Central event dispatch
//!
//! Consumes parsed events from the ingest channel and fans work out to the
//! worker pool: the trigger gate and direction detector run on every
//! eligible event, a detection attempt runs on `new`/`update` events that
//! are not already matched. All per-event tasks are bounded by one
//! semaphore; an in-flight set keeps two recognition attempts for the same
//! event from running concurrently (the matched-state check in the store
//! remains the correctness mechanism, the set just avoids wasted work).

use crate::domain::{EventKind, ObjectState, VehicleEvent};
use crate::infra::config::Config;
use crate::io::ha_egress::HaSender;
use crate::io::recognizer::PlateRecognizer;
use crate::io::{PlateStore, SnapshotSource, SnapshotWriter};
use crate::services::detection::DetectionRunner;
use crate::services::direction::DirectionDetector;
use crate::services::filter::EventFilter;
use crate::services::matcher::PlateMatcher;
use crate::services::trigger::TriggerGate;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

const SECONDS_PER_DAY: u64 = 86_400;

pub struct Dispatcher {
    filter: EventFilter,
    detection: Arc<DetectionRunner>,
    trigger: Arc<TriggerGate>,
    direction: Arc<DirectionDetector>,
    store: PlateStore,
    writer: Arc<SnapshotWriter>,
    limiter: Arc<Semaphore>,
    in_flight: Arc<Mutex<FxHashSet<String>>>,
    retention: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        config: Config,
        store: PlateStore,
        snapshots: Arc<dyn SnapshotSource>,
        recognizer: Arc<dyn PlateRecognizer>,
        writer: Arc<SnapshotWriter>,
        ha: HaSender,
    ) -> Self {
        let filter = EventFilter::from_config(&config);
        let matcher = PlateMatcher::from_config(&config);
        let retention = (config.retention_days() > 0)
            .then(|| Duration::from_secs(config.retention_days() * SECONDS_PER_DAY));

        let detection = Arc::new(DetectionRunner::new(
            store.clone(),
            snapshots,
            recognizer,
            writer.clone(),
            matcher,
            ha.clone(),
            config.clone(),
        ));
        let trigger = Arc::new(TriggerGate::new(store.clone(), ha, config.clone()));
        let direction = Arc::new(DirectionDetector::new(store.clone(), config.clone()));

        Self {
            filter,
            detection,
            trigger,
            direction,
            store,
            writer,
            limiter: Arc::new(Semaphore::new(config.workers())),
            in_flight: Arc::new(Mutex::new(FxHashSet::default())),
            retention,
        }
    }

    /// Consume events until the channel closes
    pub async fn run(&self, mut event_rx: mpsc::Receiver<VehicleEvent>) {
        info!("dispatcher_started");
        while let Some(event) = event_rx.recv().await {
            self.dispatch(event).await;
        }
        info!("dispatcher_stopped: event channel closed");
    }

    /// Route a single event through filter, opportunistic checks, and the
    /// detection state machine
    pub async fn dispatch(&self, event: VehicleEvent) {
        if !self.filter.is_eligible(&event.after) {
            return;
        }

        let after = Arc::new(event.after);
        debug!(
            event_id = %after.id,
            kind = %event.kind,
            camera = %after.camera,
            "event_dispatched"
        );

        // Trigger gate and direction detection run opportunistically on
        // every eligible event, whatever its kind
        {
            let trigger = self.trigger.clone();
            let after = after.clone();
            self.spawn_gated("trigger_gate", async move { trigger.evaluate(&after).await });
        }
        {
            let direction = self.direction.clone();
            let after = after.clone();
            self.spawn_gated("direction", async move { direction.infer(&after).await });
        }

        // Terminal-state dedupe: a confirmed match ends the lifecycle
        match self.store.get(&after.id).await {
            Ok(Some(record)) if record.is_matched() => {
                debug!(event_id = %after.id, "event_skipped: already matched");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(event_id = %after.id, error = %e, "store_read_failed, treating as pending");
            }
        }

        match event.kind {
            EventKind::New | EventKind::Update => self.spawn_attempt(after),
            EventKind::End => {
                // Abandonment is implicit: the event simply stops being
                // re-entered
                debug!(event_id = %after.id, "event_stream_ended");
            }
            EventKind::Other => {}
        }
    }

    fn spawn_attempt(&self, after: Arc<ObjectState>) {
        if !self.in_flight.lock().insert(after.id.clone()) {
            debug!(event_id = %after.id, "attempt_skipped: already in flight");
            return;
        }

        let detection = self.detection.clone();
        let in_flight = self.in_flight.clone();
        let limiter = self.limiter.clone();
        let writer = self.writer.clone();
        let retention = self.retention;

        tokio::spawn(async move {
            let result = match limiter.acquire_owned().await {
                Ok(_permit) => detection.attempt(&after).await,
                Err(_) => Ok(false),
            };
            in_flight.lock().remove(&after.id);

            match result {
                Ok(true) => {
                    // A fresh snapshot landed on disk; sweep expired ones
                    if let Some(retention) = retention {
                        tokio::task::spawn_blocking(move || {
                            if let Err(e) = writer.prune_older_than(retention) {
                                warn!(error = %e, "snapshot_retention_failed");
                            }
                        });
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    // Logged and dropped; the next delivered update retries
                    warn!(event_id = %after.id, error = %e, "detection_attempt_failed");
                }
            }
        });
    }

    fn spawn_gated<F>(&self, task: &'static str, work: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let limiter = self.limiter.clone();
        tokio::spawn(async move {
            let Ok(_permit) = limiter.acquire_owned().await else {
                return;
            };
            if let Err(e) = work.await {
                warn!(task = %task, error = %e, "task_failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PlateRecord;
    use crate::infra::config::WatchedPlate;
    use crate::io::ha_egress::create_ha_channel;
    use crate::io::recognizer::PlateReading;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Instant;
    use tempfile::TempDir;

    struct FakeSnapshots;

    #[async_trait]
    impl SnapshotSource for FakeSnapshots {
        async fn latest_jpeg(&self, _camera: &str) -> anyhow::Result<Bytes> {
            Ok(Bytes::from_static(b"jpegdata"))
        }
    }

    struct FakeRecognizer;

    #[async_trait]
    impl PlateRecognizer for FakeRecognizer {
        async fn recognize(&self, _image: &[u8]) -> anyhow::Result<Option<PlateReading>> {
            Ok(Some(PlateReading { plate: "XYZ999".to_string(), confidence: 0.9 }))
        }
    }

    fn vehicle_event(kind: EventKind, id: &str, label: &str) -> VehicleEvent {
        VehicleEvent {
            kind,
            after: ObjectState {
                id: id.to_string(),
                camera: "drive".to_string(),
                label: label.to_string(),
                current_zones: Vec::new(),
                entered_zones: Vec::new(),
                start_time: None,
            },
            received_at: Instant::now(),
        }
    }

    async fn dispatcher_with_store() -> (Dispatcher, PlateStore, TempDir) {
        let config = Config::default()
            .with_watched_plates(vec![WatchedPlate {
                number: "XYZ999".to_string(),
                owner: None,
                brand: None,
            }])
            .with_fuzzy_match(0.5);
        let store = PlateStore::open_in_memory().await.unwrap();
        let snapshot_dir = TempDir::new().unwrap();
        let writer = Arc::new(SnapshotWriter::new(snapshot_dir.path().to_str().unwrap()));
        let (ha, _ha_rx) = create_ha_channel(64);
        // Receiver dropped on purpose; publish failures are non-fatal
        let dispatcher = Dispatcher::new(
            config,
            store.clone(),
            Arc::new(FakeSnapshots),
            Arc::new(FakeRecognizer),
            writer,
            ha,
        );
        (dispatcher, store, snapshot_dir)
    }

    async fn wait_for_record(store: &PlateStore, event_id: &str) -> Option<PlateRecord> {
        for _ in 0..100 {
            if let Ok(Some(record)) = store.get(event_id).await {
                if record.is_matched() {
                    return Some(record);
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        None
    }

    #[tokio::test]
    async fn test_new_event_runs_detection() {
        let (dispatcher, store, _dir) = dispatcher_with_store().await;

        dispatcher.dispatch(vehicle_event(EventKind::New, "E1", "car")).await;

        let record = wait_for_record(&store, "E1").await.expect("record should be matched");
        assert_eq!(record.detected_plate.as_deref(), Some("XYZ999"));
    }

    #[tokio::test]
    async fn test_ineligible_label_is_dropped() {
        let (dispatcher, store, _dir) = dispatcher_with_store().await;

        dispatcher.dispatch(vehicle_event(EventKind::New, "E1", "person")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(store.get("E1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_end_event_does_not_start_detection() {
        let (dispatcher, store, _dir) = dispatcher_with_store().await;

        dispatcher.dispatch(vehicle_event(EventKind::End, "E1", "car")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(store.get("E1").await.unwrap().is_none());
    }
}

//! MQTT client for receiving NVR vehicle-detection events

use crate::domain::{NvrEnvelope, VehicleEvent};
use crate::infra::config::Config;
use rand::Rng;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Initial reconnect delay; doubles per consecutive failure up to the cap
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Start the MQTT client and send parsed events to the channel
///
/// Events are sent via try_send to avoid blocking the MQTT eventloop.
/// Connection errors back off exponentially with jitter instead of
/// hammering the broker; a successful poll resets the backoff.
pub async fn start_event_ingest(
    config: Config,
    event_tx: mpsc::Sender<VehicleEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("plate-watch-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.events_topic(), QoS::AtMostOnce).await?;

    info!(
        topic = %config.events_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "event_ingest_subscribed"
    );

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);
    let mut backoff = BACKOFF_INITIAL;

    loop {
        tokio::select! {
            // Check for shutdown signal
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("event_ingest_shutdown");
                    return Ok(());
                }
            }
            // Process MQTT events
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        backoff = BACKOFF_INITIAL;
                        let received_at = Instant::now();

                        match std::str::from_utf8(&publish.payload) {
                            Ok(json_str) => {
                                let Some(event) = parse_event(json_str, received_at) else {
                                    continue;
                                };
                                debug!(
                                    event_id = %event.after.id,
                                    kind = %event.kind,
                                    camera = %event.after.camera,
                                    "event_parsed"
                                );
                                if let Err(e) = event_tx.try_send(event) {
                                    match e {
                                        TrySendError::Full(_) => {
                                            if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                                warn!("event_dropped: channel full");
                                                last_drop_warn = Instant::now();
                                            }
                                        }
                                        TrySendError::Closed(_) => {
                                            warn!("Event channel closed");
                                            return Ok(());
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Invalid UTF-8 in MQTT payload");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("event_ingest_connected");
                        backoff = BACKOFF_INITIAL;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, retry_in = ?backoff, "MQTT error");
                        // Jittered sleep keeps reconnecting clients from
                        // synchronizing against a recovering broker
                        let sleep_for = {
                            let mut rng = rand::thread_rng();
                            backoff.mul_f64(rng.gen_range(0.5..1.5))
                        };
                        tokio::time::sleep(sleep_for).await;
                        backoff = (backoff * 2).min(BACKOFF_MAX);
                    }
                }
            }
        }
    }
}

/// Parse an NVR event envelope into a `VehicleEvent`
///
/// Returns None for unparseable payloads or envelopes without an `after`
/// state (nothing to act on either way).
pub fn parse_event(json_str: &str, received_at: Instant) -> Option<VehicleEvent> {
    let envelope: NvrEnvelope = match serde_json::from_str(json_str) {
        Ok(e) => e,
        Err(e) => {
            debug!(error = %e, "Failed to parse event envelope");
            return None;
        }
    };

    let after = envelope.after?;
    Some(VehicleEvent { kind: envelope.kind, after, received_at })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventKind;

    #[test]
    fn test_parse_new_event() {
        let json = r#"{
            "type": "new",
            "before": null,
            "after": {
                "id": "1728316800.123-abc",
                "camera": "drive",
                "label": "car",
                "current_zones": ["driveway"],
                "entered_zones": ["driveway"],
                "start_time": 1728316800.1
            }
        }"#;

        let event = parse_event(json, Instant::now()).unwrap();
        assert_eq!(event.kind, EventKind::New);
        assert_eq!(event.after.id, "1728316800.123-abc");
        assert_eq!(event.after.camera, "drive");
        assert_eq!(event.after.label, "car");
        assert_eq!(event.after.current_zones, vec!["driveway"]);
        assert_eq!(event.after.start_time, Some(1728316800.1));
    }

    #[test]
    fn test_parse_update_with_before() {
        let json = r#"{
            "type": "update",
            "before": {"id": "e1", "camera": "drive", "label": "car"},
            "after": {"id": "e1", "camera": "drive", "label": "car", "entered_zones": ["porch"]}
        }"#;

        let event = parse_event(json, Instant::now()).unwrap();
        assert_eq!(event.kind, EventKind::Update);
        assert_eq!(event.after.entered_zones, vec!["porch"]);
    }

    #[test]
    fn test_parse_end_event() {
        let json = r#"{
            "type": "end",
            "after": {"id": "e1", "camera": "drive", "label": "car"}
        }"#;

        let event = parse_event(json, Instant::now()).unwrap();
        assert_eq!(event.kind, EventKind::End);
    }

    #[test]
    fn test_parse_missing_after() {
        let json = r#"{"type": "new", "before": null, "after": null}"#;
        assert!(parse_event(json, Instant::now()).is_none());
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(parse_event("not json", Instant::now()).is_none());
    }
}

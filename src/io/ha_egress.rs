//! MQTT publisher for Home Assistant discovery
//!
//! Each attribute of a matched plate record is published as a discovery
//! config payload plus a retained state payload:
//! - `{prefix}/binary_sensor/vehicle_data/{key}/config` + `/state`
//! - `{prefix}/camera/vehicle_data/plate_image/config` + `/state`
//! - `{prefix}/sensor/vehicle_data/{key}/config` + `/state`
//!
//! Binary sensors are reset to OFF after a configured delay so automations
//! see a pulse per match rather than a latched value.

use crate::domain::PlateRecord;
use crate::infra::config::Config;
use crate::io::store::PlateStore;
use base64::{engine::general_purpose::STANDARD, Engine};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::json;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Home Assistant component kind an attribute is published under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaComponent {
    Sensor,
    BinarySensor,
    Camera,
}

impl HaComponent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaComponent::Sensor => "sensor",
            HaComponent::BinarySensor => "binary_sensor",
            HaComponent::Camera => "camera",
        }
    }
}

/// One attribute of a matched record, ready for discovery publishing
#[derive(Debug, Clone)]
pub struct HaAttribute {
    pub component: HaComponent,
    pub key: String,
    pub state: String,
}

/// Sender handle for publishing plate records
///
/// Clone this to share across tasks. Non-blocking - if the channel is
/// full, messages are dropped (logged by the publisher side effect count).
#[derive(Clone)]
pub struct HaSender {
    tx: mpsc::Sender<HaAttribute>,
}

impl HaSender {
    pub fn new(tx: mpsc::Sender<HaAttribute>) -> Self {
        Self { tx }
    }

    /// Publish every attribute of a matched record
    ///
    /// `image_b64` carries the saved snapshot, base64-encoded, for the HA
    /// camera entity; it is skipped when no image was saved.
    pub fn send_record(&self, record: &PlateRecord, image_b64: Option<String>) {
        for attribute in record_attributes(record, image_b64) {
            if self.tx.try_send(attribute).is_err() {
                warn!(event_id = %record.event_id, "ha_attribute_dropped: channel full");
            }
        }
    }
}

/// Build the attribute set for a record, in stable publish order
fn record_attributes(record: &PlateRecord, image_b64: Option<String>) -> Vec<HaAttribute> {
    let mut attributes = vec![
        HaAttribute {
            component: HaComponent::BinarySensor,
            key: "plate_matched".to_string(),
            state: on_off(record.is_matched()),
        },
        HaAttribute {
            component: HaComponent::BinarySensor,
            key: "trigger_zone_reached".to_string(),
            state: on_off(record.is_trigger_satisfied()),
        },
        HaAttribute {
            component: HaComponent::Sensor,
            key: "event_id".to_string(),
            state: record.event_id.clone(),
        },
    ];

    let mut sensor = |key: &str, state: Option<String>| {
        if let Some(state) = state {
            attributes.push(HaAttribute {
                component: HaComponent::Sensor,
                key: key.to_string(),
                state,
            });
        }
    };

    sensor("detected_plate", record.detected_plate.as_deref().map(str::to_uppercase));
    sensor("matched_plate", record.matched_plate.as_deref().map(str::to_uppercase));
    sensor("fuzzy_score", record.fuzzy_score.map(|s| format!("{s:.2}")));
    sensor("camera", record.camera_name.clone());
    sensor("entered_zones", serde_json::to_string(&record.entered_zones).ok());
    sensor("trigger_zones", serde_json::to_string(&record.trigger_zones).ok());
    sensor("vehicle_direction", record.vehicle_direction.map(|d| d.as_str().to_string()));
    sensor("vehicle_owner", record.vehicle_owner.clone());
    sensor("vehicle_brand", record.vehicle_brand.clone());

    if let Some(image) = image_b64 {
        attributes.push(HaAttribute {
            component: HaComponent::Camera,
            key: "plate_image".to_string(),
            state: image,
        });
    }

    attributes
}

fn on_off(value: bool) -> String {
    if value { "ON" } else { "OFF" }.to_string()
}

/// "detected_plate" -> "Detected Plate"
fn display_name(key: &str) -> String {
    key.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn discovery_topic(prefix: &str, component: HaComponent, key: &str) -> String {
    format!("{}/{}/vehicle_data/{}/config", prefix, component.as_str(), key)
}

pub(crate) fn state_topic(prefix: &str, component: HaComponent, key: &str) -> String {
    format!("{}/{}/vehicle_data/{}/state", prefix, component.as_str(), key)
}

/// Fetch a stored record and publish it with its saved snapshot
///
/// Shared by the detection runner (publish at match time) and the trigger
/// gate (deferred publish once the trigger zone is reached).
pub async fn publish_stored(
    store: &PlateStore,
    ha: &HaSender,
    event_id: &str,
) -> anyhow::Result<()> {
    let Some(record) = store.get(event_id).await? else {
        anyhow::bail!("no stored record for event {event_id}");
    };

    let image_b64 = match record.image_path.as_deref() {
        Some(path) => match tokio::fs::read(path).await {
            Ok(bytes) => Some(STANDARD.encode(bytes)),
            Err(e) => {
                warn!(event_id = %event_id, path = %path, error = %e, "snapshot_read_failed");
                None
            }
        },
        None => None,
    };

    ha.send_record(&record, image_b64);
    info!(event_id = %event_id, "record_published");
    Ok(())
}

/// Create a new egress channel pair
pub fn create_ha_channel(buffer_size: usize) -> (HaSender, mpsc::Receiver<HaAttribute>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (HaSender::new(tx), rx)
}

/// MQTT publisher actor
///
/// Receives attributes from the egress channel and publishes discovery and
/// state payloads, both retained.
pub struct HaPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<HaAttribute>,
    discovery_prefix: String,
    manufacturer: String,
    sensor_reset: Duration,
}

impl HaPublisher {
    /// Create a new publisher connected to the configured broker
    pub fn new(config: &Config, rx: mpsc::Receiver<HaAttribute>) -> Self {
        let client_id = format!("plate-watch-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        // Spawn the eventloop handler
        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("ha_egress_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "ha_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            discovery_prefix: config.discovery_prefix().to_string(),
            manufacturer: config.manufacturer().to_string(),
            sensor_reset: Duration::from_secs(config.sensor_reset_secs()),
        }
    }

    /// Run the publisher loop until shutdown, draining pending messages
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(prefix = %self.discovery_prefix, "ha_egress_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("ha_egress_shutdown");
                        while let Ok(attribute) = self.rx.try_recv() {
                            self.publish_attribute(attribute).await;
                        }
                        return;
                    }
                }
                Some(attribute) = self.rx.recv() => {
                    self.publish_attribute(attribute).await;
                }
            }
        }
    }

    async fn publish_attribute(&self, attribute: HaAttribute) {
        let config_topic = discovery_topic(&self.discovery_prefix, attribute.component, &attribute.key);
        let state = state_topic(&self.discovery_prefix, attribute.component, &attribute.key);
        let discovery = self.discovery_payload(attribute.component, &attribute.key, &state);

        if let Err(e) = self
            .client
            .publish(&config_topic, QoS::AtLeastOnce, true, discovery.to_string().as_bytes())
            .await
        {
            error!(topic = %config_topic, error = %e, "ha_discovery_publish_failed");
            return;
        }
        if let Err(e) = self
            .client
            .publish(&state, QoS::AtLeastOnce, true, attribute.state.as_bytes())
            .await
        {
            error!(topic = %state, error = %e, "ha_state_publish_failed");
            return;
        }
        debug!(topic = %state, "ha_state_published");

        // Pulse semantics for binary sensors: flip back to OFF after the
        // configured delay
        if attribute.component == HaComponent::BinarySensor && attribute.state == "ON" {
            let client = self.client.clone();
            let delay = self.sensor_reset;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = client.publish(&state, QoS::AtLeastOnce, true, "OFF").await {
                    warn!(topic = %state, error = %e, "ha_sensor_reset_failed");
                } else {
                    debug!(topic = %state, "ha_sensor_reset");
                }
            });
        }
    }

    fn discovery_payload(
        &self,
        component: HaComponent,
        key: &str,
        state_topic: &str,
    ) -> serde_json::Value {
        let device = json!({
            "name": "Plate Detection",
            "identifiers": "plate_watch",
            "manufacturer": self.manufacturer,
            "sw_version": env!("CARGO_PKG_VERSION"),
        });

        match component {
            HaComponent::BinarySensor => json!({
                "name": display_name(key),
                "state_topic": state_topic,
                "payload_on": "ON",
                "payload_off": "OFF",
                "device_class": "motion",
                "unique_id": format!("vehicle_binary_sensor_{key}"),
                "device": device,
            }),
            HaComponent::Camera => json!({
                "name": display_name(key),
                "state_topic": state_topic,
                "unique_id": format!("vehicle_camera_{key}"),
                "device": device,
            }),
            HaComponent::Sensor => json!({
                "name": display_name(key),
                "state_topic": state_topic,
                "value_template": "{{ value }}",
                "unique_id": format!("vehicle_sensor_{key}"),
                "device": device,
            }),
        }
    }
}

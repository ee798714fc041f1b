//! Configuration loading from TOML files
//!
//! Config file is selected via the --config command line argument.
//! A missing or unparseable file falls back to built-in defaults with a
//! warning, so the service can start against a local broker out of the box.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// A plate on the watch-list, as written in configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WatchedPlate {
    pub number: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
}

/// Entry/exit zone markers used for direction inference.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DirectionZones {
    #[serde(default)]
    pub first_zone: Option<String>,
    #[serde(default)]
    pub last_zone: Option<String>,
}

/// Per-camera settings: trigger zones and optional direction markers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub trigger_zones: Vec<String>,
    #[serde(default)]
    pub direction: Option<DirectionZones>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_events_topic")]
    pub events_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            events_topic: default_events_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_events_topic() -> String {
    "nvr/events".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NvrConfig {
    #[serde(default = "default_nvr_base_url")]
    pub base_url: String,
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,
}

impl Default for NvrConfig {
    fn default() -> Self {
        Self { base_url: default_nvr_base_url(), snapshot_timeout_ms: default_snapshot_timeout_ms() }
    }
}

fn default_nvr_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_snapshot_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognizerConfig {
    #[serde(default = "default_recognizer_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_recognizer_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self { endpoint: default_recognizer_endpoint(), timeout_ms: default_recognizer_timeout_ms() }
    }
}

fn default_recognizer_endpoint() -> String {
    "http://localhost:8080/v1/plate-reader".to_string()
}

fn default_recognizer_timeout_ms() -> u64 {
    15_000
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub plates: Vec<WatchedPlate>,
    /// Similarity threshold in (0,1]. Zero or absent disables matching.
    #[serde(default)]
    pub fuzzy_match: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_objects")]
    pub objects: Vec<String>,
    /// Zone allow-list for inbound events; empty means allow all.
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { objects: default_objects(), zones: Vec::new(), workers: default_workers() }
    }
}

fn default_objects() -> Vec<String> {
    vec!["car".to_string(), "motorcycle".to_string(), "bus".to_string()]
}

fn default_workers() -> usize {
    8
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,
    /// Days to keep saved snapshot images; 0 disables the sweep.
    #[serde(default)]
    pub retention_days: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            snapshot_dir: default_snapshot_dir(),
            retention_days: 0,
        }
    }
}

fn default_db_path() -> String {
    "plate-watch.db".to_string()
}

fn default_snapshot_dir() -> String {
    "snapshots".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HaConfig {
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
    /// Delay before a published binary sensor is reset to OFF.
    #[serde(default = "default_sensor_reset_secs")]
    pub sensor_reset_secs: u64,
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            discovery_prefix: default_discovery_prefix(),
            manufacturer: default_manufacturer(),
            sensor_reset_secs: default_sensor_reset_secs(),
        }
    }
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_manufacturer() -> String {
    "plate-watch".to_string()
}

fn default_sensor_reset_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub nvr: NvrConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ha: HaConfig,
    #[serde(default)]
    pub cameras: HashMap<String, CameraConfig>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    events_topic: String,
    nvr_base_url: String,
    snapshot_timeout_ms: u64,
    recognizer_endpoint: String,
    recognizer_timeout_ms: u64,
    watched_plates: Vec<WatchedPlate>,
    fuzzy_match: f64,
    objects: Vec<String>,
    zones: Vec<String>,
    workers: usize,
    db_path: String,
    snapshot_dir: String,
    retention_days: u64,
    discovery_prefix: String,
    manufacturer: String,
    sensor_reset_secs: u64,
    cameras: HashMap<String, CameraConfig>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            events_topic: toml_config.mqtt.events_topic,
            nvr_base_url: toml_config.nvr.base_url,
            snapshot_timeout_ms: toml_config.nvr.snapshot_timeout_ms,
            recognizer_endpoint: toml_config.recognizer.endpoint,
            recognizer_timeout_ms: toml_config.recognizer.timeout_ms,
            watched_plates: toml_config.watch.plates,
            fuzzy_match: toml_config.watch.fuzzy_match,
            objects: toml_config.detection.objects,
            zones: toml_config.detection.zones,
            workers: toml_config.detection.workers.max(1),
            db_path: toml_config.storage.db_path,
            snapshot_dir: toml_config.storage.snapshot_dir,
            retention_days: toml_config.storage.retention_days,
            discovery_prefix: toml_config.ha.discovery_prefix,
            manufacturer: toml_config.ha.manufacturer,
            sensor_reset_secs: toml_config.ha.sensor_reset_secs,
            cameras: toml_config.cameras,
            config_file: config_file.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {e:#}. Using defaults.");
                Self::default()
            }
        }
    }

    /// Per-camera settings, if the camera is configured
    pub fn camera(&self, name: &str) -> Option<&CameraConfig> {
        self.cameras.get(name)
    }

    pub fn cameras(&self) -> &HashMap<String, CameraConfig> {
        &self.cameras
    }

    // Getters for all config fields
    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn events_topic(&self) -> &str {
        &self.events_topic
    }

    pub fn nvr_base_url(&self) -> &str {
        &self.nvr_base_url
    }

    pub fn snapshot_timeout_ms(&self) -> u64 {
        self.snapshot_timeout_ms
    }

    pub fn recognizer_endpoint(&self) -> &str {
        &self.recognizer_endpoint
    }

    pub fn recognizer_timeout_ms(&self) -> u64 {
        self.recognizer_timeout_ms
    }

    pub fn watched_plates(&self) -> &[WatchedPlate] {
        &self.watched_plates
    }

    pub fn fuzzy_match(&self) -> f64 {
        self.fuzzy_match
    }

    pub fn objects(&self) -> &[String] {
        &self.objects
    }

    pub fn zones(&self) -> &[String] {
        &self.zones
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub fn snapshot_dir(&self) -> &str {
        &self.snapshot_dir
    }

    pub fn retention_days(&self) -> u64 {
        self.retention_days
    }

    pub fn discovery_prefix(&self) -> &str {
        &self.discovery_prefix
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn sensor_reset_secs(&self) -> u64 {
        self.sensor_reset_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the watch-list
    #[cfg(test)]
    pub fn with_watched_plates(mut self, plates: Vec<WatchedPlate>) -> Self {
        self.watched_plates = plates;
        self
    }

    /// Builder method for tests to set the fuzzy-match threshold
    #[cfg(test)]
    pub fn with_fuzzy_match(mut self, threshold: f64) -> Self {
        self.fuzzy_match = threshold;
        self
    }

    /// Builder method for tests to set per-camera settings
    #[cfg(test)]
    pub fn with_camera(mut self, name: &str, camera: CameraConfig) -> Self {
        self.cameras.insert(name.to_string(), camera);
        self
    }

    /// Builder method for tests to set the zone allow-list
    #[cfg(test)]
    pub fn with_zones(mut self, zones: Vec<String>) -> Self {
        self.zones = zones;
        self
    }
}

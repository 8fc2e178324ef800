//! Configuration loading from TOML files
//!
//! Config file is selected via `--config <path>` (default: config/dev.toml).
//! Every section is optional; a missing file falls back to the built-in
//! campus demo so the binary always starts.

use crate::domain::topology::{Topology, TopologyConfig, TopologyError};
use crate::domain::types::STALENESS_MS;
use crate::services::guidance::{GuidanceConfig, DEFAULT_ARRIVAL_RADIUS, DEFAULT_ARRIVAL_RSSI};
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Unique site identifier (e.g., "north-campus")
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: "wayfinder".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Subscribe to scanner adverts over MQTT
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub scanner_topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 1883,
            scanner_topic: "wayfinder/scanner/#".to_string(),
            username: None,
            password: None,
        }
    }
}

/// Serial-attached BLE scanner
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub enabled: bool,
    pub device: String,
    pub baud: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { enabled: false, device: "/dev/ttyUSB0".to_string(), baud: 115_200 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuidanceSection {
    pub staleness_ms: u64,
    /// Next-hop sightings must be strictly stronger than this (dBm)
    pub arrival_rssi: i32,
    /// Graph-only topologies ignore a strongest beacon weaker than this (dBm)
    pub min_node_rssi: i32,
    /// Proximity arrival radius (topology units)
    pub arrival_radius: f64,
    /// Position recompute period for coordinate topologies
    pub tick_ms: u64,
}

impl Default for GuidanceSection {
    fn default() -> Self {
        Self {
            staleness_ms: STALENESS_MS,
            arrival_rssi: DEFAULT_ARRIVAL_RSSI,
            min_node_rssi: -80,
            arrival_radius: DEFAULT_ARRIVAL_RADIUS,
            tick_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// File path or HTTP(S) URL of the model artifact
    pub model: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self { model: None, timeout_ms: 5000 }
    }
}

/// TCP line protocol for session control
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { enabled: true, port: 7878 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 10, prometheus_port: 9090 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Run an embedded MQTT broker in-process
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { enabled: false, bind_address: "0.0.0.0".to_string(), port: 1883 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttEgressConfig {
    pub enabled: bool,
    /// Guidance snapshots, retained so late subscribers see the latest (QoS 1)
    pub guidance_topic: String,
    /// Session lifecycle events (QoS 1)
    pub session_topic: String,
    /// Position estimates (QoS 0)
    pub position_topic: String,
    /// Periodic metrics snapshots (QoS 0)
    pub metrics_topic: String,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            guidance_topic: "wayfinder/guidance".to_string(),
            session_topic: "wayfinder/session".to_string(),
            position_topic: "wayfinder/position".to_string(),
            metrics_topic: "wayfinder/metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub guidance: GuidanceSection,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
    #[serde(default)]
    pub topology: Option<TopologyConfig>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt: MqttConfig,
    scanner: ScannerConfig,
    guidance: GuidanceSection,
    classifier: ClassifierConfig,
    control: ControlConfig,
    metrics: MetricsConfig,
    broker: BrokerConfig,
    mqtt_egress: MqttEgressConfig,
    topology: TopologyConfig,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            mqtt: toml_config.mqtt,
            scanner: toml_config.scanner,
            guidance: toml_config.guidance,
            classifier: toml_config.classifier,
            control: toml_config.control,
            metrics: toml_config.metrics,
            broker: toml_config.broker,
            mqtt_egress: toml_config.mqtt_egress,
            topology: toml_config.topology.unwrap_or_else(TopologyConfig::campus),
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Build and validate the site topology
    pub fn topology(&self) -> Result<Topology, TopologyError> {
        Topology::from_config(&self.topology)
    }

    pub fn topology_config(&self) -> &TopologyConfig {
        &self.topology
    }

    pub fn guidance_config(&self) -> GuidanceConfig {
        GuidanceConfig {
            arrival_rssi: self.guidance.arrival_rssi,
            arrival_radius: self.guidance.arrival_radius,
            staleness_ms: self.guidance.staleness_ms,
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt.enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt.host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt.port
    }

    pub fn mqtt_scanner_topic(&self) -> &str {
        &self.mqtt.scanner_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt.username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt.password.as_deref()
    }

    pub fn scanner_enabled(&self) -> bool {
        self.scanner.enabled
    }

    pub fn scanner_device(&self) -> &str {
        &self.scanner.device
    }

    pub fn scanner_baud(&self) -> u32 {
        self.scanner.baud
    }

    pub fn staleness_ms(&self) -> u64 {
        self.guidance.staleness_ms
    }

    pub fn min_node_rssi(&self) -> i32 {
        self.guidance.min_node_rssi
    }

    pub fn tick_ms(&self) -> u64 {
        self.guidance.tick_ms
    }

    pub fn classifier_model(&self) -> Option<&str> {
        self.classifier.model.as_deref()
    }

    pub fn classifier_timeout_ms(&self) -> u64 {
        self.classifier.timeout_ms
    }

    pub fn control_enabled(&self) -> bool {
        self.control.enabled
    }

    pub fn control_port(&self) -> u16 {
        self.control.port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics.interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.metrics.prometheus_port
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker.enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker.bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker.port
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress.enabled
    }

    pub fn mqtt_egress_guidance_topic(&self) -> &str {
        &self.mqtt_egress.guidance_topic
    }

    pub fn mqtt_egress_session_topic(&self) -> &str {
        &self.mqtt_egress.session_topic
    }

    pub fn mqtt_egress_position_topic(&self) -> &str {
        &self.mqtt_egress.position_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress.metrics_topic
    }

    /// Builder method for tests to swap in a different map
    #[cfg(test)]
    pub fn with_topology(mut self, topology: TopologyConfig) -> Self {
        self.topology = topology;
        self
    }

    #[cfg(test)]
    pub fn with_tick_ms(mut self, tick_ms: u64) -> Self {
        self.guidance.tick_ms = tick_ms;
        self
    }
}

//! Integration tests for configuration loading

use wayfinder::domain::TopologyError;
use wayfinder::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[site]
id = "north-wing"

[mqtt]
host = "test-host"
port = 1884
scanner_topic = "scanners/+/adverts"

[scanner]
enabled = true
device = "/dev/ttyACM1"

[guidance]
staleness_ms = 2000
tick_ms = 250

[classifier]
model = "https://models.example.net/intent.json"

[metrics]
interval_secs = 15
prometheus_port = 9091

[[topology.locations]]
id = "lobby"
name = "Lobby"

[[topology.locations]]
id = "hall"
name = "Hall"

[[topology.locations]]
id = "lab"
name = "Lab"

[topology.beacons]
B1 = "lobby"
B2 = "hall"
B3 = "lab"

[topology.adjacency]
lobby = ["hall"]

[topology.adjacency.hall]
lab = 90.0
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "north-wing");
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_scanner_topic(), "scanners/+/adverts");
    assert!(config.scanner_enabled());
    assert_eq!(config.scanner_device(), "/dev/ttyACM1");
    assert_eq!(config.staleness_ms(), 2000);
    assert_eq!(config.tick_ms(), 250);
    assert_eq!(config.classifier_model(), Some("https://models.example.net/intent.json"));
    assert_eq!(config.prometheus_port(), 9091);

    let topology = config.topology().unwrap();
    assert_eq!(topology.locations().len(), 3);
    assert!(!topology.has_coordinates());
    assert_eq!(topology.edge("hall", "lab").and_then(|e| e.bearing), Some(90.0));
    assert!(topology.is_adjacent("hall", "lobby"));
    assert!(!topology.is_adjacent("lab", "hall"));
}

#[test]
fn test_bad_topology_is_reported_on_build() {
    let temp_file = write_config(
        r#"
[[topology.locations]]
id = "lobby"
name = "Lobby"

[topology.beacons]
B9 = "basement"
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(
        config.topology().unwrap_err(),
        TopologyError::UnknownLocation { context: "beacon binding", id: "basement".into() }
    );
}

#[test]
fn test_malformed_file_is_an_error() {
    let temp_file = write_config("[mqtt\nport = ");
    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.topology().unwrap().locations().len(), 4);
}

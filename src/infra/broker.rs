//! Embedded MQTT broker using rumqttd
//!
//! Lets a single box run scanners, wayfinder and displays without an
//! external broker.

use crate::infra::config::Config as AppConfig;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use tracing::{info, warn};

/// Broker listen address from config, if it parses
pub fn broker_listen_addr(app_config: &AppConfig) -> Option<SocketAddr> {
    let addr_str = format!("{}:{}", app_config.broker_bind_address(), app_config.broker_port());
    match addr_str.parse() {
        Ok(addr) => Some(addr),
        Err(e) => {
            warn!(error = %e, addr = %addr_str, "broker_invalid_bind_address");
            None
        }
    }
}

fn broker_config(listen: SocketAddr) -> Config {
    let router = RouterConfig {
        max_segment_size: 10 * 1024 * 1024,
        max_segment_count: 10,
        max_connections: 1000,
        max_outgoing_packet_count: 200,
        initialized_filters: None,
        ..Default::default()
    };

    let mut servers = HashMap::new();
    servers.insert(
        "v4".to_string(),
        ServerSettings {
            name: "v4".to_string(),
            listen,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 5000,
                // scanner batches are small; guidance snapshots smaller still
                max_payload_size: 64 * 1024,
                max_inflight_count: 100,
                auth: None,
                dynamic_filters: false,
                external_auth: None,
            },
        },
    );

    Config {
        id: 0,
        router,
        v4: Some(servers),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    }
}

/// Start the embedded broker on its own thread when enabled
pub fn start_embedded_broker(app_config: &AppConfig) {
    if !app_config.broker_enabled() {
        return;
    }
    let Some(listen) = broker_listen_addr(app_config) else {
        return;
    };

    let config = broker_config(listen);
    thread::spawn(move || {
        let mut broker = Broker::new(config);
        // start() blocks for the life of the broker
        if let Err(e) = broker.start() {
            warn!(error = %e, "broker_start_failed");
        }
    });

    // give the listener a moment before clients connect
    thread::sleep(std::time::Duration::from_millis(100));
    info!(listen = %listen, "broker_started");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_listen_addr() {
        let addr = broker_listen_addr(&AppConfig::default()).unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:1883");
    }

    #[test]
    fn test_broker_config_has_single_v4_server() {
        let config = broker_config("127.0.0.1:18830".parse().unwrap());
        let servers = config.v4.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers["v4"].listen.port(), 18830);
    }
}

//! IO modules - external system interfaces
//!
//! - `mqtt` - MQTT client for receiving scanner advertisements
//! - `serial_scanner` - Serial BLE scanner dongle
//! - `control` - TCP line protocol for navigation clients
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `mqtt_egress` - MQTT publisher for guidance, sessions and metrics
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod control;
pub mod egress_channel;
pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;
pub mod serial_scanner;

pub use control::start_control_listener;
pub use egress_channel::{
    create_egress_channel, EgressMessage, EgressSender, PositionPayload, SessionEventPayload,
};
pub use mqtt_egress::MqttPublisher;
pub use serial_scanner::SerialScanner;

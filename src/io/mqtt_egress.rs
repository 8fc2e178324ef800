//! MQTT publisher for navigation output
//!
//! - guidance topic: latest guidance snapshot (QoS 1, retained so a
//!   reconnecting display gets the current instruction immediately)
//! - session topic: started / stopped / arrived events (QoS 1)
//! - position topic: recompute estimates (QoS 0)
//! - metrics topic: periodic metrics snapshots (QoS 0)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Receives messages from the egress channel and publishes them
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    guidance_topic: String,
    session_topic: String,
    position_topic: String,
    metrics_topic: String,
}

impl MqttPublisher {
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("wayfinder-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            guidance_topic: config.mqtt_egress_guidance_topic().to_string(),
            session_topic: config.mqtt_egress_session_topic().to_string(),
            position_topic: config.mqtt_egress_position_topic().to_string(),
            metrics_topic: config.mqtt_egress_metrics_topic().to_string(),
        }
    }

    /// Publish until shutdown, then drain what is queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            guidance = %self.guidance_topic,
            session = %self.session_topic,
            position = %self.position_topic,
            metrics = %self.metrics_topic,
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                Some(msg) = self.rx.recv() => {
                    self.publish_message(msg).await;
                }
            }
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        match msg {
            EgressMessage::Guidance(payload) => {
                self.publish(&self.guidance_topic, QoS::AtLeastOnce, true, &payload).await;
            }
            EgressMessage::Session(payload) => {
                self.publish(&self.session_topic, QoS::AtLeastOnce, false, &payload).await;
            }
            EgressMessage::Position(payload) => {
                self.publish(&self.position_topic, QoS::AtMostOnce, false, &payload).await;
            }
            EgressMessage::Metrics(payload) => {
                self.publish(&self.metrics_topic, QoS::AtMostOnce, false, &payload).await;
            }
        }
    }

    async fn publish<T: Serialize>(&self, topic: &str, qos: QoS, retain: bool, payload: &T) {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                error!(topic = %topic, error = %e, "mqtt_egress_serialize_failed");
                return;
            }
        };
        if let Err(e) = self.client.publish(topic, qos, retain, json.into_bytes()).await {
            if qos == QoS::AtLeastOnce {
                error!(topic = %topic, error = %e, "mqtt_egress_publish_failed");
            } else {
                debug!(topic = %topic, error = %e, "mqtt_egress_publish_failed");
            }
        }
    }
}

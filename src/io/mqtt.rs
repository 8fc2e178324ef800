//! MQTT client for receiving BLE scanner advertisements

use crate::domain::types::{epoch_ms, Advertisement, ScannerMessage, TimestampValue};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::navigator::NavCommand;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Forward adverts from one producer to the navigator without blocking.
///
/// Drops are counted in metrics and warned about at most once per second.
pub struct AdvertForwarder {
    nav_tx: mpsc::Sender<NavCommand>,
    metrics: Arc<Metrics>,
    last_drop_warn: Instant,
}

impl AdvertForwarder {
    pub fn new(nav_tx: mpsc::Sender<NavCommand>, metrics: Arc<Metrics>) -> Self {
        Self { nav_tx, metrics, last_drop_warn: Instant::now() - Duration::from_secs(2) }
    }

    /// Returns false once the navigator is gone
    pub fn forward(&mut self, advert: Advertisement) -> bool {
        match self.nav_tx.try_send(NavCommand::Advertisement(advert)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.metrics.record_advert_dropped();
                if self.last_drop_warn.elapsed() > Duration::from_secs(1) {
                    warn!("advert_dropped: channel full");
                    self.last_drop_warn = Instant::now();
                }
                true
            }
            Err(TrySendError::Closed(_)) => {
                warn!("navigator channel closed");
                false
            }
        }
    }
}

/// Start the MQTT client and forward scanner adverts to the navigator
pub async fn start_scanner_client(
    config: &Config,
    nav_tx: mpsc::Sender<NavCommand>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("wayfinder-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_scanner_topic(), QoS::AtMostOnce).await?;

    info!(
        topic = %config.mqtt_scanner_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_scanner_subscribed"
    );

    let mut forwarder = AdvertForwarder::new(nav_tx, metrics);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Ok(json_str) = std::str::from_utf8(&publish.payload) else {
                            warn!(topic = %publish.topic, "mqtt_payload_not_utf8");
                            continue;
                        };
                        let adverts = parse_scanner_message(json_str, epoch_ms());
                        if adverts.len() > 1 {
                            debug!(topic = %publish.topic, count = %adverts.len(), "scanner_batch");
                        }
                        for advert in adverts {
                            if !forwarder.forward(advert) {
                                return Ok(());
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Parse a scanner JSON payload (single advert or batch).
/// Malformed payloads yield nothing; missing timestamps take `received_ms`.
pub fn parse_scanner_message(json_str: &str, received_ms: u64) -> Vec<Advertisement> {
    let message: ScannerMessage = match serde_json::from_str(json_str) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "scanner_message_malformed");
            return Vec::new();
        }
    };

    let adverts = match message {
        ScannerMessage::Batch { scanner, adverts } => {
            tracing::trace!(scanner = ?scanner, count = %adverts.len(), "scanner_batch_parsed");
            adverts
        }
        ScannerMessage::Single(advert) => vec![advert],
    };

    adverts
        .into_iter()
        .filter(|a| !a.name.is_empty())
        .map(|a| Advertisement {
            timestamp: timestamp_to_epoch_ms(&a.ts).unwrap_or(received_ms),
            identity: a.name,
            rssi: a.rssi,
        })
        .collect()
}

/// Parse RFC 3339 timestamp to epoch milliseconds
fn parse_iso_time(time_str: &str) -> Option<u64> {
    OffsetDateTime::parse(time_str, &Rfc3339)
        .ok()
        .and_then(|dt| u64::try_from(dt.unix_timestamp_nanos() / 1_000_000).ok())
}

fn timestamp_to_epoch_ms(ts: &TimestampValue) -> Option<u64> {
    match ts {
        TimestampValue::EpochMs(ms) => Some(*ms),
        TimestampValue::IsoString(s) => parse_iso_time(s),
        TimestampValue::None => None,
    }
}

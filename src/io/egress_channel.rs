//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to send events to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::types::epoch_ms;
use crate::infra::metrics::{MetricsSummary, METRICS_NUM_BUCKETS};
use crate::services::guidance::GuidanceOutput;
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Guidance snapshot, sent whenever it changes
    Guidance(GuidancePayload),
    /// Session lifecycle event (started, stopped, arrived)
    Session(SessionEventPayload),
    /// Position estimate from the recompute tick
    Position(PositionPayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

#[derive(Debug, Clone, Serialize)]
pub struct GuidancePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
    #[serde(flatten)]
    pub guidance: GuidanceOutput,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEventPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub ts: u64,
    /// Event type: started, stopped, arrived
    pub t: String,
    pub session: String,
    pub target: String,
    /// Arrival trigger (graph, proximity)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Free-text phrase the destination was classified from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phrase: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub ts: u64,
    pub session: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    /// Location id for graph-only estimates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub confidence: u8,
    /// Fresh observations the estimate was computed from
    pub visible: usize,
}

/// Payload for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    pub site: String,
    pub ts: u64,
    pub commands_total: u64,
    pub commands_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub lat_p99_us: u64,
    pub adverts_received: u64,
    pub adverts_dropped: u64,
    pub session_state: u64,
    pub visible_beacons: u64,
    pub hops_confirmed: u64,
    pub arrivals: u64,
    pub predictions: u64,
    pub model_load_failures: u64,
}

impl MetricsPayload {
    pub fn from_summary(summary: MetricsSummary, site: String) -> Self {
        Self {
            site,
            ts: epoch_ms(),
            commands_total: summary.commands_total,
            commands_per_sec: summary.commands_per_sec,
            avg_latency_us: summary.avg_process_latency_us,
            max_latency_us: summary.max_process_latency_us,
            lat_buckets: summary.lat_buckets,
            lat_p99_us: summary.lat_p99_us,
            adverts_received: summary.adverts_received,
            adverts_dropped: summary.adverts_dropped,
            session_state: summary.session_state,
            visible_beacons: summary.visible_beacons,
            hops_confirmed: summary.hops_confirmed,
            arrivals: summary.arrivals_graph + summary.arrivals_proximity,
            predictions: summary.predictions_total,
            model_load_failures: summary.model_load_failures,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Send a guidance snapshot. Returns false if it was dropped.
    pub fn send_guidance(&self, guidance: GuidanceOutput) -> bool {
        let payload = GuidancePayload { site: Some(self.site_id.clone()), ts: epoch_ms(), guidance };
        self.tx.try_send(EgressMessage::Guidance(payload)).is_ok()
    }

    /// Send a session lifecycle event
    /// Injects site_id into the payload
    pub fn send_session_event(&self, mut payload: SessionEventPayload) {
        payload.site = Some(self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Session(payload));
    }

    pub fn send_position(&self, mut payload: PositionPayload) {
        payload.site = Some(self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Position(payload));
    }

    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Metrics(payload));
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::guidance::NavState;

    fn guidance() -> GuidanceOutput {
        GuidanceOutput {
            session: "s1".into(),
            instruction: "Walk to Library".into(),
            state: NavState::EnRoute,
            path_unclear: false,
            arrived: false,
            target: "library".into(),
            target_bearing: Some(90.0),
            rotation: None,
            confidence: Some(66),
            current: Some("hallway_main".into()),
            next: Some("library".into()),
            hops_remaining: Some(1),
        }
    }

    #[test]
    fn test_guidance_payload_is_flat() {
        let (sender, mut rx) = create_egress_channel(4, "north".into());
        assert!(sender.send_guidance(guidance()));

        let Ok(EgressMessage::Guidance(payload)) = rx.try_recv() else {
            panic!("expected guidance");
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["site"], "north");
        assert_eq!(json["instruction"], "Walk to Library");
        assert_eq!(json["state"], "en_route");
        assert!(json.get("rotation").is_none());
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (sender, _rx) = create_egress_channel(1, "north".into());
        assert!(sender.send_guidance(guidance()));
        assert!(!sender.send_guidance(guidance()));
    }

    #[test]
    fn test_session_event_gets_site() {
        let (sender, mut rx) = create_egress_channel(4, "north".into());
        sender.send_session_event(SessionEventPayload {
            site: None,
            ts: 1,
            t: "arrived".into(),
            session: "s1".into(),
            target: "library".into(),
            trigger: Some("graph".into()),
            phrase: None,
        });
        let Ok(EgressMessage::Session(payload)) = rx.try_recv() else {
            panic!("expected session event");
        };
        assert_eq!(payload.site.as_deref(), Some("north"));
        assert_eq!(payload.trigger.as_deref(), Some("graph"));
    }
}

//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::services::guidance::{ArrivalTrigger, NavState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Session state values for the Prometheus gauge
pub const SESSION_STATE_IDLE: u64 = 0;
pub const SESSION_STATE_UNKNOWN: u64 = 1;
pub const SESSION_STATE_LOCATED: u64 = 2;
pub const SESSION_STATE_EN_ROUTE: u64 = 3;
pub const SESSION_STATE_ARRIVED: u64 = 4;

pub fn session_state_code(state: Option<NavState>) -> u64 {
    match state {
        None => SESSION_STATE_IDLE,
        Some(NavState::Unknown) => SESSION_STATE_UNKNOWN,
        Some(NavState::Located) => SESSION_STATE_LOCATED,
        Some(NavState::EnRoute) => SESSION_STATE_EN_ROUTE,
        Some(NavState::Arrived) => SESSION_STATE_ARRIVED,
    }
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Total commands processed by the navigator (monotonic)
    commands_total: AtomicU64,
    /// Commands since last report (reset on report)
    commands_since_report: AtomicU64,
    /// Sum of processing latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max processing latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Processing latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Advertisements that reached the navigator
    adverts_received: AtomicU64,
    /// Advertisements from identities not bound to any location
    adverts_ignored: AtomicU64,
    /// Advertisements dropped because no session was active
    adverts_detached: AtomicU64,
    /// Advertisements dropped at ingress because the channel was full
    adverts_dropped: AtomicU64,
    sessions_started: AtomicU64,
    sessions_stopped: AtomicU64,
    hops_confirmed: AtomicU64,
    /// Next-hop sightings at or below the arrival threshold
    weak_sightings: AtomicU64,
    path_unclear_total: AtomicU64,
    arrivals_graph: AtomicU64,
    arrivals_proximity: AtomicU64,
    recomputes_total: AtomicU64,
    signal_lost_total: AtomicU64,
    predictions_total: AtomicU64,
    /// Predictions decided by priors alone
    predictions_unsure: AtomicU64,
    predictions_not_ready: AtomicU64,
    /// Predicted classes that are not locations
    predictions_rejected: AtomicU64,
    models_installed: AtomicU64,
    model_load_failures: AtomicU64,
    /// Guidance messages dropped because the egress channel was full
    egress_dropped: AtomicU64,
    /// Current session state (see SESSION_STATE_*)
    session_state: AtomicU64,
    /// Fresh observations in the latest visibility set
    visible_beacons: AtomicU64,
    /// Current advert queue depth (updated by sampler)
    advert_queue_depth: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            commands_total: AtomicU64::new(0),
            commands_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            adverts_received: AtomicU64::new(0),
            adverts_ignored: AtomicU64::new(0),
            adverts_detached: AtomicU64::new(0),
            adverts_dropped: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            sessions_stopped: AtomicU64::new(0),
            hops_confirmed: AtomicU64::new(0),
            weak_sightings: AtomicU64::new(0),
            path_unclear_total: AtomicU64::new(0),
            arrivals_graph: AtomicU64::new(0),
            arrivals_proximity: AtomicU64::new(0),
            recomputes_total: AtomicU64::new(0),
            signal_lost_total: AtomicU64::new(0),
            predictions_total: AtomicU64::new(0),
            predictions_unsure: AtomicU64::new(0),
            predictions_not_ready: AtomicU64::new(0),
            predictions_rejected: AtomicU64::new(0),
            models_installed: AtomicU64::new(0),
            model_load_failures: AtomicU64::new(0),
            egress_dropped: AtomicU64::new(0),
            session_state: AtomicU64::new(SESSION_STATE_IDLE),
            visible_beacons: AtomicU64::new(0),
            advert_queue_depth: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a navigator command was processed with given latency (lock-free)
    #[inline]
    pub fn record_command_processed(&self, latency_us: u64) {
        self.commands_total.fetch_add(1, Ordering::Relaxed);
        self.commands_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_advert_received(&self) {
        self.adverts_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_advert_ignored(&self) {
        self.adverts_ignored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_advert_detached(&self) {
        self.adverts_detached.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an advert dropped due to channel full (lock-free)
    #[inline]
    pub fn record_advert_dropped(&self) {
        self.adverts_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn adverts_dropped(&self) -> u64 {
        self.adverts_dropped.load(Ordering::Relaxed)
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_stopped(&self) {
        self.sessions_stopped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hop_confirmed(&self) {
        self.hops_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_weak_sighting(&self) {
        self.weak_sightings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_path_unclear(&self) {
        self.path_unclear_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_arrival(&self, trigger: ArrivalTrigger) {
        match trigger {
            ArrivalTrigger::Graph => self.arrivals_graph.fetch_add(1, Ordering::Relaxed),
            ArrivalTrigger::Proximity => self.arrivals_proximity.fetch_add(1, Ordering::Relaxed),
        };
    }

    #[inline]
    pub fn record_recompute(&self, visible: usize) {
        self.recomputes_total.fetch_add(1, Ordering::Relaxed);
        self.visible_beacons.store(visible as u64, Ordering::Relaxed);
    }

    pub fn record_signal_lost(&self) {
        self.signal_lost_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prediction(&self, unsure: bool) {
        self.predictions_total.fetch_add(1, Ordering::Relaxed);
        if unsure {
            self.predictions_unsure.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_prediction_not_ready(&self) {
        self.predictions_not_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prediction_rejected(&self) {
        self.predictions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_model_installed(&self) {
        self.models_installed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_model_load_failed(&self) {
        self.model_load_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_egress_dropped(&self) {
        self.egress_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_session_state(&self, state: Option<NavState>) {
        self.session_state.store(session_state_code(state), Ordering::Relaxed);
    }

    pub fn session_state(&self) -> u64 {
        self.session_state.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_advert_queue_depth(&self, depth: u64) {
        self.advert_queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn commands_total(&self) -> u64 {
        self.commands_total.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let commands_count = self.commands_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let commands_per_sec = if elapsed.as_secs_f64() > 0.0 {
            commands_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if commands_count > 0 { latency_sum / commands_count } else { 0 };

        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSummary {
            commands_total: load(&self.commands_total),
            commands_per_sec,
            avg_process_latency_us: avg_latency,
            max_process_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            adverts_received: load(&self.adverts_received),
            adverts_ignored: load(&self.adverts_ignored),
            adverts_detached: load(&self.adverts_detached),
            adverts_dropped: load(&self.adverts_dropped),
            sessions_started: load(&self.sessions_started),
            sessions_stopped: load(&self.sessions_stopped),
            hops_confirmed: load(&self.hops_confirmed),
            weak_sightings: load(&self.weak_sightings),
            path_unclear_total: load(&self.path_unclear_total),
            arrivals_graph: load(&self.arrivals_graph),
            arrivals_proximity: load(&self.arrivals_proximity),
            recomputes_total: load(&self.recomputes_total),
            signal_lost_total: load(&self.signal_lost_total),
            predictions_total: load(&self.predictions_total),
            predictions_unsure: load(&self.predictions_unsure),
            predictions_not_ready: load(&self.predictions_not_ready),
            predictions_rejected: load(&self.predictions_rejected),
            models_installed: load(&self.models_installed),
            model_load_failures: load(&self.model_load_failures),
            egress_dropped: load(&self.egress_dropped),
            session_state: load(&self.session_state),
            visible_beacons: load(&self.visible_beacons),
            advert_queue_depth: load(&self.advert_queue_depth),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for egress)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub commands_total: u64,
    pub commands_per_sec: f64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    /// Command processing latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub adverts_received: u64,
    pub adverts_ignored: u64,
    pub adverts_detached: u64,
    pub adverts_dropped: u64,
    pub sessions_started: u64,
    pub sessions_stopped: u64,
    pub hops_confirmed: u64,
    pub weak_sightings: u64,
    pub path_unclear_total: u64,
    pub arrivals_graph: u64,
    pub arrivals_proximity: u64,
    pub recomputes_total: u64,
    pub signal_lost_total: u64,
    pub predictions_total: u64,
    pub predictions_unsure: u64,
    pub predictions_not_ready: u64,
    pub predictions_rejected: u64,
    pub models_installed: u64,
    pub model_load_failures: u64,
    pub egress_dropped: u64,
    /// Current session state (0=idle, 1=unknown, 2=located, 3=en_route, 4=arrived)
    pub session_state: u64,
    pub visible_beacons: u64,
    pub advert_queue_depth: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            commands_total = %self.commands_total,
            commands_per_sec = format!("{:.1}", self.commands_per_sec),
            avg_latency_us = %self.avg_process_latency_us,
            max_latency_us = %self.max_process_latency_us,
            p99_us = %self.lat_p99_us,
            adverts = %self.adverts_received,
            adverts_dropped = %self.adverts_dropped,
            session_state = %self.session_state,
            visible = %self.visible_beacons,
            hops = %self.hops_confirmed,
            arrivals = %(self.arrivals_graph + self.arrivals_proximity),
            model_failures = %self.model_load_failures,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.commands_total(), 0);
        assert_eq!(metrics.session_state(), SESSION_STATE_IDLE);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_command_processed(100);
        metrics.record_command_processed(200);
        metrics.record_command_processed(300);
        metrics.record_arrival(ArrivalTrigger::Proximity);
        metrics.record_prediction(true);
        metrics.record_prediction(false);

        let summary = metrics.report();

        assert_eq!(summary.commands_total, 3);
        assert_eq!(summary.avg_process_latency_us, 200);
        assert_eq!(summary.max_process_latency_us, 300);
        assert_eq!(summary.arrivals_proximity, 1);
        assert_eq!(summary.arrivals_graph, 0);
        assert_eq!(summary.predictions_total, 2);
        assert_eq!(summary.predictions_unsure, 1);

        // periodic counters reset, monotonic ones survive
        let again = metrics.report();
        assert_eq!(again.avg_process_latency_us, 0);
        assert_eq!(again.max_process_latency_us, 0);
        assert_eq!(again.commands_total, 3);
    }

    #[test]
    fn test_session_state_gauge() {
        let metrics = Metrics::new();
        metrics.set_session_state(Some(NavState::EnRoute));
        assert_eq!(metrics.session_state(), SESSION_STATE_EN_ROUTE);
        metrics.set_session_state(None);
        assert_eq!(metrics.session_state(), SESSION_STATE_IDLE);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_command_processed(i as u64);
                    m.record_advert_dropped();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.commands_total(), 10_000);
        assert_eq!(metrics.adverts_dropped(), 10_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_command_processed(150);
        }
        let summary = metrics.report();
        assert_eq!(summary.lat_buckets[1], 100);
        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
    }
}

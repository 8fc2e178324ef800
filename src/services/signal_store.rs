//! Latest-observation store for bound beacons
//!
//! One observation per location, newest wins unconditionally. Staleness is
//! evaluated lazily against the caller's clock when a snapshot is taken.

use crate::domain::topology::Topology;
use crate::domain::types::{LocationId, Observation, STALENESS_MS};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Non-stale observations at a point in time, ordered by location id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibilitySet {
    entries: Vec<Observation>,
}

impl VisibilitySet {
    pub fn from_observations(mut entries: Vec<Observation>) -> Self {
        entries.sort_by(|a, b| a.location.cmp(&b.location));
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.entries.iter()
    }

    pub fn get(&self, location: &str) -> Option<&Observation> {
        self.entries.iter().find(|o| o.location.as_str() == location)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct SignalStore {
    topology: Arc<Topology>,
    latest: FxHashMap<LocationId, Observation>,
    staleness_ms: u64,
}

impl SignalStore {
    pub fn new(topology: Arc<Topology>) -> Self {
        Self::with_staleness(topology, STALENESS_MS)
    }

    pub fn with_staleness(topology: Arc<Topology>, staleness_ms: u64) -> Self {
        Self { topology, latest: FxHashMap::default(), staleness_ms }
    }

    /// Record a sighting. Unbound identities are ignored and return `None`.
    pub fn ingest(&mut self, identity: &str, rssi: i32, timestamp: u64) -> Option<Observation> {
        let Some(location) = self.topology.resolve_beacon(identity) else {
            trace!(identity = %identity, "beacon_unbound");
            return None;
        };

        let observation = Observation { location: location.clone(), rssi, observed_at: timestamp };
        self.latest.insert(location.clone(), observation.clone());
        Some(observation)
    }

    /// Fresh observations at `now`; stale entries are dropped from the store
    pub fn snapshot(&mut self, now: u64) -> VisibilitySet {
        let before = self.latest.len();
        let window = self.staleness_ms;
        self.latest.retain(|_, obs| obs.is_fresh_within(now, window));

        let pruned = before - self.latest.len();
        if pruned > 0 {
            debug!(pruned = %pruned, remaining = %self.latest.len(), "observations_pruned");
        }

        VisibilitySet::from_observations(self.latest.values().cloned().collect())
    }

    pub fn clear(&mut self) {
        self.latest.clear();
    }

    /// Retained entries, stale ones included until the next snapshot
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

//! Position estimation from a visibility set
//!
//! Coordinate topologies get a signal-weighted centroid; graph-only
//! topologies get the strongest trusted node. Both are pure functions of the
//! visibility set and the static topology.

use crate::domain::topology::Topology;
use crate::domain::types::{Coordinate, LocationId};
use crate::services::signal_store::VisibilitySet;
use std::sync::Arc;

const RSSI_FLOOR: i32 = -100;
const RSSI_CEIL: i32 = -40;

/// Each visible beacon adds this much centroid confidence, capped at 100
const CONFIDENCE_PER_BEACON: usize = 33;

/// Signal-quality weight: -100 dBm maps to 0, -40 dBm to 1, linear in between
#[inline]
pub fn signal_weight(rssi: i32) -> f64 {
    let clamped = rssi.clamp(RSSI_FLOOR, RSSI_CEIL);
    f64::from(clamped - RSSI_FLOOR) / f64::from(RSSI_CEIL - RSSI_FLOOR)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Estimate {
    /// Weighted centroid of visible beacon coordinates
    Continuous { position: Coordinate, confidence: u8, active: usize },
    /// Strongest trusted beacon location
    Node { location: LocationId, rssi: i32, confidence: u8 },
}

impl Estimate {
    pub fn confidence(&self) -> u8 {
        match self {
            Estimate::Continuous { confidence, .. } | Estimate::Node { confidence, .. } => *confidence,
        }
    }
}

pub struct PositionEstimator {
    topology: Arc<Topology>,
    min_node_rssi: i32,
}

impl PositionEstimator {
    pub fn new(topology: Arc<Topology>, min_node_rssi: i32) -> Self {
        Self { topology, min_node_rssi }
    }

    /// `None` means "searching": nothing visible or nothing trustworthy
    pub fn estimate(&self, visible: &VisibilitySet) -> Option<Estimate> {
        if visible.is_empty() {
            return None;
        }
        if self.topology.has_coordinates() {
            self.centroid(visible)
        } else {
            self.strongest_node(visible)
        }
    }

    fn centroid(&self, visible: &VisibilitySet) -> Option<Estimate> {
        let mut total_x = 0.0;
        let mut total_y = 0.0;
        let mut total_weight = 0.0;
        let mut active = 0usize;

        for obs in visible.iter() {
            let Some(coord) = self.topology.coordinate(obs.location.as_str()) else { continue };
            let weight = signal_weight(obs.rssi);
            total_x += coord.x * weight;
            total_y += coord.y * weight;
            total_weight += weight;
            active += 1;
        }

        if total_weight <= 0.0 {
            return None;
        }

        let confidence = (active * CONFIDENCE_PER_BEACON).min(100) as u8;
        Some(Estimate::Continuous {
            position: Coordinate::new(total_x / total_weight, total_y / total_weight),
            confidence,
            active,
        })
    }

    fn strongest_node(&self, visible: &VisibilitySet) -> Option<Estimate> {
        // visibility sets iterate in id order, so strict > keeps the lowest id on ties
        let mut best: Option<(&LocationId, i32)> = None;
        for obs in visible.iter() {
            if best.map_or(true, |(_, rssi)| obs.rssi > rssi) {
                best = Some((&obs.location, obs.rssi));
            }
        }

        let (location, rssi) = best?;
        if rssi < self.min_node_rssi {
            return None;
        }
        Some(Estimate::Node {
            location: location.clone(),
            rssi,
            confidence: (signal_weight(rssi) * 100.0).round() as u8,
        })
    }
}

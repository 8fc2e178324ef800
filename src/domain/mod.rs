//! Domain models - site topology and signal types
//!
//! - `topology` - Locations, beacons, adjacency and coordinates
//! - `types` - Advertisements, observations, coordinates and scanner payloads

pub mod topology;
pub mod types;

pub use topology::{Topology, TopologyConfig, TopologyError};

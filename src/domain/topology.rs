//! Static site topology: locations, beacon bindings and the adjacency graph
//!
//! Built once from configuration and never mutated. Neighbor order is kept
//! exactly as written in the config file because it decides route ties.

use crate::domain::types::{Coordinate, LocationId};
use rustc_hash::FxHashMap;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::marker::PhantomData;
use thiserror::Error;

/// Configuration-time topology errors (fatal at load)
#[derive(Debug, Error, PartialEq)]
pub enum TopologyError {
    #[error("topology has no locations")]
    Empty,
    #[error("duplicate location id '{0}'")]
    DuplicateLocation(String),
    #[error("{context} references unknown location '{id}'")]
    UnknownLocation { context: &'static str, id: String },
    #[error("bearing {bearing} on edge {from} -> {to} is outside [0, 360)")]
    InvalidBearing { from: String, to: String, bearing: f64 },
    #[error("location '{0}' lists itself as a neighbor")]
    SelfLoop(String),
    #[error("location '{0}' has a non-finite or half-specified coordinate")]
    InvalidCoordinate(String),
}

/// Map that keeps entries in document order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(pub Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a table")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(4));
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

/// Adjacency for one node: directed edges with bearings, or undirected neighbors
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AdjacencySpec {
    Neighbors(Vec<String>),
    Bearings(OrderedMap<f64>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocationConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
}

/// `[topology]` section of the config file
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct TopologyConfig {
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
    /// Beacon advertised name to location id
    #[serde(default)]
    pub beacons: HashMap<String, String>,
    #[serde(default)]
    pub adjacency: OrderedMap<AdjacencySpec>,
}

impl TopologyConfig {
    /// Four-node demo campus: entrance, main hallway, library, cafeteria
    pub fn campus() -> Self {
        let loc = |id: &str, name: &str, x: f64, y: f64| LocationConfig {
            id: id.to_string(),
            name: name.to_string(),
            x: Some(x),
            y: Some(y),
        };
        let neighbors = |ids: &[&str]| {
            AdjacencySpec::Neighbors(ids.iter().map(|s| s.to_string()).collect())
        };
        Self {
            locations: vec![
                loc("entrance", "Main Entrance", 0.0, 0.0),
                loc("hallway_main", "Main Hallway", 0.0, 10.0),
                loc("library", "Library", 10.0, 10.0),
                loc("cafeteria", "Cafeteria", -10.0, 10.0),
            ],
            beacons: HashMap::from([
                ("ESP32_A".to_string(), "entrance".to_string()),
                ("ESP32_B".to_string(), "hallway_main".to_string()),
                ("ESP32_C".to_string(), "library".to_string()),
                ("ESP32_D".to_string(), "cafeteria".to_string()),
            ]),
            adjacency: OrderedMap(vec![
                ("entrance".to_string(), neighbors(&["hallway_main"])),
                ("hallway_main".to_string(), neighbors(&["library", "cafeteria"])),
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub coordinate: Option<Coordinate>,
}

/// Directed edge out of a location
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub to: LocationId,
    /// Compass heading to face when traversing, if annotated
    pub bearing: Option<f64>,
}

/// Immutable topology lookup
#[derive(Debug, Clone)]
pub struct Topology {
    locations: Vec<Location>,
    index: FxHashMap<LocationId, usize>,
    beacons: FxHashMap<String, LocationId>,
    adjacency: Vec<SmallVec<[Edge; 4]>>,
    has_coordinates: bool,
}

impl Topology {
    pub fn from_config(config: &TopologyConfig) -> Result<Self, TopologyError> {
        if config.locations.is_empty() {
            return Err(TopologyError::Empty);
        }

        let mut locations = Vec::with_capacity(config.locations.len());
        let mut index = FxHashMap::default();
        for lc in &config.locations {
            let id = LocationId(lc.id.clone());
            if index.contains_key(&id) {
                return Err(TopologyError::DuplicateLocation(lc.id.clone()));
            }
            let coordinate = match (lc.x, lc.y) {
                (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some(Coordinate::new(x, y)),
                (None, None) => None,
                _ => return Err(TopologyError::InvalidCoordinate(lc.id.clone())),
            };
            index.insert(id.clone(), locations.len());
            locations.push(Location { id, name: lc.name.clone(), coordinate });
        }

        let mut beacons = FxHashMap::default();
        for (identity, loc) in &config.beacons {
            let Some(&i) = index.get(loc.as_str()) else {
                return Err(TopologyError::UnknownLocation { context: "beacon binding", id: loc.clone() });
            };
            beacons.insert(identity.clone(), locations[i].id.clone());
        }

        let has_coordinates = locations.iter().all(|l| l.coordinate.is_some());

        let mut topology = Self {
            adjacency: vec![SmallVec::new(); locations.len()],
            locations,
            index,
            beacons,
            has_coordinates,
        };

        for (from, spec) in &config.adjacency.0 {
            let from_idx = topology.require(from)?;
            match spec {
                AdjacencySpec::Neighbors(list) => {
                    for to in list {
                        let to_idx = topology.require(to)?;
                        if to_idx == from_idx {
                            return Err(TopologyError::SelfLoop(from.clone()));
                        }
                        topology.add_edge(from_idx, to_idx, None);
                        topology.add_edge(to_idx, from_idx, None);
                    }
                }
                AdjacencySpec::Bearings(map) => {
                    for (to, bearing) in &map.0 {
                        let bearing = *bearing;
                        let to_idx = topology.require(to)?;
                        if to_idx == from_idx {
                            return Err(TopologyError::SelfLoop(from.clone()));
                        }
                        if !(0.0..360.0).contains(&bearing) {
                            return Err(TopologyError::InvalidBearing {
                                from: from.clone(),
                                to: to.clone(),
                                bearing,
                            });
                        }
                        topology.add_edge(from_idx, to_idx, Some(bearing));
                    }
                }
            }
        }

        Ok(topology)
    }

    fn require(&self, id: &str) -> Result<usize, TopologyError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| TopologyError::UnknownLocation { context: "adjacency", id: id.to_string() })
    }

    /// Insert or annotate an edge; an existing edge keeps its position in the list
    fn add_edge(&mut self, from: usize, to: usize, bearing: Option<f64>) {
        let to_id = self.locations[to].id.clone();
        let edges = &mut self.adjacency[from];
        if let Some(edge) = edges.iter_mut().find(|e| e.to == to_id) {
            if bearing.is_some() {
                edge.bearing = bearing;
            }
        } else {
            edges.push(Edge { to: to_id, bearing });
        }
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn location(&self, id: &str) -> Option<&Location> {
        self.index.get(id).map(|&i| &self.locations[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Human-readable name, falling back to the id
    pub fn name<'a>(&'a self, id: &'a str) -> &'a str {
        self.location(id).map(|l| l.name.as_str()).unwrap_or(id)
    }

    pub fn coordinate(&self, id: &str) -> Option<Coordinate> {
        self.location(id).and_then(|l| l.coordinate)
    }

    /// Resolve an advertised beacon name to its location
    pub fn resolve_beacon(&self, identity: &str) -> Option<&LocationId> {
        self.beacons.get(identity)
    }

    /// Outgoing edges in configuration order
    pub fn neighbors(&self, id: &str) -> &[Edge] {
        self.index.get(id).map(|&i| self.adjacency[i].as_slice()).unwrap_or(&[])
    }

    pub fn edge(&self, from: &str, to: &str) -> Option<&Edge> {
        self.neighbors(from).iter().find(|e| e.to.as_str() == to)
    }

    pub fn is_adjacent(&self, from: &str, to: &str) -> bool {
        self.edge(from, to).is_some()
    }

    /// True when every location carries a coordinate
    pub fn has_coordinates(&self) -> bool {
        self.has_coordinates
    }

    pub fn beacon_count(&self) -> usize {
        self.beacons.len()
    }
}

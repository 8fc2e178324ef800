//! Guidance state machine for a single navigation session
//!
//! Unknown -> Located -> EnRoute -> Arrived. Observations move the session
//! only on the first fresh sighting of any bound beacon, a strong sighting of
//! the expected next hop, or (while the path is unclear) a strong sighting of
//! a neighbour or the target. Geometric proximity to the target (coordinate
//! topologies) is a second, independent arrival trigger.

use crate::domain::topology::Topology;
use crate::domain::types::{relative_rotation, Coordinate, LocationId, Observation, STALENESS_MS};
use crate::services::planner::{NextHop, PathPlanner};
use crate::services::position::Estimate;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Next-hop sightings must be stronger than this to advance the session
pub const DEFAULT_ARRIVAL_RSSI: i32 = -65;
pub const DEFAULT_ARRIVAL_RADIUS: f64 = 2.0;

#[derive(Debug, Error, PartialEq)]
pub enum GuidanceError {
    #[error("unknown destination '{0}'")]
    UnknownDestination(String),
}

#[derive(Debug, Clone, Copy)]
pub struct GuidanceConfig {
    pub arrival_rssi: i32,
    pub arrival_radius: f64,
    pub staleness_ms: u64,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            arrival_rssi: DEFAULT_ARRIVAL_RSSI,
            arrival_radius: DEFAULT_ARRIVAL_RADIUS,
            staleness_ms: STALENESS_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavState {
    Unknown,
    Located,
    EnRoute,
    Arrived,
}

impl NavState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NavState::Unknown => "unknown",
            NavState::Located => "located",
            NavState::EnRoute => "en_route",
            NavState::Arrived => "arrived",
        }
    }
}

/// Which path produced arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalTrigger {
    /// Final hop confirmed by beacon sighting
    Graph,
    /// Continuous position came within the arrival radius
    Proximity,
}

impl ArrivalTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrivalTrigger::Graph => "graph",
            ArrivalTrigger::Proximity => "proximity",
        }
    }
}

/// What an input did to the session
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    None,
    EnRoute,
    HopConfirmed(LocationId),
    PathUnclear,
    Approaching,
    Arrived(ArrivalTrigger),
}

#[derive(Debug, Clone)]
pub struct NavigationSession {
    pub id: String,
    pub started_at: u64,
    pub state: NavState,
    pub current: Option<LocationId>,
    pub target: LocationId,
    pub next: Option<LocationId>,
    pub target_bearing: Option<f64>,
    pub path_unclear: bool,
    /// Latest sub-threshold sighting of the next hop
    pub approaching: Option<(LocationId, i32)>,
    pub arrival: Option<ArrivalTrigger>,
    pub position: Option<Coordinate>,
    pub confidence: Option<u8>,
    pub signal_lost: bool,
    bearing_from_edge: bool,
}

impl NavigationSession {
    fn new(target: LocationId, now: u64) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            started_at: now,
            state: NavState::Unknown,
            current: None,
            target,
            next: None,
            target_bearing: None,
            path_unclear: false,
            approaching: None,
            arrival: None,
            position: None,
            confidence: None,
            signal_lost: false,
            bearing_from_edge: false,
        }
    }
}

/// Guidance snapshot pushed to the rendering side whenever it changes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuidanceOutput {
    pub session: String,
    pub instruction: String,
    pub state: NavState,
    pub path_unclear: bool,
    pub arrived: bool,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_bearing: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hops_remaining: Option<usize>,
}

pub struct GuidanceStateMachine {
    topology: Arc<Topology>,
    planner: PathPlanner,
    config: GuidanceConfig,
    session: Option<NavigationSession>,
}

impl GuidanceStateMachine {
    pub fn new(topology: Arc<Topology>, config: GuidanceConfig) -> Self {
        let planner = PathPlanner::new(topology.clone());
        Self { topology, planner, config, session: None }
    }

    /// Begin navigating to `target`, replacing any active session
    pub fn start(&mut self, target: &str, now: u64) -> Result<&NavigationSession, GuidanceError> {
        let Some(location) = self.topology.location(target) else {
            return Err(GuidanceError::UnknownDestination(target.to_string()));
        };
        let session = NavigationSession::new(location.id.clone(), now);
        info!(session = %session.id, target = %session.target, "navigation_started");
        Ok(self.session.insert(session))
    }

    /// Drop the session. Safe to call in any state, any number of times.
    pub fn stop(&mut self) -> bool {
        match self.session.take() {
            Some(session) => {
                info!(session = %session.id, state = %session.state.as_str(), "navigation_stopped");
                true
            }
            None => false,
        }
    }

    pub fn session(&self) -> Option<&NavigationSession> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn on_observation(&mut self, obs: &Observation, now: u64) -> Transition {
        if !obs.is_fresh_within(now, self.config.staleness_ms) {
            return Transition::None;
        }
        let Some(state) = self.session.as_ref().map(|s| s.state) else {
            return Transition::None;
        };

        match state {
            NavState::Unknown => {
                if let Some(session) = self.session.as_mut() {
                    session.current = Some(obs.location.clone());
                }
                debug!(location = %obs.location, rssi = %obs.rssi, "first_detection");
                self.plan_from_current()
            }
            NavState::Located => self.on_located_observation(obs),
            NavState::EnRoute => self.on_en_route_observation(obs),
            NavState::Arrived => Transition::None,
        }
    }

    /// Path was unclear: a strong sighting of the target, or of a location
    /// adjacent to current in either direction, moves current and replans
    fn on_located_observation(&mut self, obs: &Observation) -> Transition {
        let arrival_rssi = self.config.arrival_rssi;
        let Some(session) = self.session.as_mut() else { return Transition::None };
        let Some(current) = session.current.as_ref() else { return Transition::None };
        if *current == obs.location || obs.rssi <= arrival_rssi {
            return Transition::None;
        }
        let (from, to) = (current.as_str(), obs.location.as_str());
        let reachable = obs.location == session.target
            || self.topology.is_adjacent(from, to)
            || self.topology.is_adjacent(to, from);
        if !reachable {
            return Transition::None;
        }

        info!(session = %session.id, from = %from, to = %to, rssi = %obs.rssi, "located_moved");
        session.current = Some(obs.location.clone());
        match self.plan_from_current() {
            Transition::PathUnclear => Transition::None,
            other => other,
        }
    }

    fn on_en_route_observation(&mut self, obs: &Observation) -> Transition {
        let arrival_rssi = self.config.arrival_rssi;
        let Some(session) = self.session.as_mut() else { return Transition::None };
        if session.next.as_ref() != Some(&obs.location) {
            return Transition::None;
        }

        if obs.rssi <= arrival_rssi {
            debug!(location = %obs.location, rssi = %obs.rssi, "next_hop_approaching");
            session.approaching = Some((obs.location.clone(), obs.rssi));
            return Transition::Approaching;
        }

        info!(
            session = %session.id,
            from = ?session.current,
            to = %obs.location,
            rssi = %obs.rssi,
            "hop_confirmed"
        );
        session.current = Some(obs.location.clone());
        match self.plan_from_current() {
            Transition::EnRoute => Transition::HopConfirmed(obs.location.clone()),
            other => other,
        }
    }

    /// Feed a recomputed position estimate
    pub fn on_position(&mut self, estimate: &Estimate) -> Transition {
        let radius = self.config.arrival_radius;
        let target_coord = match self.session.as_ref() {
            Some(s) => self.topology.coordinate(s.target.as_str()),
            None => return Transition::None,
        };
        let Some(session) = self.session.as_mut() else { return Transition::None };

        session.confidence = Some(estimate.confidence());
        session.signal_lost = false;
        let Estimate::Continuous { position, .. } = estimate else {
            return Transition::None;
        };
        session.position = Some(*position);

        if session.state == NavState::Arrived {
            return Transition::None;
        }
        let Some(target_coord) = target_coord else { return Transition::None };

        if position.distance_to(&target_coord) < radius {
            info!(
                session = %session.id,
                x = %position.x,
                y = %position.y,
                target = %session.target,
                "arrived_by_proximity"
            );
            Self::mark_arrived(session, ArrivalTrigger::Proximity);
            return Transition::Arrived(ArrivalTrigger::Proximity);
        }

        if session.state == NavState::EnRoute && !session.bearing_from_edge {
            session.target_bearing = Some(position.bearing_to(&target_coord));
        }
        Transition::None
    }

    /// Recompute found nothing to estimate from
    pub fn on_signal_lost(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.position = None;
            session.confidence = None;
            session.signal_lost = true;
        }
    }

    fn plan_from_current(&mut self) -> Transition {
        let Some(session) = self.session.as_mut() else { return Transition::None };
        let Some(current) = session.current.clone() else { return Transition::None };
        session.approaching = None;

        match self.planner.next_hop(current.as_str(), session.target.as_str()) {
            NextHop::Arrived => {
                info!(session = %session.id, target = %session.target, "arrived_by_graph");
                Self::mark_arrived(session, ArrivalTrigger::Graph);
                Transition::Arrived(ArrivalTrigger::Graph)
            }
            NextHop::Hop { next, bearing } => {
                let (target_bearing, from_edge) = match bearing {
                    Some(b) => (Some(b), true),
                    None => {
                        let origin = session.position.or_else(|| self.topology.coordinate(current.as_str()));
                        let target = self.topology.coordinate(session.target.as_str());
                        match (self.topology.has_coordinates(), origin, target) {
                            (true, Some(o), Some(t)) => (Some(o.bearing_to(&t)), false),
                            _ => (None, false),
                        }
                    }
                };
                debug!(current = %current, next = %next, bearing = ?target_bearing, "next_hop_planned");
                session.state = NavState::EnRoute;
                session.next = Some(next);
                session.target_bearing = target_bearing;
                session.bearing_from_edge = from_edge;
                session.path_unclear = false;
                Transition::EnRoute
            }
            NextHop::Unreachable => {
                if !session.path_unclear {
                    info!(session = %session.id, current = %current, target = %session.target, "path_unclear");
                }
                session.state = NavState::Located;
                session.next = None;
                session.target_bearing = None;
                session.path_unclear = true;
                Transition::PathUnclear
            }
        }
    }

    fn mark_arrived(session: &mut NavigationSession, trigger: ArrivalTrigger) {
        session.state = NavState::Arrived;
        session.arrival = Some(trigger);
        session.next = None;
        session.target_bearing = None;
        session.path_unclear = false;
        session.approaching = None;
    }

    /// Render the current session for display
    pub fn output(&self, heading: Option<f64>) -> Option<GuidanceOutput> {
        let s = self.session.as_ref()?;
        let target_name = self.topology.name(s.target.as_str());

        let instruction = match s.state {
            NavState::Arrived => "You have arrived!".to_string(),
            _ if s.signal_lost => "No signal detected".to_string(),
            NavState::Unknown => "Searching for beacons...".to_string(),
            NavState::Located => match s.current.as_ref() {
                Some(c) => format!("Path unclear from {}", self.topology.name(c.as_str())),
                None => "Path unclear".to_string(),
            },
            NavState::EnRoute => match s.next.as_ref() {
                Some(next) if *next != s.target => {
                    format!("Walk to {} (toward {})", self.topology.name(next.as_str()), target_name)
                }
                _ => format!("Walk to {target_name}"),
            },
        };

        let hops_remaining = match (s.state, s.current.as_ref()) {
            (NavState::Arrived, _) => Some(0),
            (_, Some(c)) => self.planner.route(c.as_str(), s.target.as_str()).map(|r| r.len() - 1),
            (_, None) => None,
        };

        Some(GuidanceOutput {
            session: s.id.clone(),
            instruction,
            state: s.state,
            path_unclear: s.path_unclear,
            arrived: s.state == NavState::Arrived,
            target: s.target.to_string(),
            target_bearing: s.target_bearing,
            rotation: s.target_bearing.zip(heading).map(|(b, h)| relative_rotation(b, h)),
            confidence: s.confidence,
            current: s.current.as_ref().map(|c| c.to_string()),
            next: s.next.as_ref().map(|n| n.to_string()),
            hops_remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::topology::TopologyConfig;

    const CHAIN: &str = r#"
locations = [
  { id = "A", name = "Atrium" },
  { id = "B", name = "Bridge" },
  { id = "C", name = "Corridor" },
  { id = "D", name = "Dock" },
  { id = "X", name = "Annex" },
]
[beacons]
BCN_A = "A"
BCN_B = "B"
BCN_C = "C"
BCN_D = "D"
BCN_X = "X"
[adjacency]
A = ["B"]
B = ["C"]
C = ["D"]
"#;

    const NOW: u64 = 1_767_617_600_000;

    fn machine(toml_src: &str) -> GuidanceStateMachine {
        let cfg: TopologyConfig = toml::from_str(toml_src).unwrap();
        GuidanceStateMachine::new(Arc::new(Topology::from_config(&cfg).unwrap()), GuidanceConfig::default())
    }

    fn campus() -> GuidanceStateMachine {
        GuidanceStateMachine::new(
            Arc::new(Topology::from_config(&TopologyConfig::campus()).unwrap()),
            GuidanceConfig::default(),
        )
    }

    fn seen(location: &str, rssi: i32) -> Observation {
        Observation { location: location.into(), rssi, observed_at: NOW }
    }

    fn snapshot(m: &GuidanceStateMachine) -> (NavState, Option<String>, Option<String>) {
        let s = m.session().unwrap();
        (
            s.state,
            s.current.as_ref().map(|c| c.to_string()),
            s.next.as_ref().map(|n| n.to_string()),
        )
    }

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_walk_along_chain_to_arrival() {
        let mut m = machine(CHAIN);
        m.start("D", NOW).unwrap();
        assert_eq!(snapshot(&m), (NavState::Unknown, None, None));

        assert_eq!(m.on_observation(&seen("A", -50), NOW), Transition::EnRoute);
        assert_eq!(snapshot(&m), (NavState::EnRoute, some("A"), some("B")));

        assert_eq!(m.on_observation(&seen("B", -55), NOW), Transition::HopConfirmed("B".into()));
        assert_eq!(snapshot(&m), (NavState::EnRoute, some("B"), some("C")));

        // B is now current; a weak repeat of it changes nothing
        assert_eq!(m.on_observation(&seen("B", -80), NOW), Transition::None);
        assert_eq!(snapshot(&m), (NavState::EnRoute, some("B"), some("C")));

        assert_eq!(m.on_observation(&seen("C", -60), NOW), Transition::HopConfirmed("C".into()));
        assert_eq!(
            m.on_observation(&seen("D", -60), NOW),
            Transition::Arrived(ArrivalTrigger::Graph)
        );
        let s = m.session().unwrap();
        assert_eq!(s.state, NavState::Arrived);
        assert_eq!(s.current.as_ref().map(|c| c.as_str()), Some("D"));
        assert_eq!(s.arrival, Some(ArrivalTrigger::Graph));
    }

    #[test]
    fn test_weak_next_hop_sighting_only_marks_approaching() {
        let mut m = machine(CHAIN);
        m.start("D", NOW).unwrap();
        m.on_observation(&seen("A", -50), NOW);

        assert_eq!(m.on_observation(&seen("B", -65), NOW), Transition::Approaching);
        assert_eq!(m.on_observation(&seen("B", -80), NOW), Transition::Approaching);
        assert_eq!(snapshot(&m), (NavState::EnRoute, some("A"), some("B")));
        assert_eq!(m.session().unwrap().approaching, Some(("B".into(), -80)));

        m.on_observation(&seen("B", -64), NOW);
        assert_eq!(snapshot(&m), (NavState::EnRoute, some("B"), some("C")));
        assert_eq!(m.session().unwrap().approaching, None);
    }

    #[test]
    fn test_first_detection_ignores_strength() {
        let mut m = machine(CHAIN);
        m.start("D", NOW).unwrap();
        m.on_observation(&seen("B", -99), NOW);
        assert_eq!(snapshot(&m), (NavState::EnRoute, some("B"), some("C")));
    }

    #[test]
    fn test_unrelated_sightings_do_not_perturb_route() {
        let mut m = machine(CHAIN);
        m.start("D", NOW).unwrap();
        m.on_observation(&seen("A", -50), NOW);

        assert_eq!(m.on_observation(&seen("D", -40), NOW), Transition::None);
        assert_eq!(m.on_observation(&seen("C", -40), NOW), Transition::None);
        assert_eq!(m.on_observation(&seen("X", -40), NOW), Transition::None);
        assert_eq!(snapshot(&m), (NavState::EnRoute, some("A"), some("B")));
    }

    #[test]
    fn test_detecting_target_first_is_immediate_arrival() {
        let mut m = machine(CHAIN);
        m.start("C", NOW).unwrap();
        assert_eq!(
            m.on_observation(&seen("C", -70), NOW),
            Transition::Arrived(ArrivalTrigger::Graph)
        );
        assert_eq!(m.output(None).unwrap().hops_remaining, Some(0));
    }

    #[test]
    fn test_unreachable_target_stays_located_with_path_unclear() {
        let mut m = machine(CHAIN);
        m.start("D", NOW).unwrap();

        assert_eq!(m.on_observation(&seen("X", -50), NOW), Transition::PathUnclear);
        let s = m.session().unwrap();
        assert_eq!(s.state, NavState::Located);
        assert!(s.path_unclear);
        assert_eq!(m.output(None).unwrap().instruction, "Path unclear from Annex");

        // X has no neighbours, so nothing can move it
        assert_eq!(m.on_observation(&seen("A", -50), NOW), Transition::None);
        assert_eq!(snapshot(&m), (NavState::Located, some("X"), None));
    }

    const ONE_WAY: &str = r#"
locations = [
  { id = "A", name = "Atrium" },
  { id = "B", name = "Bridge" },
  { id = "T", name = "Tower" },
]
[adjacency]
A = { B = 10.0, T = 20.0 }
"#;

    #[test]
    fn test_located_recovers_through_reverse_neighbour() {
        let mut m = machine(ONE_WAY);
        m.start("T", NOW).unwrap();
        assert_eq!(m.on_observation(&seen("B", -50), NOW), Transition::PathUnclear);

        // weak sightings do not move current
        assert_eq!(m.on_observation(&seen("A", -70), NOW), Transition::None);
        assert_eq!(snapshot(&m), (NavState::Located, some("B"), None));

        // A -> B edge makes A adjacent to B; from A the tower is reachable
        assert_eq!(m.on_observation(&seen("A", -50), NOW), Transition::EnRoute);
        assert_eq!(snapshot(&m), (NavState::EnRoute, some("A"), some("T")));
        let s = m.session().unwrap();
        assert!(!s.path_unclear);
        assert_eq!(s.target_bearing, Some(20.0));
    }

    #[test]
    fn test_located_arrives_on_strong_target_sighting() {
        let mut m = machine(ONE_WAY);
        m.start("T", NOW).unwrap();
        m.on_observation(&seen("B", -50), NOW);

        assert_eq!(
            m.on_observation(&seen("T", -40), NOW),
            Transition::Arrived(ArrivalTrigger::Graph)
        );
        assert_eq!(m.session().unwrap().state, NavState::Arrived);
    }

    #[test]
    fn test_located_move_that_stays_unreachable() {
        let mut m = machine(
            r#"
locations = [{ id = "A", name = "A" }, { id = "B", name = "B" }, { id = "T", name = "T" }]
[adjacency]
B = { A = 0.0 }
T = { A = 90.0 }
"#,
        );
        m.start("T", NOW).unwrap();
        assert_eq!(m.on_observation(&seen("B", -50), NOW), Transition::PathUnclear);
        assert_eq!(m.on_observation(&seen("A", -50), NOW), Transition::None);
        assert_eq!(snapshot(&m), (NavState::Located, some("A"), None));
        assert!(m.session().unwrap().path_unclear);
    }

    #[test]
    fn test_stale_observation_is_ignored() {
        let mut m = machine(CHAIN);
        m.start("D", NOW).unwrap();
        let old = Observation { location: "A".into(), rssi: -40, observed_at: NOW - 3001 };
        assert_eq!(m.on_observation(&old, NOW), Transition::None);
        assert_eq!(snapshot(&m), (NavState::Unknown, None, None));
    }

    #[test]
    fn test_observations_without_session_are_ignored() {
        let mut m = machine(CHAIN);
        assert_eq!(m.on_observation(&seen("A", -40), NOW), Transition::None);
        assert!(m.output(None).is_none());
    }

    #[test]
    fn test_start_rejects_unknown_destination() {
        let mut m = machine(CHAIN);
        assert_eq!(
            m.start("ghost", NOW).unwrap_err(),
            GuidanceError::UnknownDestination("ghost".into())
        );
        assert!(!m.is_active());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut m = machine(CHAIN);
        m.start("D", NOW).unwrap();
        m.on_observation(&seen("A", -50), NOW);

        assert!(m.stop());
        assert!(m.session().is_none());
        assert!(!m.stop());
        assert!(m.session().is_none());
        assert!(m.output(None).is_none());
    }

    #[test]
    fn test_restart_replaces_session() {
        let mut m = machine(CHAIN);
        let first = m.start("D", NOW).unwrap().id.clone();
        m.on_observation(&seen("A", -50), NOW);
        let second = m.start("C", NOW).unwrap().id.clone();
        assert_ne!(first, second);
        assert_eq!(snapshot(&m), (NavState::Unknown, None, None));
    }

    #[test]
    fn test_edge_bearing_annotation_is_used() {
        let mut m = machine(
            r#"
locations = [{ id = "A", name = "A" }, { id = "B", name = "B" }]
[beacons]
BCN_A = "A"
[adjacency]
A = { B = 135.0 }
"#,
        );
        m.start("B", NOW).unwrap();
        m.on_observation(&seen("A", -50), NOW);
        assert_eq!(m.session().unwrap().target_bearing, Some(135.0));

        let out = m.output(Some(90.0)).unwrap();
        assert_eq!(out.rotation, Some(45.0));
        assert_eq!(out.instruction, "Walk to B");
    }

    #[test]
    fn test_coordinate_bearing_points_at_target() {
        let mut m = campus();
        m.start("library", NOW).unwrap();
        m.on_observation(&seen("entrance", -50), NOW);

        let s = m.session().unwrap();
        assert_eq!(s.next.as_ref().map(|n| n.as_str()), Some("hallway_main"));
        // entrance (0,0) toward library (10,10)
        assert!((s.target_bearing.unwrap() - 45.0).abs() < 1e-9);
        assert_eq!(
            m.output(None).unwrap().instruction,
            "Walk to Main Hallway (toward Library)"
        );
    }

    #[test]
    fn test_position_refreshes_bearing_and_triggers_proximity_arrival() {
        let mut m = campus();
        m.start("library", NOW).unwrap();
        m.on_observation(&seen("entrance", -50), NOW);

        let near_hall =
            Estimate::Continuous { position: Coordinate::new(0.0, 10.0), confidence: 66, active: 2 };
        assert_eq!(m.on_position(&near_hall), Transition::None);
        let s = m.session().unwrap();
        assert!((s.target_bearing.unwrap() - 90.0).abs() < 1e-9);
        assert_eq!(s.confidence, Some(66));

        let at_library =
            Estimate::Continuous { position: Coordinate::new(9.0, 9.5), confidence: 99, active: 3 };
        assert_eq!(m.on_position(&at_library), Transition::Arrived(ArrivalTrigger::Proximity));
        let s = m.session().unwrap();
        assert_eq!(s.state, NavState::Arrived);
        assert_eq!(s.arrival, Some(ArrivalTrigger::Proximity));
        // graph walk never reached the library
        assert_eq!(s.current.as_ref().map(|c| c.as_str()), Some("entrance"));

        let out = m.output(Some(10.0)).unwrap();
        assert!(out.arrived);
        assert_eq!(out.instruction, "You have arrived!");
        assert_eq!(out.rotation, None);

        // terminal until stop
        assert_eq!(m.on_observation(&seen("hallway_main", -40), NOW), Transition::None);
    }

    #[test]
    fn test_signal_lost_instruction() {
        let mut m = campus();
        m.start("library", NOW).unwrap();
        m.on_observation(&seen("entrance", -50), NOW);
        m.on_signal_lost();
        let out = m.output(None).unwrap();
        assert_eq!(out.instruction, "No signal detected");
        assert_eq!(out.confidence, None);
    }

    #[test]
    fn test_output_serializes_snake_case_state() {
        let mut m = machine(CHAIN);
        m.start("D", NOW).unwrap();
        m.on_observation(&seen("A", -50), NOW);
        let json = serde_json::to_value(m.output(None).unwrap()).unwrap();
        assert_eq!(json["state"], "en_route");
        assert_eq!(json["next"], "B");
        assert_eq!(json["hops_remaining"], 3);
        assert!(json.get("target_bearing").is_none());
    }
}

//! End-to-end navigation over a graph-only site

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use wayfinder::domain::types::Advertisement;
use wayfinder::domain::{Topology, TopologyConfig};
use wayfinder::infra::{Config, Metrics};
use wayfinder::io::{create_egress_channel, EgressMessage};
use wayfinder::services::guidance::{GuidanceOutput, NavState};
use wayfinder::services::{Destination, NavCommand, Navigator};

const NOW: u64 = 1_767_617_600_000;

const SITE: &str = r#"
[[locations]]
id = "lobby"
name = "Lobby"

[[locations]]
id = "hall"
name = "Hall"

[[locations]]
id = "lab"
name = "Lab"

[beacons]
B1 = "lobby"
B2 = "hall"
B3 = "lab"

[adjacency]
lobby = ["hall"]

[adjacency.hall]
lab = 90.0
"#;

fn navigator() -> (Navigator, mpsc::Receiver<EgressMessage>, Arc<Metrics>) {
    let topology_config: TopologyConfig = toml::from_str(SITE).unwrap();
    let topology = Arc::new(Topology::from_config(&topology_config).unwrap());
    let metrics = Arc::new(Metrics::new());
    let (sender, rx) = create_egress_channel(64, "it".to_string());
    let nav = Navigator::new(&Config::default(), topology, metrics.clone(), Some(sender));
    (nav, rx, metrics)
}

fn seen(nav: &mut Navigator, identity: &str, rssi: i32) {
    let advert = Advertisement { identity: identity.to_string(), rssi, timestamp: NOW };
    nav.apply(NavCommand::Advertisement(advert), NOW);
}

fn drain(rx: &mut mpsc::Receiver<EgressMessage>) -> (Vec<GuidanceOutput>, Vec<String>) {
    let mut guidance = Vec::new();
    let mut events = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        match msg {
            EgressMessage::Guidance(p) => guidance.push(p.guidance),
            EgressMessage::Session(p) => events.push(p.t),
            _ => {}
        }
    }
    (guidance, events)
}

#[test]
fn test_walk_to_lab_over_graph() {
    let (mut nav, mut rx, metrics) = navigator();

    let (tx, mut reply) = oneshot::channel();
    nav.apply(
        NavCommand::Start { destination: Destination::Location("lab".into()), reply: Some(tx) },
        NOW,
    );
    let ack = reply.try_recv().unwrap().unwrap();
    assert_eq!(ack.target, "lab");
    assert_eq!(nav.output().unwrap().instruction, "Searching for beacons...");

    seen(&mut nav, "B1", -60);
    let out = nav.output().unwrap();
    assert_eq!(out.instruction, "Walk to Hall (toward Lab)");
    assert_eq!(out.target_bearing, None);
    assert_eq!(out.hops_remaining, Some(2));

    seen(&mut nav, "B2", -50);
    nav.apply(NavCommand::Heading(45.0), NOW);
    let out = nav.output().unwrap();
    assert_eq!(out.instruction, "Walk to Lab");
    assert_eq!(out.target_bearing, Some(90.0));
    assert_eq!(out.rotation, Some(45.0));

    seen(&mut nav, "B3", -60);
    let out = nav.output().unwrap();
    assert_eq!(out.state, NavState::Arrived);
    assert!(out.arrived);

    let (guidance, events) = drain(&mut rx);
    assert!(guidance.len() >= 4);
    assert_eq!(events, vec!["started", "arrived"]);

    let summary = metrics.report();
    // the final hop counts as an arrival, not a confirmation
    assert_eq!(summary.hops_confirmed, 1);
    assert_eq!(summary.arrivals_graph, 1);
    assert_eq!(summary.arrivals_proximity, 0);
}

#[test]
fn test_lab_to_lobby_has_no_route() {
    let (mut nav, _rx, _metrics) = navigator();

    nav.apply(NavCommand::Start { destination: Destination::Location("lobby".into()), reply: None }, NOW);
    seen(&mut nav, "B3", -55);

    let out = nav.output().unwrap();
    assert!(out.path_unclear);
    assert_eq!(out.instruction, "Path unclear from Lab");
}

#[test]
fn test_idle_navigator_ignores_adverts() {
    let (mut nav, mut rx, metrics) = navigator();
    seen(&mut nav, "B1", -40);

    assert!(nav.output().is_none());
    assert!(!nav.is_active());
    assert!(drain(&mut rx).0.is_empty());
    assert_eq!(metrics.report().adverts_detached, 1);
}

//! Next-hop planning over the topology graph
//!
//! Unweighted breadth-first search. Nodes are expanded in discovery order and
//! neighbors are visited in configuration order, so the first-discovered
//! shortest path wins every tie.

use crate::domain::topology::Topology;
use crate::domain::types::LocationId;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum NextHop {
    /// Start and target are the same location
    Arrived,
    /// Walk to `next`, facing `bearing` if the edge is annotated
    Hop { next: LocationId, bearing: Option<f64> },
    /// No path exists (or an endpoint is not in the topology)
    Unreachable,
}

pub struct PathPlanner {
    topology: Arc<Topology>,
}

impl PathPlanner {
    pub fn new(topology: Arc<Topology>) -> Self {
        Self { topology }
    }

    pub fn next_hop(&self, start: &str, target: &str) -> NextHop {
        if start == target && self.topology.contains(start) {
            return NextHop::Arrived;
        }
        match self.route(start, target) {
            Some(path) if path.len() >= 2 => {
                let next = path[1].clone();
                let bearing = self.topology.edge(start, next.as_str()).and_then(|e| e.bearing);
                NextHop::Hop { next, bearing }
            }
            Some(_) => NextHop::Arrived,
            None => NextHop::Unreachable,
        }
    }

    /// Full shortest path including both endpoints
    pub fn route(&self, start: &str, target: &str) -> Option<Vec<LocationId>> {
        let start_loc = self.topology.location(start)?;
        if !self.topology.contains(target) {
            return None;
        }
        if start == target {
            return Some(vec![start_loc.id.clone()]);
        }

        // parent pointers double as the visited set; first discovery is kept
        let mut parent: FxHashMap<&str, &str> = FxHashMap::default();
        let mut queue: VecDeque<&str> = VecDeque::new();
        parent.insert(start_loc.id.as_str(), start_loc.id.as_str());
        queue.push_back(start_loc.id.as_str());

        while let Some(current) = queue.pop_front() {
            for edge in self.topology.neighbors(current) {
                let next = edge.to.as_str();
                if parent.contains_key(next) {
                    continue;
                }
                parent.insert(next, current);
                if next == target {
                    return Some(Self::unwind(&parent, start, next));
                }
                queue.push_back(next);
            }
        }

        None
    }

    fn unwind(parent: &FxHashMap<&str, &str>, start: &str, target: &str) -> Vec<LocationId> {
        let mut path = vec![LocationId::from(target)];
        let mut node = target;
        while node != start {
            match parent.get(node) {
                Some(&p) => {
                    path.push(LocationId::from(p));
                    node = p;
                }
                None => break,
            }
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::topology::TopologyConfig;

    fn planner(toml_src: &str) -> PathPlanner {
        let cfg: TopologyConfig = toml::from_str(toml_src).unwrap();
        PathPlanner::new(Arc::new(Topology::from_config(&cfg).unwrap()))
    }

    const NODES: &str = r#"
locations = [
  { id = "A", name = "A" },
  { id = "B", name = "B" },
  { id = "C", name = "C" },
  { id = "D", name = "D" },
  { id = "E", name = "E" },
]
"#;

    fn hop_to(hop: NextHop) -> String {
        match hop {
            NextHop::Hop { next, .. } => next.0,
            other => panic!("expected hop, got {other:?}"),
        }
    }

    #[test]
    fn test_chain_next_hop() {
        let p = planner(&format!("{NODES}\n[adjacency]\nA = [\"B\"]\nB = [\"C\"]\nC = [\"D\"]\n"));
        assert_eq!(hop_to(p.next_hop("A", "D")), "B");
        assert_eq!(hop_to(p.next_hop("D", "A")), "C");
        assert_eq!(p.route("A", "D").unwrap().len(), 4);
    }

    #[test]
    fn test_dead_end_branch_is_skipped() {
        let p = planner(&format!("{NODES}\n[adjacency]\nA = [\"B\", \"C\"]\nC = [\"D\"]\n"));
        assert_eq!(hop_to(p.next_hop("A", "D")), "C");
    }

    #[test]
    fn test_equal_length_tie_follows_neighbor_order() {
        // A-B-D and A-C-D are both two hops; B is listed first
        let p = planner(&format!(
            "{NODES}\n[adjacency]\nA = [\"B\", \"C\"]\nB = [\"D\"]\nC = [\"D\"]\n"
        ));
        assert_eq!(hop_to(p.next_hop("A", "D")), "B");

        let p = planner(&format!(
            "{NODES}\n[adjacency]\nA = [\"C\", \"B\"]\nB = [\"D\"]\nC = [\"D\"]\n"
        ));
        assert_eq!(hop_to(p.next_hop("A", "D")), "C");
    }

    #[test]
    fn test_same_node_is_arrived() {
        let p = planner(NODES);
        assert_eq!(p.next_hop("A", "A"), NextHop::Arrived);
    }

    #[test]
    fn test_disconnected_is_unreachable() {
        let p = planner(&format!("{NODES}\n[adjacency]\nA = [\"B\"]\nD = [\"E\"]\n"));
        assert_eq!(p.next_hop("A", "E"), NextHop::Unreachable);
        assert_eq!(p.next_hop("A", "ghost"), NextHop::Unreachable);
        assert_eq!(p.next_hop("ghost", "ghost"), NextHop::Unreachable);
        assert!(p.route("A", "E").is_none());
    }

    #[test]
    fn test_directed_edges_and_bearing() {
        let p = planner(&format!("{NODES}\n[adjacency]\nA = {{ B = 45.0 }}\nB = {{ C = 120.0 }}\n"));
        assert_eq!(p.next_hop("A", "C"), NextHop::Hop { next: "B".into(), bearing: Some(45.0) });
        assert_eq!(p.next_hop("C", "A"), NextHop::Unreachable);
    }

    #[test]
    fn test_hop_is_always_an_edge_and_pure() {
        let p = planner(&format!(
            "{NODES}\n[adjacency]\nA = [\"B\", \"C\"]\nB = [\"D\"]\nC = [\"E\"]\nD = [\"E\"]\n"
        ));
        for start in ["A", "B", "C", "D", "E"] {
            for target in ["A", "B", "C", "D", "E"] {
                let first = p.next_hop(start, target);
                assert_eq!(first, p.next_hop(start, target));
                if let NextHop::Hop { next, .. } = first {
                    assert!(p.topology.is_adjacent(start, next.as_str()));
                }
            }
        }
    }
}

//! Structural analysis over the membrane hierarchy and the membrane-level
//! adjacency graph (parent/child edges plus port connections).

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use membrane_spec::MembraneId;

use crate::membrane::Membrane;
use crate::system::SystemState;

type Adjacency = BTreeMap<MembraneId, BTreeSet<MembraneId>>;

/// Snapshot of the system's shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologyReport {
    /// Membranes without a parent, in admission order.
    pub root_membranes: Vec<MembraneId>,
    /// Membranes without children, in admission order.
    pub leaf_membranes: Vec<MembraneId>,
    /// Deepest live membrane.
    pub max_depth: usize,
    /// Child edges divided by the number of membranes that have children.
    pub average_branching_factor: f64,
    /// Membrane-level connection count per membrane.
    pub degree_centrality: BTreeMap<MembraneId, usize>,
    /// Membranes grouped by depth level. An approximation, not community
    /// detection.
    pub communities: BTreeMap<usize, Vec<MembraneId>>,
    /// Mean local clustering coefficient.
    pub clustering_coefficient: f64,
    /// Longest shortest path inside any connected component.
    pub network_diameter: usize,
}

pub(crate) fn analyze(state: &SystemState) -> TopologyReport {
    let mut ordered: Vec<&Membrane> = state.membranes.values().collect();
    ordered.sort_by_key(|m| m.created_seq);

    let root_membranes = ordered
        .iter()
        .filter(|m| m.is_root())
        .map(|m| m.id.clone())
        .collect();
    let leaf_membranes = ordered
        .iter()
        .filter(|m| m.is_leaf())
        .map(|m| m.id.clone())
        .collect();

    let mut communities: BTreeMap<usize, Vec<MembraneId>> = BTreeMap::new();
    for m in &ordered {
        communities.entry(m.depth).or_default().push(m.id.clone());
    }

    TopologyReport {
        root_membranes,
        leaf_membranes,
        max_depth: state.max_depth(),
        average_branching_factor: branching_factor(ordered.iter().map(|m| m.children.len())),
        degree_centrality: state
            .membranes
            .keys()
            .map(|id| (id.clone(), state.links.get(id).map_or(0, BTreeSet::len)))
            .collect(),
        communities,
        clustering_coefficient: clustering_coefficient(&state.links),
        network_diameter: diameter(&state.links),
    }
}

fn branching_factor(child_counts: impl Iterator<Item = usize>) -> f64 {
    let (edges, parents) = child_counts
        .filter(|n| *n > 0)
        .fold((0usize, 0usize), |(e, p), n| (e + n, p + 1));
    if parents == 0 {
        0.0
    } else {
        edges as f64 / parents as f64
    }
}

/// Mean over all nodes of `triangles / (k choose 2)`; nodes with fewer than
/// two neighbours count as zero.
fn clustering_coefficient(links: &Adjacency) -> f64 {
    if links.is_empty() {
        return 0.0;
    }
    let total: f64 = links
        .values()
        .map(|neighbours| {
            let k = neighbours.len();
            if k < 2 {
                return 0.0;
            }
            let mut closed = 0usize;
            for (i, a) in neighbours.iter().enumerate() {
                for b in neighbours.iter().skip(i + 1) {
                    if links.get(a).is_some_and(|n| n.contains(b)) {
                        closed += 1;
                    }
                }
            }
            closed as f64 / (k * (k - 1) / 2) as f64
        })
        .sum();
    total / links.len() as f64
}

fn diameter(links: &Adjacency) -> usize {
    links
        .keys()
        .map(|start| eccentricity(links, start))
        .max()
        .unwrap_or(0)
}

fn eccentricity(links: &Adjacency, start: &MembraneId) -> usize {
    let mut seen = BTreeSet::from([start]);
    let mut queue = VecDeque::from([(start, 0usize)]);
    let mut furthest = 0;
    while let Some((node, dist)) = queue.pop_front() {
        furthest = furthest.max(dist);
        for next in links.get(node).into_iter().flatten() {
            if seen.insert(next) {
                queue.push_back((next, dist + 1));
            }
        }
    }
    furthest
}

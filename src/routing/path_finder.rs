use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::domain::EPS_FLOW_M3S;
use crate::hydraulics::travel_time_s;
use crate::network::NetworkModel;

/// Cost weighting for path ranking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PathCosting {
    /// Flow used to evaluate per-section travel time for ranking (m3/s).
    pub reference_flow_m3s: f64,
    /// Weight of the conveyance-loss proxy `length * roughness` (s per m·n).
    pub loss_weight: f64,
}

impl Default for PathCosting {
    fn default() -> Self {
        Self {
            reference_flow_m3s: 1.0,
            loss_weight: 10.0,
        }
    }
}

/// A candidate delivery path from a reservoir to a zone outlet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    /// Section indices in order, source to destination.
    pub edges: Vec<usize>,
    /// min(max_flow) over the path; the achievable flow bound.
    pub bottleneck_m3s: f64,
    /// Total travel time at the reference flow (s).
    pub travel_time_s: f64,
    /// Ranking cost (travel time + conveyance-loss weight).
    pub cost: f64,
}

/// A section whose committed demand exceeds its capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub section_id: String,
    pub committed_m3s: f64,
    pub capacity_m3s: f64,
}

/// Dijkstra-style search over the network DAG producing ranked delivery
/// paths. Deterministic: heap entries are tie-broken by node index, and
/// final ranking is (cost, -bottleneck, edge count).
#[derive(Debug, Clone, Default)]
pub struct PathFinder {
    costing: PathCosting,
}

impl PathFinder {
    pub fn new(costing: PathCosting) -> Self {
        Self { costing }
    }

    fn edge_cost(&self, model: &NetworkModel, section_idx: usize) -> f64 {
        let section = model.section(section_idx);
        let travel = travel_time_s(section, self.costing.reference_flow_m3s);
        travel + self.costing.loss_weight * section.length_m * section.manning_roughness
    }

    /// Up to `k_alternatives` ranked paths from `source` to `destination`.
    ///
    /// Alternatives are generated Yen-style by re-running the search with
    /// one edge of an already-found path removed, deduplicated, and ranked
    /// together with the primary path.
    pub fn find_paths(
        &self,
        model: &NetworkModel,
        source: usize,
        destination: usize,
        k_alternatives: usize,
    ) -> Vec<Path> {
        let mut found: Vec<Path> = Vec::new();
        let Some(best) = self.shortest(model, source, destination, &HashSet::new()) else {
            return found;
        };
        found.push(best);

        let mut frontier = 0;
        while found.len() < k_alternatives && frontier < found.len() {
            let base_edges = found[frontier].edges.clone();
            let mut candidates: Vec<Path> = Vec::new();
            for &banned_edge in &base_edges {
                let banned = HashSet::from([banned_edge]);
                if let Some(alt) = self.shortest(model, source, destination, &banned) {
                    if !found.iter().any(|p| p.edges == alt.edges)
                        && !candidates.iter().any(|p| p.edges == alt.edges)
                    {
                        candidates.push(alt);
                    }
                }
            }
            candidates.sort_by(Self::rank);
            if let Some(next) = candidates.into_iter().next() {
                found.push(next);
            }
            frontier += 1;
        }

        found.sort_by(Self::rank);
        found.truncate(k_alternatives);
        found
    }

    /// Ordering: lower cost first, ties broken by higher bottleneck
    /// capacity, then by fewer edges, then by edge list for determinism.
    pub(crate) fn rank(a: &Path, b: &Path) -> std::cmp::Ordering {
        OrderedFloat(a.cost)
            .cmp(&OrderedFloat(b.cost))
            .then_with(|| OrderedFloat(b.bottleneck_m3s).cmp(&OrderedFloat(a.bottleneck_m3s)))
            .then_with(|| a.edges.len().cmp(&b.edges.len()))
            .then_with(|| a.edges.cmp(&b.edges))
    }

    fn shortest(
        &self,
        model: &NetworkModel,
        source: usize,
        destination: usize,
        banned_edges: &HashSet<usize>,
    ) -> Option<Path> {
        let n = model.node_count();
        let mut dist = vec![f64::INFINITY; n];
        let mut prev_edge: Vec<Option<usize>> = vec![None; n];
        dist[source] = 0.0;

        // Min-heap via Reverse; secondary key (node index) keeps popping
        // order deterministic for equal costs.
        let mut heap: BinaryHeap<Reverse<(OrderedFloat<f64>, usize)>> = BinaryHeap::new();
        heap.push(Reverse((OrderedFloat(0.0), source)));

        while let Some(Reverse((OrderedFloat(cost), node))) = heap.pop() {
            if node == destination {
                return Some(self.reconstruct(model, &prev_edge, destination));
            }
            if cost > dist[node] {
                continue;
            }
            for (edge, neighbor) in model.neighbors(node) {
                if banned_edges.contains(&edge) {
                    continue;
                }
                let next_cost = cost + self.edge_cost(model, edge);
                if next_cost < dist[neighbor] {
                    dist[neighbor] = next_cost;
                    prev_edge[neighbor] = Some(edge);
                    heap.push(Reverse((OrderedFloat(next_cost), neighbor)));
                }
            }
        }
        None
    }

    fn reconstruct(
        &self,
        model: &NetworkModel,
        prev_edge: &[Option<usize>],
        destination: usize,
    ) -> Path {
        let mut edges = Vec::new();
        let mut cur = destination;
        while let Some(edge) = prev_edge[cur] {
            edges.push(edge);
            cur = model.from_node(edge);
        }
        edges.reverse();

        let bottleneck_m3s = edges
            .iter()
            .map(|&e| model.section(e).max_flow_m3s)
            .fold(f64::INFINITY, f64::min);
        let travel: f64 = edges
            .iter()
            .map(|&e| travel_time_s(model.section(e), self.costing.reference_flow_m3s))
            .sum();
        let cost: f64 = edges.iter().map(|&e| self.edge_cost(model, e)).sum();

        Path {
            edges,
            bottleneck_m3s,
            travel_time_s: travel,
            cost,
        }
    }

    /// Sections where committed demand exceeds capacity, for the allocator
    /// and the reporting collaborator. `committed_m3s` is aligned with the
    /// model's section indices.
    pub fn detect_bottlenecks(model: &NetworkModel, committed_m3s: &[f64]) -> Vec<Bottleneck> {
        (0..model.section_count())
            .filter(|&s| committed_m3s[s] > model.section(s).max_flow_m3s + EPS_FLOW_M3S)
            .map(|s| Bottleneck {
                section_id: model.section(s).id.clone(),
                committed_m3s: committed_m3s[s],
                capacity_m3s: model.section(s).max_flow_m3s,
            })
            .collect()
    }
}

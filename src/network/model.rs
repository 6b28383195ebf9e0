use std::collections::HashMap;

use tracing::debug;

use crate::domain::{CanalSectionRecord, GateRecord, NodeKind, NodeRecord, TopologyRecords};
use crate::error::PlanError;

/// Immutable snapshot of canal topology and hydraulic geometry for one
/// planning cycle.
///
/// Nodes and sections get dense indices at load time; all per-cycle state
/// (levels, flows, openings) is stored in `Vec`s aligned to these indices,
/// which keeps solver iteration order deterministic.
#[derive(Debug, Clone)]
pub struct NetworkModel {
    nodes: Vec<NodeRecord>,
    sections: Vec<CanalSectionRecord>,
    /// Controlling gate per section, if any; aligned with `sections`.
    gates: Vec<Option<GateRecord>>,
    node_index: HashMap<String, usize>,
    section_index: HashMap<String, usize>,
    /// Outbound section indices per node.
    out_edges: Vec<Vec<usize>>,
    /// Inbound section indices per node.
    in_edges: Vec<Vec<usize>>,
    /// Node indices in topological order, sources first.
    topo_order: Vec<usize>,
    reservoirs: Vec<usize>,
}

impl NetworkModel {
    /// Build a validated model from raw topology records.
    ///
    /// Fails if any section references an undefined node, if the graph has a
    /// cycle (gravity flow requires a DAG), if no node is a reservoir, or if
    /// a non-reservoir node has no inbound section. No partial network is
    /// ever accepted.
    pub fn load_topology(records: &TopologyRecords) -> Result<Self, PlanError> {
        let mut node_index = HashMap::with_capacity(records.nodes.len());
        for (i, node) in records.nodes.iter().enumerate() {
            if node_index.insert(node.id.clone(), i).is_some() {
                return Err(PlanError::DuplicateId { id: node.id.clone() });
            }
        }

        let mut section_index = HashMap::with_capacity(records.sections.len());
        let mut out_edges = vec![Vec::new(); records.nodes.len()];
        let mut in_edges = vec![Vec::new(); records.nodes.len()];

        for (i, section) in records.sections.iter().enumerate() {
            if section_index.insert(section.id.clone(), i).is_some() {
                return Err(PlanError::DuplicateId { id: section.id.clone() });
            }
            let from = *node_index.get(&section.from_node).ok_or_else(|| {
                PlanError::MissingNode {
                    section_id: section.id.clone(),
                    node_id: section.from_node.clone(),
                }
            })?;
            let to = *node_index.get(&section.to_node).ok_or_else(|| {
                PlanError::MissingNode {
                    section_id: section.id.clone(),
                    node_id: section.to_node.clone(),
                }
            })?;
            out_edges[from].push(i);
            in_edges[to].push(i);
        }

        let mut gates: Vec<Option<GateRecord>> = vec![None; records.sections.len()];
        for gate in &records.gates {
            let idx = *section_index.get(&gate.canal_section_id).ok_or_else(|| {
                PlanError::MissingNode {
                    section_id: gate.canal_section_id.clone(),
                    node_id: gate.id.clone(),
                }
            })?;
            if gates[idx].is_some() {
                return Err(PlanError::DuplicateId { id: gate.id.clone() });
            }
            gates[idx] = Some(gate.clone());
        }

        let topo_order = Self::topological_order(&records.nodes, &records.sections, &node_index)?;

        let reservoirs: Vec<usize> = records
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.kind.is_reservoir())
            .map(|(i, _)| i)
            .collect();
        if reservoirs.is_empty() {
            return Err(PlanError::NoReservoir);
        }

        for (i, node) in records.nodes.iter().enumerate() {
            if !node.kind.is_reservoir() && in_edges[i].is_empty() {
                return Err(PlanError::UnfedNode {
                    node_id: node.id.clone(),
                });
            }
        }

        debug!(
            nodes = records.nodes.len(),
            sections = records.sections.len(),
            gates = records.gates.len(),
            reservoirs = reservoirs.len(),
            "topology loaded"
        );

        Ok(Self {
            nodes: records.nodes.clone(),
            sections: records.sections.clone(),
            gates,
            node_index,
            section_index,
            out_edges,
            in_edges,
            topo_order,
            reservoirs,
        })
    }

    /// Kahn's algorithm; any leftover node means a cycle. The reported node
    /// is the lexicographically smallest one still in the cycle so the error
    /// is deterministic.
    fn topological_order(
        nodes: &[NodeRecord],
        sections: &[CanalSectionRecord],
        node_index: &HashMap<String, usize>,
    ) -> Result<Vec<usize>, PlanError> {
        let mut indegree = vec![0usize; nodes.len()];
        let mut succ = vec![Vec::new(); nodes.len()];
        for section in sections {
            let from = node_index[&section.from_node];
            let to = node_index[&section.to_node];
            indegree[to] += 1;
            succ[from].push(to);
        }

        let mut ready: Vec<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(nodes.len());
        while let Some(i) = ready.pop() {
            order.push(i);
            for &next in &succ[i] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push(next);
                }
            }
        }

        if order.len() < nodes.len() {
            let node_id = (0..nodes.len())
                .filter(|&i| indegree[i] > 0)
                .map(|i| nodes[i].id.clone())
                .min()
                .unwrap_or_default();
            return Err(PlanError::CycleDetected { node_id });
        }
        Ok(order)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn gate_count(&self) -> usize {
        self.gates.iter().filter(|g| g.is_some()).count()
    }

    pub fn node(&self, idx: usize) -> &NodeRecord {
        &self.nodes[idx]
    }

    pub fn node_idx(&self, id: &str) -> Option<usize> {
        self.node_index.get(id).copied()
    }

    pub fn section(&self, idx: usize) -> &CanalSectionRecord {
        &self.sections[idx]
    }

    pub fn section_idx(&self, id: &str) -> Option<usize> {
        self.section_index.get(id).copied()
    }

    pub fn get_section(&self, id: &str) -> Option<&CanalSectionRecord> {
        self.section_idx(id).map(|i| &self.sections[i])
    }

    pub fn gate_for_section(&self, section_idx: usize) -> Option<&GateRecord> {
        self.gates[section_idx].as_ref()
    }

    /// Outbound (section index, downstream node index) pairs.
    pub fn neighbors(&self, node_idx: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.out_edges[node_idx].iter().map(move |&s| {
            let to = self.node_index[&self.sections[s].to_node];
            (s, to)
        })
    }

    pub fn out_sections(&self, node_idx: usize) -> &[usize] {
        &self.out_edges[node_idx]
    }

    pub fn in_sections(&self, node_idx: usize) -> &[usize] {
        &self.in_edges[node_idx]
    }

    pub fn from_node(&self, section_idx: usize) -> usize {
        self.node_index[&self.sections[section_idx].from_node]
    }

    pub fn to_node(&self, section_idx: usize) -> usize {
        self.node_index[&self.sections[section_idx].to_node]
    }

    pub fn topo_order(&self) -> &[usize] {
        &self.topo_order
    }

    pub fn reservoirs(&self) -> &[usize] {
        &self.reservoirs
    }

    /// Storage-in-transit volume of one section at a uniform depth.
    pub fn storage_volume_m3(&self, section_idx: usize, depth_m: f64) -> f64 {
        self.sections[section_idx].storage_volume_m3(depth_m)
    }

    /// Find the zone-outlet node index for a destination zone id.
    pub fn zone_outlet(&self, zone_id: &str) -> Option<usize> {
        self.node_idx(zone_id)
            .filter(|&i| matches!(self.nodes[i].kind, NodeKind::ZoneOutlet))
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::network::NetworkModel;

/// Ephemeral hydraulic state: per-node level, per-section flow, per-section
/// gate opening. Recomputed on every solver invocation, never persisted.
///
/// Vectors are aligned with the owning `NetworkModel`'s dense indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydraulicState {
    /// Free-surface level per node (m above datum).
    pub level_m: Vec<f64>,
    /// Flow per section (m3/s), non-negative in the DAG flow direction.
    pub flow_m3s: Vec<f64>,
    /// Gate opening per section in [0, 100]; 100 for ungated sections.
    pub opening_percent: Vec<f64>,
}

impl HydraulicState {
    pub fn empty(node_count: usize, section_count: usize) -> Self {
        Self {
            level_m: vec![0.0; node_count],
            flow_m3s: vec![0.0; section_count],
            opening_percent: vec![0.0; section_count],
        }
    }

    /// Overlay live sensor measurements onto a seed state. Unknown ids are
    /// ignored; the sensor collaborator may report a superset of the model.
    pub fn apply_measurements(
        &mut self,
        model: &NetworkModel,
        levels_by_node: &HashMap<String, f64>,
        flows_by_section: &HashMap<String, f64>,
    ) {
        for (id, &level) in levels_by_node {
            if let Some(i) = model.node_idx(id) {
                self.level_m[i] = level;
            }
        }
        for (id, &flow) in flows_by_section {
            if let Some(i) = model.section_idx(id) {
                self.flow_m3s[i] = flow.max(0.0);
            }
        }
    }

    /// Mass-balance residual at a node: inflow − outflow − boundary draw.
    pub fn residual_m3s(
        &self,
        model: &NetworkModel,
        boundary: &BoundaryFlows,
        node_idx: usize,
    ) -> f64 {
        let inflow: f64 = model
            .in_sections(node_idx)
            .iter()
            .map(|&s| self.flow_m3s[s])
            .sum();
        let outflow: f64 = model
            .out_sections(node_idx)
            .iter()
            .map(|&s| self.flow_m3s[s])
            .sum();
        inflow - outflow - boundary.draw_m3s[node_idx]
    }

    /// Largest absolute mass-balance residual over non-reservoir nodes.
    pub fn max_residual_m3s(&self, model: &NetworkModel, boundary: &BoundaryFlows) -> f64 {
        (0..model.node_count())
            .filter(|&n| !model.node(n).kind.is_reservoir())
            .map(|n| self.residual_m3s(model, boundary, n).abs())
            .fold(0.0, f64::max)
    }
}

/// Boundary conditions for one solver invocation: demand drawn off at each
/// node (zone outlets, normally). Reservoir levels are fixed by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryFlows {
    pub draw_m3s: Vec<f64>,
}

impl BoundaryFlows {
    pub fn zero(model: &NetworkModel) -> Self {
        Self {
            draw_m3s: vec![0.0; model.node_count()],
        }
    }

    pub fn with_draw(mut self, node_idx: usize, q_m3s: f64) -> Self {
        self.draw_m3s[node_idx] = q_m3s;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkModel;
    use crate::testutil::linear_topology;

    #[test]
    fn test_residual_accounts_for_draw() {
        let model = NetworkModel::load_topology(&linear_topology(&[5.0, 5.0])).unwrap();
        let j1 = model.node_idx("J1").unwrap();
        let z1 = model.node_idx("Z1").unwrap();

        let mut state = HydraulicState::empty(model.node_count(), model.section_count());
        state.flow_m3s = vec![2.0, 1.5];

        let boundary = BoundaryFlows::zero(&model).with_draw(z1, 1.5);
        // J1: 2.0 in, 1.5 out, no draw.
        assert!((state.residual_m3s(&model, &boundary, j1) - 0.5).abs() < 1e-12);
        // Z1: 1.5 in, 1.5 drawn.
        assert!(state.residual_m3s(&model, &boundary, z1).abs() < 1e-12);
        assert!((state.max_residual_m3s(&model, &boundary) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_apply_measurements_ignores_unknown_ids() {
        let model = NetworkModel::load_topology(&linear_topology(&[5.0])).unwrap();
        let mut state = HydraulicState::empty(model.node_count(), model.section_count());

        let levels = HashMap::from([("Z1".to_string(), 103.7), ("GHOST".to_string(), 1.0)]);
        let flows = HashMap::from([("C1".to_string(), 2.2)]);
        state.apply_measurements(&model, &levels, &flows);

        assert_eq!(state.level_m[model.node_idx("Z1").unwrap()], 103.7);
        assert_eq!(state.flow_m3s[model.section_idx("C1").unwrap()], 2.2);
    }
}

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::state::{BoundaryFlows, HydraulicState};
use crate::error::ConvergenceFailure;
use crate::network::NetworkModel;

/// Tunable solver knobs. Defaults follow the documented tolerances:
/// 1e-3 m3/s for flow, 1e-3 m for level, 200-iteration cap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub max_iterations: u32,
    pub eps_flow_m3s: f64,
    pub eps_level_m: f64,
    /// Under-relaxation factor applied to both flow and level corrections.
    pub damping: f64,
    /// Stability cap on a single level correction (m).
    pub max_level_step_m: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            eps_flow_m3s: 1e-3,
            eps_level_m: 1e-3,
            damping: 0.6,
            max_level_step_m: 0.25,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_iterations == 0 {
            return Err("max_iterations must be at least 1".into());
        }
        for (name, v) in [
            ("eps_flow_m3s", self.eps_flow_m3s),
            ("eps_level_m", self.eps_level_m),
            ("max_level_step_m", self.max_level_step_m),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(format!("{name} must be positive and finite, got {v}"));
            }
        }
        if !self.damping.is_finite() || self.damping <= 0.0 || self.damping > 1.0 {
            return Err(format!("damping must be in (0, 1], got {}", self.damping));
        }
        Ok(())
    }
}

/// A converged state plus the iteration count it took.
#[derive(Debug, Clone)]
pub struct Solved {
    pub state: HydraulicState,
    pub iterations: u32,
}

/// Result of inverting the discharge equation for a target flow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpeningSolution {
    pub opening_percent: f64,
    /// Flow actually achievable under head, gate and section limits.
    pub achievable_m3s: f64,
    /// True when `achievable_m3s` is below the requested flow.
    pub throttled: bool,
}

// Floors keeping the discharge-sensitivity estimate finite near zero head
// or zero flow.
const HEAD_FLOOR_M: f64 = 0.02;
const FLOW_FLOOR_M3S: f64 = 0.05;
const MIN_SENSITIVITY: f64 = 0.5;

// Ungated sections convey as a fully open equivalent orifice at unit
// reference depth.
const UNGATED_CD: f64 = 0.9;
const REFERENCE_DEPTH_M: f64 = 1.0;

/// Iterative fixed-point solver for the circular flow-level dependency.
///
/// Each sweep (1) recomputes section flows from the gate discharge equation
/// at the current level estimates with a damped update, then (2) corrects
/// each non-reservoir level by the damped mass-balance residual divided by a
/// local response coefficient (the summed discharge sensitivity dQ/dh of the
/// adjacent sections). Pure computation: no I/O, no shared state.
#[derive(Debug, Clone, Default)]
pub struct HydraulicSolver {
    settings: SolverSettings,
}

impl HydraulicSolver {
    pub fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// First-cycle seed: reservoir levels propagated downstream along the
    /// bed drop with zero flow and all gates shut.
    pub fn cold_start(model: &NetworkModel) -> HydraulicState {
        let mut state = HydraulicState::empty(model.node_count(), model.section_count());
        for &r in model.reservoirs() {
            if let Some(level) = model.node(r).kind.fixed_level_m() {
                state.level_m[r] = level;
            }
        }
        for &n in model.topo_order() {
            if model.node(n).kind.is_reservoir() {
                continue;
            }
            // Water surface follows the bed drop from the feeding sections;
            // the minimum keeps the seed deterministic on confluences.
            let seed = model
                .in_sections(n)
                .iter()
                .map(|&s| {
                    let section = model.section(s);
                    state.level_m[model.from_node(s)]
                        - section.bed_slope_fraction * section.length_m
                })
                .fold(f64::INFINITY, f64::min);
            if seed.is_finite() {
                state.level_m[n] = seed;
            }
        }
        state
    }

    /// Solve for a self-consistent state under the given boundary draws.
    ///
    /// Deterministic: the same model, seed and boundary always produce the
    /// same result. On hitting the iteration cap the last estimate is
    /// returned inside [`ConvergenceFailure`], never as a success.
    pub fn solve(
        &self,
        model: &NetworkModel,
        seed: &HydraulicState,
        boundary: &BoundaryFlows,
    ) -> Result<Solved, Box<ConvergenceFailure>> {
        debug_assert_eq!(seed.level_m.len(), model.node_count());
        debug_assert_eq!(seed.flow_m3s.len(), model.section_count());

        let s = &self.settings;
        let mut state = seed.clone();
        Self::pin_reservoir_levels(model, &mut state);

        let mut max_dq = f64::INFINITY;
        let mut max_dh = f64::INFINITY;

        for iteration in 1..=s.max_iterations {
            max_dq = 0.0;
            for sec in 0..model.section_count() {
                let target = self.section_discharge(model, &state, sec);
                let dq = s.damping * (target - state.flow_m3s[sec]);
                state.flow_m3s[sec] += dq;
                max_dq = max_dq.max(dq.abs());
            }

            max_dh = 0.0;
            for &n in model.topo_order() {
                if model.node(n).kind.is_reservoir() {
                    continue;
                }
                let residual = state.residual_m3s(model, boundary, n);
                let coeff = self.response_coefficient(model, &state, n);
                let dh = (s.damping * residual / coeff)
                    .clamp(-s.max_level_step_m, s.max_level_step_m);
                state.level_m[n] += dh;
                max_dh = max_dh.max(dh.abs());
            }

            let max_residual = state.max_residual_m3s(model, boundary);
            if max_dq < s.eps_flow_m3s && max_dh < s.eps_level_m && max_residual < s.eps_flow_m3s
            {
                debug!(iteration, max_dq, max_dh, max_residual, "solver converged");
                return Ok(Solved { state, iterations: iteration });
            }
        }

        let max_residual = state.max_residual_m3s(model, boundary);
        warn!(
            iterations = s.max_iterations,
            flow_residual = max_dq,
            level_residual = max_dh,
            mass_residual = max_residual,
            "solver hit iteration cap without converging"
        );
        Err(Box::new(ConvergenceFailure {
            iterations: s.max_iterations,
            flow_residual_m3s: max_dq,
            level_residual_m: max_dh,
            max_residual_m3s: max_residual,
            last_estimate: state,
        }))
    }

    /// Invert the discharge equation: the opening percentage that passes
    /// `target_m3s` under the current level estimates. Clamped to [0, 100]
    /// and to the gate/section limits; a clamp means the target is not
    /// achievable and the result is flagged throttled.
    pub fn opening_for_flow(
        &self,
        model: &NetworkModel,
        section_idx: usize,
        target_m3s: f64,
        state: &HydraulicState,
    ) -> OpeningSolution {
        let section = model.section(section_idx);
        let head =
            (state.level_m[model.from_node(section_idx)] - state.level_m[model.to_node(section_idx)]).max(0.0);

        let (full_open_m3s, hard_cap) = match model.gate_for_section(section_idx) {
            Some(gate) => (
                gate.discharge_coefficient
                    * gate.flow_area_m2
                    * (2.0 * crate::domain::GRAVITY_M_S2 * head).sqrt(),
                gate.max_discharge_m3s.min(section.max_flow_m3s),
            ),
            None => (
                UNGATED_CD
                    * section.cross_section_area_m2(REFERENCE_DEPTH_M)
                    * (2.0 * crate::domain::GRAVITY_M_S2 * head).sqrt(),
                section.max_flow_m3s,
            ),
        };

        let achievable = target_m3s.min(full_open_m3s).min(hard_cap).max(0.0);
        let opening_percent = if full_open_m3s > 0.0 {
            (100.0 * achievable / full_open_m3s).clamp(0.0, 100.0)
        } else {
            100.0
        };
        OpeningSolution {
            opening_percent,
            achievable_m3s: achievable,
            throttled: achievable + self.settings.eps_flow_m3s < target_m3s,
        }
    }

    fn pin_reservoir_levels(model: &NetworkModel, state: &mut HydraulicState) {
        for &r in model.reservoirs() {
            if let Some(level) = model.node(r).kind.fixed_level_m() {
                state.level_m[r] = level;
            }
        }
    }

    fn section_discharge(
        &self,
        model: &NetworkModel,
        state: &HydraulicState,
        section_idx: usize,
    ) -> f64 {
        let section = model.section(section_idx);
        let head = (state.level_m[model.from_node(section_idx)]
            - state.level_m[model.to_node(section_idx)])
        .max(0.0);
        let q = match model.gate_for_section(section_idx) {
            Some(gate) => gate.discharge_m3s(state.opening_percent[section_idx], head),
            None => {
                UNGATED_CD
                    * section.cross_section_area_m2(REFERENCE_DEPTH_M)
                    * (2.0 * crate::domain::GRAVITY_M_S2 * head).sqrt()
            }
        };
        q.min(section.max_flow_m3s)
    }

    /// Local response coefficient: summed |dQ/dh| over adjacent sections,
    /// using dQ/dh = Q / (2·head) for the square-root discharge law, floored
    /// to keep level steps bounded near zero head or zero flow.
    fn response_coefficient(
        &self,
        model: &NetworkModel,
        state: &HydraulicState,
        node_idx: usize,
    ) -> f64 {
        let sensitivity = |sec: usize| {
            let head = (state.level_m[model.from_node(sec)] - state.level_m[model.to_node(sec)])
                .max(HEAD_FLOOR_M);
            state.flow_m3s[sec].max(FLOW_FLOOR_M3S) / (2.0 * head)
        };
        let total: f64 = model
            .in_sections(node_idx)
            .iter()
            .chain(model.out_sections(node_idx))
            .map(|&sec| sensitivity(sec))
            .sum();
        total.max(MIN_SENSITIVITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkModel;
    use crate::testutil::{branched_topology, linear_topology};

    fn open_all(model: &NetworkModel, state: &mut HydraulicState) {
        state.opening_percent = vec![100.0; model.section_count()];
    }

    #[test]
    fn test_cold_start_follows_bed_drop() {
        let model = NetworkModel::load_topology(&linear_topology(&[5.0, 5.0])).unwrap();
        let state = HydraulicSolver::cold_start(&model);
        let r1 = model.node_idx("R1").unwrap();
        let j1 = model.node_idx("J1").unwrap();
        let z1 = model.node_idx("Z1").unwrap();
        assert_eq!(state.level_m[r1], 105.0);
        // 1000 m at 0.0005 slope drops 0.5 m per section.
        assert!((state.level_m[j1] - 104.5).abs() < 1e-9);
        assert!((state.level_m[z1] - 104.0).abs() < 1e-9);
        assert!(state.flow_m3s.iter().all(|&q| q == 0.0));
    }

    #[test]
    fn test_solve_linear_network_converges() {
        let model = NetworkModel::load_topology(&linear_topology(&[5.0, 5.0])).unwrap();
        let solver = HydraulicSolver::default();
        let mut seed = HydraulicSolver::cold_start(&model);
        open_all(&model, &mut seed);
        let z1 = model.node_idx("Z1").unwrap();
        let boundary = BoundaryFlows::zero(&model).with_draw(z1, 0.5);

        let solved = solver.solve(&model, &seed, &boundary).unwrap();
        assert!(solved.iterations <= solver.settings().max_iterations);

        // Mass balance within tolerance at every junction.
        assert!(solved.state.max_residual_m3s(&model, &boundary) < 1e-3);
        // Both sections carry the drawn flow.
        for &q in &solved.state.flow_m3s {
            assert!((q - 0.5).abs() < 5e-3, "flow {q} should settle near draw");
        }
        // No section over capacity.
        for s in 0..model.section_count() {
            assert!(solved.state.flow_m3s[s] <= model.section(s).max_flow_m3s + 1e-9);
        }
    }

    #[test]
    fn test_warm_start_reconverges_within_two_iterations() {
        let model = NetworkModel::load_topology(&linear_topology(&[5.0, 5.0])).unwrap();
        let solver = HydraulicSolver::default();
        let mut seed = HydraulicSolver::cold_start(&model);
        open_all(&model, &mut seed);
        let z1 = model.node_idx("Z1").unwrap();
        let boundary = BoundaryFlows::zero(&model).with_draw(z1, 0.5);

        let first = solver.solve(&model, &seed, &boundary).unwrap();
        let second = solver.solve(&model, &first.state, &boundary).unwrap();
        assert!(
            second.iterations <= 2,
            "warm start took {} iterations",
            second.iterations
        );
        }

    #[test]
    fn test_determinism() {
        let model = NetworkModel::load_topology(&branched_topology(4.0)).unwrap();
        let solver = HydraulicSolver::default();
        let mut seed = HydraulicSolver::cold_start(&model);
        open_all(&model, &mut seed);
        let boundary = BoundaryFlows::zero(&model)
            .with_draw(model.node_idx("Z1").unwrap(), 0.4)
            .with_draw(model.node_idx("Z2").unwrap(), 0.3);

        let a = solver.solve(&model, &seed, &boundary).unwrap();
        let b = solver.solve(&model, &seed, &boundary).unwrap();
        assert_eq!(a.state, b.state);
        assert_eq!(a.iterations, b.iterations);
    }

    #[test]
    fn test_shut_gates_cannot_satisfy_draw() {
        let model = NetworkModel::load_topology(&linear_topology(&[5.0])).unwrap();
        let solver = HydraulicSolver::default();
        // Cold start leaves every gate shut; a draw can never balance.
        let seed = HydraulicSolver::cold_start(&model);
        let z1 = model.node_idx("Z1").unwrap();
        let boundary = BoundaryFlows::zero(&model).with_draw(z1, 1.0);

        let failure = solver.solve(&model, &seed, &boundary).unwrap_err();
        assert_eq!(failure.iterations, solver.settings().max_iterations);
        // The last estimate is carried for diagnosis, and the reported
        // mass-balance residual reflects the unmet draw.
        assert_eq!(failure.last_estimate.level_m.len(), model.node_count());
        assert!(failure.max_residual_m3s > 0.9);
    }

    #[test]
    fn test_opening_for_flow_inverts_discharge() {
        let model = NetworkModel::load_topology(&linear_topology(&[5.0])).unwrap();
        let solver = HydraulicSolver::default();
        let state = HydraulicSolver::cold_start(&model);
        let c1 = model.section_idx("C1").unwrap();

        let solution = solver.opening_for_flow(&model, c1, 1.0, &state);
        assert!(!solution.throttled);
        assert!((solution.achievable_m3s - 1.0).abs() < 1e-9);
        // Verify round trip through the forward discharge equation.
        let gate = model.gate_for_section(c1).unwrap();
        let head = 0.5;
        let q = gate.discharge_m3s(solution.opening_percent, head);
        assert!((q - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_opening_for_flow_throttles_over_capacity() {
        let model = NetworkModel::load_topology(&linear_topology(&[5.0])).unwrap();
        let solver = HydraulicSolver::default();
        let state = HydraulicSolver::cold_start(&model);
        let c1 = model.section_idx("C1").unwrap();

        // Far beyond what 0.5 m of head can push through the gate.
        let solution = solver.opening_for_flow(&model, c1, 50.0, &state);
        assert!(solution.throttled);
        assert!(solution.achievable_m3s < 50.0);
        assert!(solution.opening_percent <= 100.0);
        assert!(solution.achievable_m3s <= model.section(c1).max_flow_m3s + 1e-9);
    }

    #[test]
    fn test_settings_validation() {
        let mut s = SolverSettings::default();
        assert!(s.validate().is_ok());
        s.damping = 0.0;
        assert!(s.validate().is_err());
        s.damping = 0.6;
        s.eps_flow_m3s = -1.0;
        assert!(s.validate().is_err());
    }
}

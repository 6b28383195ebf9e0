use thiserror::Error;

use crate::hydraulics::HydraulicState;

/// Errors surfaced by the planning core.
///
/// Topology errors are fatal for the cycle: no partial network is ever
/// accepted. Solver and capacity errors are scoped to the affected request.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("topology contains a cycle involving node '{node_id}'; gravity flow requires a DAG")]
    CycleDetected { node_id: String },

    #[error("canal section '{section_id}' references undefined node '{node_id}'")]
    MissingNode {
        section_id: String,
        node_id: String,
    },

    #[error("topology has no reservoir node with a fixed water level")]
    NoReservoir,

    #[error("non-reservoir node '{node_id}' has no inbound canal section")]
    UnfedNode { node_id: String },

    #[error("duplicate id '{id}' in topology records")]
    DuplicateId { id: String },

    #[error(transparent)]
    Convergence(#[from] Box<ConvergenceFailure>),

    #[error("committing {committed_m3s:.3} m3/s on section '{section_id}' would exceed capacity {capacity_m3s:.3} m3/s")]
    CapacityViolation {
        section_id: String,
        committed_m3s: f64,
        capacity_m3s: f64,
    },

    #[error("command {command_id} for gate '{gate_id}' failed to dispatch: {reason}")]
    CommandDispatchFailure {
        command_id: uuid::Uuid,
        gate_id: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// The solver hit its iteration cap before both residuals fell under
/// tolerance. Carries the last estimate so the caller can inspect it or
/// retry with relaxed tolerances; it is never silently treated as converged.
#[derive(Debug, Error)]
#[error(
    "hydraulic solver failed to converge after {iterations} iterations \
     (max |dQ| = {flow_residual_m3s:.6} m3/s, max |dh| = {level_residual_m:.6} m, \
     max mass-balance residual = {max_residual_m3s:.6} m3/s)"
)]
pub struct ConvergenceFailure {
    pub iterations: u32,
    /// Largest damped flow correction in the final sweep.
    pub flow_residual_m3s: f64,
    /// Largest damped level correction in the final sweep.
    pub level_residual_m: f64,
    /// Largest junction mass-balance residual of the last estimate.
    pub max_residual_m3s: f64,
    pub last_estimate: HydraulicState,
}

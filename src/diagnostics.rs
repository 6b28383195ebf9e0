use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::RequestStatus;
use crate::error::ConvergenceFailure;
use crate::routing::Bottleneck;

/// Emitted when a command target flow had to be throttled to stay under a
/// gate or section limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityWarning {
    pub request_id: Uuid,
    pub section_id: String,
    pub gate_id: String,
    pub target_m3s: f64,
    pub achievable_m3s: f64,
}

/// Solver failure summary safe to ship to the reporting collaborator
/// (the full last-estimate state stays with the in-process error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub request_id: Option<Uuid>,
    pub iterations: u32,
    pub flow_residual_m3s: f64,
    pub level_residual_m: f64,
    pub max_residual_m3s: f64,
}

impl ConvergenceReport {
    pub fn from_failure(request_id: Option<Uuid>, failure: &ConvergenceFailure) -> Self {
        Self {
            request_id,
            iterations: failure.iterations,
            flow_residual_m3s: failure.flow_residual_m3s,
            level_residual_m: failure.level_residual_m,
            max_residual_m3s: failure.max_residual_m3s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub request_id: Uuid,
    pub destination_zone: String,
    pub status: RequestStatus,
    pub granted_flow_m3s: f64,
}

/// Per-cycle diagnostics bundle for the reporting collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub bottlenecks: Vec<Bottleneck>,
    pub capacity_warnings: Vec<CapacityWarning>,
    pub convergence_failures: Vec<ConvergenceReport>,
    pub requests: Vec<RequestOutcome>,
    pub commands_scheduled: usize,
}

impl CycleReport {
    pub fn new(cycle_id: Uuid) -> Self {
        Self {
            cycle_id,
            generated_at: Utc::now(),
            bottlenecks: Vec::new(),
            capacity_warnings: Vec::new(),
            convergence_failures: Vec::new(),
            requests: Vec::new(),
            commands_scheduled: 0,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.bottlenecks.is_empty()
            && self.capacity_warnings.is_empty()
            && self.convergence_failures.is_empty()
    }
}

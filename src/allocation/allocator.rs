use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::score::ScoreWeights;
use crate::domain::{DeliveryRequest, RequestStatus, EPS_FLOW_M3S};
use crate::error::PlanError;
use crate::network::NetworkModel;
use crate::routing::{Path, PathFinder};

/// Per-request outcome of an allocation round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub request_id: Uuid,
    pub destination_zone: String,
    pub composite_score: f64,
    pub granted_flow_m3s: f64,
    pub status: RequestStatus,
    /// The path the grant is routed along; `None` when deferred for lack
    /// of a route.
    pub path: Option<Path>,
}

/// Result of one allocation round: per-request grants plus the committed
/// flow per section (aligned with the model's section indices).
#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    pub allocations: Vec<Allocation>,
    pub committed_m3s: Vec<f64>,
    pub remaining_supply_m3s: f64,
}

/// Resolves competing delivery requests into feasible grants.
///
/// Greedy admission in strict priority order: composite score descending,
/// then earliest request timestamp, then request id, so the outcome is
/// fully deterministic for a given input set.
#[derive(Debug, Clone, Default)]
pub struct PriorityAllocator {
    weights: ScoreWeights,
}

impl PriorityAllocator {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    /// Admit or throttle each request against the available supply and the
    /// per-section headroom along its best path.
    ///
    /// Invariant: after this returns, no section carries committed flow
    /// beyond its `max_flow_m3s`. The invariant is re-verified before the
    /// outcome leaves this function; a breach is a `CapacityViolation`,
    /// never a silently over-committed grant set.
    pub fn allocate(
        &self,
        model: &NetworkModel,
        finder: &PathFinder,
        requests: &[DeliveryRequest],
        available_supply_m3s: f64,
    ) -> Result<AllocationOutcome, PlanError> {
        let ordered: Vec<(f64, &DeliveryRequest)> = requests
            .iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .map(|r| (self.weights.composite_score(&r.factors), r))
            .sorted_by(|(sa, ra), (sb, rb)| {
                OrderedFloat(*sb)
                    .cmp(&OrderedFloat(*sa))
                    .then_with(|| ra.requested_at.cmp(&rb.requested_at))
                    .then_with(|| ra.id.cmp(&rb.id))
            })
            .collect();

        let mut committed = vec![0.0f64; model.section_count()];
        let mut remaining = available_supply_m3s;
        let mut allocations = Vec::with_capacity(ordered.len());

        for (score, request) in ordered {
            let path = self.best_path(model, finder, &request.destination_zone);
            let Some(path) = path else {
                debug!(request = %request.id, zone = %request.destination_zone, "no route to zone; deferring");
                allocations.push(Allocation {
                    request_id: request.id,
                    destination_zone: request.destination_zone.clone(),
                    composite_score: score,
                    granted_flow_m3s: 0.0,
                    status: RequestStatus::Deferred,
                    path: None,
                });
                continue;
            };

            let headroom = path
                .edges
                .iter()
                .map(|&e| model.section(e).max_flow_m3s - committed[e])
                .fold(f64::INFINITY, f64::min);
            let granted = request
                .requested_flow_m3s
                .min(remaining)
                .min(headroom)
                .max(0.0);

            let status = if granted + EPS_FLOW_M3S >= request.requested_flow_m3s {
                RequestStatus::Granted
            } else if granted > EPS_FLOW_M3S {
                RequestStatus::Partial
            } else {
                RequestStatus::Deferred
            };
            let granted = if status == RequestStatus::Deferred {
                0.0
            } else {
                granted
            };

            if granted > 0.0 {
                for &e in &path.edges {
                    committed[e] += granted;
                }
                remaining -= granted;
            }

            info!(
                request = %request.id,
                zone = %request.destination_zone,
                score,
                requested = request.requested_flow_m3s,
                granted,
                status = %status,
                "allocation decided"
            );
            allocations.push(Allocation {
                request_id: request.id,
                destination_zone: request.destination_zone.clone(),
                composite_score: score,
                granted_flow_m3s: granted,
                status,
                path: Some(path),
            });
        }

        Self::verify_commitments(model, &committed)?;
        Ok(AllocationOutcome {
            allocations,
            committed_m3s: committed,
            remaining_supply_m3s: remaining,
        })
    }

    /// Check a committed-flow vector against every section's capacity.
    pub(crate) fn verify_commitments(
        model: &NetworkModel,
        committed_m3s: &[f64],
    ) -> Result<(), PlanError> {
        for s in 0..model.section_count() {
            let capacity = model.section(s).max_flow_m3s;
            if committed_m3s[s] > capacity + EPS_FLOW_M3S {
                return Err(PlanError::CapacityViolation {
                    section_id: model.section(s).id.clone(),
                    committed_m3s: committed_m3s[s],
                    capacity_m3s: capacity,
                });
            }
        }
        Ok(())
    }

    /// Best-ranked path from any reservoir to the zone's outlet.
    fn best_path(
        &self,
        model: &NetworkModel,
        finder: &PathFinder,
        zone_id: &str,
    ) -> Option<Path> {
        let outlet = model.zone_outlet(zone_id)?;
        let mut candidates: Vec<Path> = model
            .reservoirs()
            .iter()
            .flat_map(|&r| finder.find_paths(model, r, outlet, 1))
            .collect();
        candidates.sort_by(PathFinder::rank);
        candidates.into_iter().next()
    }
}

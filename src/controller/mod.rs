pub mod dispatch;

use std::collections::HashMap;

use tracing::{info, warn};
use uuid::Uuid;

use crate::allocation::{Allocation, EdgeReservations, PriorityAllocator};
use crate::diagnostics::{ConvergenceReport, CycleReport, RequestOutcome};
use crate::domain::{DeliveryRequest, GateCommand, RequestStatus};
use crate::error::PlanError;
use crate::hydraulics::{BoundaryFlows, HydraulicSolver, HydraulicState};
use crate::network::NetworkModel;
use crate::routing::PathFinder;
use crate::scheduling::ScheduleBuilder;

pub use dispatch::{CommandSink, DispatchQueue, DispatchSettings};

/// Everything one planning cycle produced: per-request grants, the timed
/// command queue, and the diagnostics bundle for the reporting collaborator.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub allocations: Vec<Allocation>,
    pub commands: Vec<GateCommand>,
    pub report: CycleReport,
}

/// Live sensor measurements overlaid on the cold-start seed before solving.
#[derive(Debug, Clone, Default)]
pub struct SensorSnapshot {
    pub levels_by_node: HashMap<String, f64>,
    pub flows_by_section: HashMap<String, f64>,
}

/// Orchestrates one planning cycle: route, allocate, solve, schedule.
///
/// Planning itself is synchronous CPU-bound code. Cycles running on
/// separate workers serialize through the per-edge reservation table when
/// their candidate paths overlap, so two cycles can never double-book a
/// section's capacity.
pub struct PlanningEngine {
    solver: HydraulicSolver,
    finder: PathFinder,
    allocator: PriorityAllocator,
    reservations: EdgeReservations,
}

impl PlanningEngine {
    pub fn new(solver: HydraulicSolver, finder: PathFinder, allocator: PriorityAllocator) -> Self {
        Self {
            solver,
            finder,
            allocator,
            reservations: EdgeReservations::new(),
        }
    }

    /// Run one full planning cycle over an immutable topology snapshot.
    ///
    /// The reservation guard spans allocation through schedule building, so
    /// grants committed here cannot race a concurrent cycle on shared
    /// sections. Per-request solver failures are reported and skip that
    /// request's commands; they never abort the cycle. An allocator
    /// `CapacityViolation` does abort it: no schedule is built from an
    /// over-committed grant set.
    pub fn run_cycle(
        &self,
        model: &NetworkModel,
        live: &SensorSnapshot,
        requests: &[DeliveryRequest],
        available_supply_m3s: f64,
    ) -> Result<CycleOutcome, PlanError> {
        let cycle_id = Uuid::new_v4();
        let mut report = CycleReport::new(cycle_id);
        info!(
            cycle = %cycle_id,
            requests = requests.len(),
            supply = available_supply_m3s,
            "planning cycle started"
        );

        let mut seed = HydraulicSolver::cold_start(model);
        seed.apply_measurements(model, &live.levels_by_node, &live.flows_by_section);

        let candidate_edges = self.candidate_edges(model, requests);
        let _guard = self.reservations.acquire(candidate_edges);

        let outcome =
            self.allocator
                .allocate(model, &self.finder, requests, available_supply_m3s)?;
        report.bottlenecks = PathFinder::detect_bottlenecks(model, &outcome.committed_m3s);

        let builder = ScheduleBuilder::new(model, &self.solver);
        let mut commands = Vec::new();
        for alloc in &outcome.allocations {
            report.requests.push(RequestOutcome {
                request_id: alloc.request_id,
                destination_zone: alloc.destination_zone.clone(),
                status: alloc.status,
                granted_flow_m3s: alloc.granted_flow_m3s,
            });
            let Some(path) = &alloc.path else { continue };
            if alloc.granted_flow_m3s <= 0.0 {
                continue;
            }
            let Some(request) = requests.iter().find(|r| r.id == alloc.request_id) else {
                continue;
            };
            let Some(window) = request.delivery_window(alloc.granted_flow_m3s) else {
                continue;
            };

            match self.solve_for_delivery(model, &seed, path, alloc) {
                Ok(state) => {
                    let built = builder.build_schedule(
                        alloc.request_id,
                        path,
                        alloc.granted_flow_m3s,
                        window,
                        &state,
                    );
                    report.capacity_warnings.extend(built.warnings);
                    commands.extend(built.commands);
                }
                Err(failure) => {
                    warn!(
                        request = %alloc.request_id,
                        %failure,
                        "solver did not converge; request gets no commands this cycle"
                    );
                    report
                        .convergence_failures
                        .push(ConvergenceReport::from_failure(
                            Some(alloc.request_id),
                            &failure,
                        ));
                }
            }
        }
        commands.sort_by(|a, b| a.scheduled_time.cmp(&b.scheduled_time));
        report.commands_scheduled = commands.len();
        info!(
            cycle = %cycle_id,
            commands = commands.len(),
            clean = report.is_clean(),
            "planning cycle finished"
        );

        Ok(CycleOutcome {
            allocations: outcome.allocations,
            commands,
            report,
        })
    }

    /// Re-plan a single request after a dispatch failure. Unrelated
    /// requests keep their schedules; only the failed request is re-run,
    /// against whatever supply the caller says is still uncommitted.
    pub fn replan(
        &self,
        model: &NetworkModel,
        live: &SensorSnapshot,
        request: &DeliveryRequest,
        available_supply_m3s: f64,
    ) -> Result<CycleOutcome, PlanError> {
        let mut retried = request.clone();
        retried.status = RequestStatus::Pending;
        info!(request = %retried.id, "replanning single request");
        self.run_cycle(model, live, std::slice::from_ref(&retried), available_supply_m3s)
    }

    /// Union of best-path edges over all pending requests; the lock scope
    /// for this cycle.
    fn candidate_edges(&self, model: &NetworkModel, requests: &[DeliveryRequest]) -> Vec<usize> {
        let mut edges = Vec::new();
        for request in requests.iter().filter(|r| r.status == RequestStatus::Pending) {
            let Some(outlet) = model.zone_outlet(&request.destination_zone) else {
                continue;
            };
            for &r in model.reservoirs() {
                for path in self.finder.find_paths(model, r, outlet, 1) {
                    edges.extend(path.edges);
                }
            }
        }
        edges
    }

    /// Solve the hydraulic state for one granted delivery: the path's gates
    /// fully open, the granted flow drawn at the zone outlet.
    fn solve_for_delivery(
        &self,
        model: &NetworkModel,
        seed: &HydraulicState,
        path: &crate::routing::Path,
        alloc: &Allocation,
    ) -> Result<HydraulicState, Box<crate::error::ConvergenceFailure>> {
        let mut state = seed.clone();
        for &e in &path.edges {
            state.opening_percent[e] = 100.0;
        }
        let outlet = path
            .edges
            .last()
            .map(|&e| model.to_node(e))
            .unwrap_or_default();
        let boundary = BoundaryFlows::zero(model).with_draw(outlet, alloc.granted_flow_m3s);
        let solved = self.solver.solve(model, &state, &boundary)?;
        Ok(solved.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GateAction;
    use crate::testutil::{branched_topology, delivery_request, linear_topology};

    fn engine() -> PlanningEngine {
        PlanningEngine::new(
            HydraulicSolver::default(),
            PathFinder::default(),
            PriorityAllocator::default(),
        )
    }

    #[test]
    fn test_cycle_produces_commands_for_granted_requests() {
        let model = NetworkModel::load_topology(&branched_topology(10.0)).unwrap();
        let requests = vec![
            delivery_request("Z1", 0.4, 0),
            delivery_request("Z2", 0.3, 60),
        ];

        let outcome = engine().run_cycle(&model, &SensorSnapshot::default(), &requests, 10.0).unwrap();
        assert!(outcome
            .allocations
            .iter()
            .all(|a| a.status == RequestStatus::Granted));
        // Each granted path is fully gated: opens and closes per gate.
        assert!(!outcome.commands.is_empty());
        assert!(outcome
            .commands
            .windows(2)
            .all(|w| w[0].scheduled_time <= w[1].scheduled_time));
        assert_eq!(outcome.report.commands_scheduled, outcome.commands.len());
        assert!(outcome.report.convergence_failures.is_empty());
        assert!(outcome.report.bottlenecks.is_empty());
        assert_eq!(outcome.report.requests.len(), 2);
    }

    #[test]
    fn test_unroutable_request_yields_no_commands() {
        let model = NetworkModel::load_topology(&linear_topology(&[5.0])).unwrap();
        let requests = vec![delivery_request("Z_MISSING", 1.0, 0)];

        let outcome = engine().run_cycle(&model, &SensorSnapshot::default(), &requests, 5.0).unwrap();
        assert_eq!(outcome.allocations[0].status, RequestStatus::Deferred);
        assert!(outcome.commands.is_empty());
        assert_eq!(outcome.report.requests[0].status, RequestStatus::Deferred);
    }

    #[test]
    fn test_live_levels_seed_the_solve() {
        let model = NetworkModel::load_topology(&linear_topology(&[5.0, 5.0])).unwrap();
        let live = SensorSnapshot {
            levels_by_node: HashMap::from([("J1".to_string(), 104.2)]),
            flows_by_section: HashMap::from([("C1".to_string(), 0.4)]),
        };
        let requests = vec![delivery_request("Z1", 0.4, 0)];

        let outcome = engine().run_cycle(&model, &live, &requests, 5.0).unwrap();
        assert_eq!(outcome.allocations[0].status, RequestStatus::Granted);
        assert!(outcome.report.convergence_failures.is_empty());
    }

    #[test]
    fn test_replan_reruns_only_the_failed_request() {
        let model = NetworkModel::load_topology(&branched_topology(10.0)).unwrap();
        let mut request = delivery_request("Z1", 0.4, 0);
        request.status = RequestStatus::Granted;

        let outcome = engine().replan(&model, &SensorSnapshot::default(), &request, 5.0).unwrap();
        assert_eq!(outcome.allocations.len(), 1);
        assert_eq!(outcome.allocations[0].status, RequestStatus::Granted);
        assert!(outcome
            .commands
            .iter()
            .any(|c| c.action == GateAction::Open));
    }

    #[test]
    fn test_concurrent_cycles_serialize_on_shared_trunk() {
        use std::sync::Arc;

        let engine = Arc::new(engine());
        let model = Arc::new(NetworkModel::load_topology(&branched_topology(10.0)).unwrap());

        let mut handles = Vec::new();
        for zone in ["Z1", "Z2"] {
            let engine = Arc::clone(&engine);
            let model = Arc::clone(&model);
            let zone = zone.to_string();
            handles.push(std::thread::spawn(move || {
                let requests = vec![delivery_request(&zone, 0.3, 0)];
                engine.run_cycle(&model, &SensorSnapshot::default(), &requests, 5.0)
            }));
        }
        for handle in handles {
            let outcome = handle.join().unwrap().unwrap();
            assert_eq!(outcome.allocations[0].status, RequestStatus::Granted);
        }
    }
}

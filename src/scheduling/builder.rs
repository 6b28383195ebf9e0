use chrono::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::diagnostics::CapacityWarning;
use crate::domain::{CommandStatus, DeliveryWindow, GateAction, GateCommand};
use crate::hydraulics::{travel_time_s, HydraulicSolver, HydraulicState};
use crate::network::NetworkModel;
use crate::routing::Path;

/// Commands for one delivery, sorted by scheduled time, plus any capacity
/// throttling that occurred while mapping flows to openings.
#[derive(Debug, Clone)]
pub struct BuiltSchedule {
    pub request_id: Uuid,
    pub commands: Vec<GateCommand>,
    pub warnings: Vec<CapacityWarning>,
}

/// Converts a granted path and delivery window into a temporally staggered
/// gate-command sequence.
///
/// Opens walk the path destination-to-source accumulating travel time so
/// the most upstream gate moves earliest and the wavefront arrives at the
/// zone exactly at the window start. Closes start at the destination gate
/// at the window end and propagate upstream, each successive gate closing
/// later by its own section's travel/drain time so in-transit water drains
/// forward instead of overtopping a closed downstream section.
#[derive(Debug, Clone)]
pub struct ScheduleBuilder<'a> {
    model: &'a NetworkModel,
    solver: &'a HydraulicSolver,
}

impl<'a> ScheduleBuilder<'a> {
    pub fn new(model: &'a NetworkModel, solver: &'a HydraulicSolver) -> Self {
        Self { model, solver }
    }

    pub fn build_schedule(
        &self,
        request_id: Uuid,
        path: &Path,
        granted_flow_m3s: f64,
        window: DeliveryWindow,
        state: &HydraulicState,
    ) -> BuiltSchedule {
        // Nothing flows, nothing moves; travel times are infinite below
        // zero flow, so bail out before any schedule arithmetic.
        if granted_flow_m3s <= 0.0 {
            debug!(request = %request_id, "non-positive granted flow; no commands");
            return BuiltSchedule {
                request_id,
                commands: Vec::new(),
                warnings: Vec::new(),
            };
        }

        let mut commands = Vec::new();
        let mut warnings = Vec::new();

        // Opening sequence: accumulate travel time from the destination
        // backwards; gate k opens at start − Σ travel(k..=destination).
        let mut lead = Duration::zero();
        for &edge in path.edges.iter().rev() {
            lead = lead + self.section_travel(edge, granted_flow_m3s);
            let Some(gate) = self.model.gate_for_section(edge) else {
                continue;
            };
            let solution = self
                .solver
                .opening_for_flow(self.model, edge, granted_flow_m3s, state);
            if solution.throttled {
                warn!(
                    request = %request_id,
                    section = %self.model.section(edge).id,
                    target = granted_flow_m3s,
                    achievable = solution.achievable_m3s,
                    "throttling open command to stay within capacity"
                );
                warnings.push(CapacityWarning {
                    request_id,
                    section_id: self.model.section(edge).id.clone(),
                    gate_id: gate.id.clone(),
                    target_m3s: granted_flow_m3s,
                    achievable_m3s: solution.achievable_m3s,
                });
            }
            commands.push(GateCommand {
                id: Uuid::new_v4(),
                request_id,
                gate_id: gate.id.clone(),
                canal_section_id: self.model.section(edge).id.clone(),
                action: GateAction::Open,
                opening_percent: solution.opening_percent,
                scheduled_time: window.start - lead,
                control_mode: gate.control_mode,
                status: CommandStatus::Scheduled,
            });
        }

        // Closing sequence: destination gate closes at the window end; each
        // upstream gate closes later by its own section's travel time.
        let mut close_at = window.end;
        for (i, &edge) in path.edges.iter().rev().enumerate() {
            if i > 0 {
                close_at = close_at + self.section_travel(edge, granted_flow_m3s);
            }
            let Some(gate) = self.model.gate_for_section(edge) else {
                continue;
            };
            commands.push(GateCommand {
                id: Uuid::new_v4(),
                request_id,
                gate_id: gate.id.clone(),
                canal_section_id: self.model.section(edge).id.clone(),
                action: GateAction::Close,
                opening_percent: 0.0,
                scheduled_time: close_at,
                control_mode: gate.control_mode,
                status: CommandStatus::Scheduled,
            });
        }

        commands.sort_by(|a, b| {
            a.scheduled_time
                .cmp(&b.scheduled_time)
                .then_with(|| a.gate_id.cmp(&b.gate_id))
        });
        debug!(
            request = %request_id,
            commands = commands.len(),
            warnings = warnings.len(),
            "schedule built"
        );
        BuiltSchedule {
            request_id,
            commands,
            warnings,
        }
    }

    fn section_travel(&self, section_idx: usize, flow_m3s: f64) -> Duration {
        let secs = travel_time_s(self.model.section(section_idx), flow_m3s);
        Duration::milliseconds((secs * 1000.0).round() as i64)
    }
}

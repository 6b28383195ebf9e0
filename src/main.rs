use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use canal_scheduler::allocation::PriorityAllocator;
use canal_scheduler::controller::{
    CommandSink, DispatchQueue, PlanningEngine, SensorSnapshot,
};
use canal_scheduler::domain::{
    DeliveryRequest, DeliveryTarget, GateCommand, GateControlMode, GateRecord, NodeKind,
    NodeRecord, PriorityFactors, RequestStatus, TopologyRecords,
};
use canal_scheduler::hydraulics::HydraulicSolver;
use canal_scheduler::network::NetworkModel;
use canal_scheduler::routing::PathFinder;
use canal_scheduler::telemetry::{init_tracing, shutdown_signal};
use canal_scheduler::Config;

/// Stand-in for the SCADA / crew-queue collaborators: logs each command.
struct LoggingSink {
    label: &'static str,
}

#[async_trait]
impl CommandSink for LoggingSink {
    async fn send(&self, command: &GateCommand) -> Result<()> {
        info!(
            sink = self.label,
            gate = %command.gate_id,
            action = %command.action,
            opening = command.opening_percent,
            at = %command.scheduled_time,
            "command accepted"
        );
        Ok(())
    }
}

fn demo_topology() -> TopologyRecords {
    TopologyRecords {
        nodes: vec![
            NodeRecord {
                id: "R-MAIN".into(),
                kind: NodeKind::Reservoir { level_m: 105.0 },
            },
            NodeRecord {
                id: "J-NORTH".into(),
                kind: NodeKind::Junction,
            },
            NodeRecord {
                id: "Z-ALFALFA".into(),
                kind: NodeKind::ZoneOutlet,
            },
            NodeRecord {
                id: "Z-ORCHARD".into(),
                kind: NodeKind::ZoneOutlet,
            },
        ],
        sections: vec![
            section("C-TRUNK", "R-MAIN", "J-NORTH", 2500.0, 8.0),
            section("C-ALFALFA", "J-NORTH", "Z-ALFALFA", 1200.0, 4.0),
            section("C-ORCHARD", "J-NORTH", "Z-ORCHARD", 1800.0, 4.0),
        ],
        gates: vec![
            gate("G-TRUNK", "C-TRUNK", GateControlMode::Automated),
            gate("G-ALFALFA", "C-ALFALFA", GateControlMode::Automated),
            gate("G-ORCHARD", "C-ORCHARD", GateControlMode::Manual),
        ],
    }
}

fn section(
    id: &str,
    from: &str,
    to: &str,
    length_m: f64,
    max_flow_m3s: f64,
) -> canal_scheduler::domain::CanalSectionRecord {
    canal_scheduler::domain::CanalSectionRecord {
        id: id.into(),
        from_node: from.into(),
        to_node: to.into(),
        length_m,
        bottom_width_m: 2.5,
        side_slope: 1.5,
        bed_slope_fraction: 0.0004,
        manning_roughness: 0.025,
        max_flow_m3s,
    }
}

fn gate(id: &str, section_id: &str, mode: GateControlMode) -> GateRecord {
    GateRecord {
        id: id.into(),
        canal_section_id: section_id.into(),
        flow_area_m2: 2.0,
        discharge_coefficient: 0.61,
        max_discharge_m3s: 6.0,
        control_mode: mode,
    }
}

fn demo_requests() -> Vec<DeliveryRequest> {
    let start = Utc::now() + Duration::hours(3);
    let mut factors = PriorityFactors::uniform(0.5);
    factors.water_stress_level = 0.8;
    vec![
        DeliveryRequest {
            id: Uuid::new_v4(),
            destination_zone: "Z-ALFALFA".into(),
            requested_flow_m3s: 1.2,
            target_start: start,
            target: DeliveryTarget::DurationMinutes(180),
            factors,
            requested_at: Utc::now(),
            status: RequestStatus::Pending,
        },
        DeliveryRequest {
            id: Uuid::new_v4(),
            destination_zone: "Z-ORCHARD".into(),
            requested_flow_m3s: 0.8,
            target_start: start + Duration::minutes(30),
            target: DeliveryTarget::VolumeM3(5400.0),
            factors: PriorityFactors::uniform(0.5),
            requested_at: Utc::now(),
            status: RequestStatus::Pending,
        },
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::load()?;
    let model = NetworkModel::load_topology(&demo_topology())?;
    let engine = PlanningEngine::new(
        HydraulicSolver::new(config.solver),
        PathFinder::new(config.routing),
        PriorityAllocator::new(config.weights),
    );

    let outcome = engine.run_cycle(
        &model,
        &SensorSnapshot::default(),
        &demo_requests(),
        config.supply.available_m3s,
    )?;
    println!("{}", serde_json::to_string_pretty(&outcome.report)?);

    let scada = Arc::new(LoggingSink { label: "scada" });
    let crew = Arc::new(LoggingSink { label: "crew" });
    let (queue, mut replans) = DispatchQueue::new(scada, crew, config.dispatch);
    let queue = Arc::new(queue);

    // Walk the queue in schedule order; a real deployment confirms from the
    // collaborator's event feed, here a background task acks each command.
    let dispatch_all = {
        let queue = Arc::clone(&queue);
        async move {
            for command in outcome.commands {
                let id = command.id;
                let q = Arc::clone(&queue);
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
                    q.confirm(id, true);
                });
                let done = queue.dispatch(command).await;
                info!(command = %done.id, status = %done.status, "dispatch finished");
            }
        }
    };
    tokio::select! {
        _ = dispatch_all => {}
        _ = shutdown_signal() => warn!("shutdown requested; remaining commands not dispatched"),
    }
    while let Ok(replan) = replans.try_recv() {
        info!(request = %replan.request_id, reason = %replan.reason, "replan requested");
    }

    Ok(())
}

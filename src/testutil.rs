//! Shared fixtures for in-module tests.
#![cfg(test)]

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use crate::domain::{
    CanalSectionRecord, DeliveryRequest, DeliveryTarget, GateControlMode, GateRecord, NodeKind,
    NodeRecord, PriorityFactors, RequestStatus, TopologyRecords,
};

pub const RESERVOIR_LEVEL_M: f64 = 105.0;

pub fn section_record(id: &str, from: &str, to: &str, max_flow_m3s: f64) -> CanalSectionRecord {
    CanalSectionRecord {
        id: id.into(),
        from_node: from.into(),
        to_node: to.into(),
        length_m: 1000.0,
        bottom_width_m: 2.0,
        side_slope: 1.5,
        bed_slope_fraction: 0.0005,
        manning_roughness: 0.025,
        max_flow_m3s,
    }
}

pub fn gate_record(id: &str, section_id: &str) -> GateRecord {
    GateRecord {
        id: id.into(),
        canal_section_id: section_id.into(),
        flow_area_m2: 2.0,
        discharge_coefficient: 0.6,
        max_discharge_m3s: 8.0,
        control_mode: GateControlMode::Automated,
    }
}

/// A single chain `R1 -> J1 -> ... -> Z1` with one gated section per
/// capacity in `caps`.
pub fn linear_topology(caps: &[f64]) -> TopologyRecords {
    let k = caps.len();
    assert!(k >= 1);

    let mut nodes = vec![NodeRecord {
        id: "R1".into(),
        kind: NodeKind::Reservoir {
            level_m: RESERVOIR_LEVEL_M,
        },
    }];
    for i in 1..k {
        nodes.push(NodeRecord {
            id: format!("J{i}"),
            kind: NodeKind::Junction,
        });
    }
    nodes.push(NodeRecord {
        id: "Z1".into(),
        kind: NodeKind::ZoneOutlet,
    });

    let node_name = |i: usize| -> String {
        if i == 0 {
            "R1".into()
        } else if i == k {
            "Z1".into()
        } else {
            format!("J{i}")
        }
    };

    let mut sections = Vec::new();
    let mut gates = Vec::new();
    for (i, &cap) in caps.iter().enumerate() {
        let id = format!("C{}", i + 1);
        sections.push(section_record(&id, &node_name(i), &node_name(i + 1), cap));
        gates.push(gate_record(&format!("G{}", i + 1), &id));
    }

    TopologyRecords {
        nodes,
        sections,
        gates,
    }
}

/// `R1 -> J1` shared trunk feeding two outlets `Z1` and `Z2`.
pub fn branched_topology(shared_cap_m3s: f64) -> TopologyRecords {
    let nodes = vec![
        NodeRecord {
            id: "R1".into(),
            kind: NodeKind::Reservoir {
                level_m: RESERVOIR_LEVEL_M,
            },
        },
        NodeRecord {
            id: "J1".into(),
            kind: NodeKind::Junction,
        },
        NodeRecord {
            id: "Z1".into(),
            kind: NodeKind::ZoneOutlet,
        },
        NodeRecord {
            id: "Z2".into(),
            kind: NodeKind::ZoneOutlet,
        },
    ];
    let sections = vec![
        section_record("C0", "R1", "J1", shared_cap_m3s),
        section_record("C1", "J1", "Z1", 5.0),
        section_record("C2", "J1", "Z2", 5.0),
    ];
    let gates = vec![
        gate_record("G0", "C0"),
        gate_record("G1", "C1"),
        gate_record("G2", "C2"),
    ];
    TopologyRecords {
        nodes,
        sections,
        gates,
    }
}

pub fn delivery_request(zone: &str, flow_m3s: f64, requested_at_offset_s: i64) -> DeliveryRequest {
    let base = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
    DeliveryRequest {
        id: Uuid::new_v4(),
        destination_zone: zone.into(),
        requested_flow_m3s: flow_m3s,
        target_start: Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap(),
        target: DeliveryTarget::DurationMinutes(120),
        factors: PriorityFactors::uniform(0.5),
        requested_at: base + chrono::Duration::seconds(requested_at_offset_s),
        status: RequestStatus::Pending,
    }
}

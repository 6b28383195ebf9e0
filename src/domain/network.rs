use serde::{Deserialize, Serialize};

/// Gravitational acceleration (m/s^2), used by the gate discharge equation.
pub const GRAVITY_M_S2: f64 = 9.81;

/// Documented comparison tolerances for flows and levels.
pub const EPS_FLOW_M3S: f64 = 1e-3;
pub const EPS_LEVEL_M: f64 = 1e-3;

/// Node role within the canal network.
///
/// Reservoirs carry a fixed, externally measured water level; all other
/// node levels are solved per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Reservoir {
        /// Fixed free-surface level (m above datum).
        level_m: f64,
    },
    Junction,
    GateNode,
    ZoneOutlet,
}

impl NodeKind {
    pub fn is_reservoir(&self) -> bool {
        matches!(self, NodeKind::Reservoir { .. })
    }

    pub fn fixed_level_m(&self) -> Option<f64> {
        match self {
            NodeKind::Reservoir { level_m } => Some(*level_m),
            _ => None,
        }
    }
}

/// Topology record for a single node, as delivered by the GIS collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// Topology record for a canal section (a directed edge of the network).
///
/// Geometry is a trapezoidal open channel: `bottom_width_m` at the bed,
/// side slope `z` (horizontal per unit vertical), bed dropping by
/// `bed_slope_fraction` along the flow direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanalSectionRecord {
    pub id: String,
    pub from_node: String,
    pub to_node: String,
    pub length_m: f64,
    pub bottom_width_m: f64,
    /// Horizontal run per unit rise of the banks (0 = rectangular).
    pub side_slope: f64,
    /// Longitudinal bed slope as a fraction (e.g. 0.0005).
    pub bed_slope_fraction: f64,
    /// Manning roughness coefficient n; environment-specific calibration input.
    pub manning_roughness: f64,
    /// Conveyance capacity of the section (m3/s).
    pub max_flow_m3s: f64,
}

impl CanalSectionRecord {
    /// Wetted cross-section area at the given depth: `(b + z*d) * d`.
    pub fn cross_section_area_m2(&self, depth_m: f64) -> f64 {
        let d = depth_m.max(0.0);
        (self.bottom_width_m + self.side_slope * d) * d
    }

    /// Free-surface width at the given depth.
    pub fn top_width_m(&self, depth_m: f64) -> f64 {
        self.bottom_width_m + 2.0 * self.side_slope * depth_m.max(0.0)
    }

    /// Wetted perimeter at the given depth (bed plus both banks).
    pub fn wetted_perimeter_m(&self, depth_m: f64) -> f64 {
        let d = depth_m.max(0.0);
        self.bottom_width_m + 2.0 * d * (1.0 + self.side_slope.powi(2)).sqrt()
    }

    /// Hydraulic radius `R = A / P` at the given depth.
    pub fn hydraulic_radius_m(&self, depth_m: f64) -> f64 {
        let p = self.wetted_perimeter_m(depth_m);
        if p <= 0.0 {
            return 0.0;
        }
        self.cross_section_area_m2(depth_m) / p
    }

    /// Storage-in-transit volume for the whole section at a uniform depth.
    pub fn storage_volume_m3(&self, depth_m: f64) -> f64 {
        self.cross_section_area_m2(depth_m) * self.length_m
    }
}

/// Who executes a gate movement: the SCADA system or a field crew.
///
/// The mode only selects the dispatch collaborator; scheduling is identical
/// for both.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GateControlMode {
    Automated,
    Manual,
}

/// Topology record for a gate controlling flow into a canal section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRecord {
    pub id: String,
    pub canal_section_id: String,
    /// Orifice area when fully open (m2).
    pub flow_area_m2: f64,
    /// Discharge coefficient Cd; environment-specific calibration input.
    pub discharge_coefficient: f64,
    /// Hard discharge limit of the structure (m3/s).
    pub max_discharge_m3s: f64,
    pub control_mode: GateControlMode,
}

impl GateRecord {
    /// Discharge through the gate at a fractional opening and head
    /// difference: `Q = Cd * A(opening) * sqrt(2 g dH)`.
    pub fn discharge_m3s(&self, opening_percent: f64, head_m: f64) -> f64 {
        let opening = (opening_percent / 100.0).clamp(0.0, 1.0);
        let head = head_m.max(0.0);
        let q = self.discharge_coefficient
            * (opening * self.flow_area_m2)
            * (2.0 * GRAVITY_M_S2 * head).sqrt();
        q.min(self.max_discharge_m3s)
    }
}

/// Full topology snapshot input, refreshed from the GIS collaborator once
/// per planning cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyRecords {
    pub nodes: Vec<NodeRecord>,
    pub sections: Vec<CanalSectionRecord>,
    pub gates: Vec<GateRecord>,
}

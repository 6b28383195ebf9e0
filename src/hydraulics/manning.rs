//! Manning normal-depth approximation for open-channel travel times.

use crate::domain::CanalSectionRecord;

const DEPTH_LO_M: f64 = 1e-4;
const DEPTH_HI_M: f64 = 10.0;
const BISECTION_STEPS: u32 = 80;

/// Discharge carried at a uniform depth: `Q = A * v` with
/// `v = (1/n) * R^(2/3) * S^(1/2)`.
fn discharge_at_depth_m3s(section: &CanalSectionRecord, depth_m: f64) -> f64 {
    let area = section.cross_section_area_m2(depth_m);
    area * velocity_at_depth_m_s(section, depth_m)
}

fn velocity_at_depth_m_s(section: &CanalSectionRecord, depth_m: f64) -> f64 {
    let radius = section.hydraulic_radius_m(depth_m);
    (1.0 / section.manning_roughness)
        * radius.powf(2.0 / 3.0)
        * section.bed_slope_fraction.sqrt()
}

/// Normal depth for a given flow, by bisection on the monotonic
/// depth-discharge curve. Clamps at 10 m for flows beyond the channel's
/// uniform-flow capacity.
pub fn normal_depth_m(section: &CanalSectionRecord, flow_m3s: f64) -> f64 {
    if flow_m3s <= 0.0 {
        return 0.0;
    }
    if discharge_at_depth_m3s(section, DEPTH_HI_M) <= flow_m3s {
        return DEPTH_HI_M;
    }
    let (mut lo, mut hi) = (DEPTH_LO_M, DEPTH_HI_M);
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if discharge_at_depth_m3s(section, mid) < flow_m3s {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Mean velocity at the normal depth for the given flow.
pub fn velocity_m_s(section: &CanalSectionRecord, flow_m3s: f64) -> f64 {
    if flow_m3s <= 0.0 {
        return 0.0;
    }
    velocity_at_depth_m_s(section, normal_depth_m(section, flow_m3s))
}

/// Time for water to propagate through the section at the given flow.
/// Returns infinity for a non-positive flow.
pub fn travel_time_s(section: &CanalSectionRecord, flow_m3s: f64) -> f64 {
    let v = velocity_m_s(section, flow_m3s);
    if v <= 0.0 {
        return f64::INFINITY;
    }
    section.length_m / v
}

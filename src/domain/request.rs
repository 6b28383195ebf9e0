use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The seven demand factors scored by the agronomic collaborator.
///
/// Each factor is expected in [0, 1]; out-of-range inputs are clamped during
/// scoring rather than rejected, since they arrive from an external system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityFactors {
    pub growth_stage_criticality: f64,
    pub water_stress_level: f64,
    pub delivery_efficiency: f64,
    pub historical_performance: f64,
    pub area_based_equity: f64,
    pub crop_economic_value: f64,
    pub social_impact: f64,
}

impl PriorityFactors {
    pub fn uniform(value: f64) -> Self {
        Self {
            growth_stage_criticality: value,
            water_stress_level: value,
            delivery_efficiency: value,
            historical_performance: value,
            area_based_equity: value,
            crop_economic_value: value,
            social_impact: value,
        }
    }
}

/// How the requested delivery is bounded: a fixed duration, or a total
/// volume to be converted to a duration at the granted flow rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryTarget {
    DurationMinutes(i64),
    VolumeM3(f64),
}

/// Delivery window resolved against a granted flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Granted,
    Partial,
    Deferred,
    Cancelled,
}

/// A request for water at a destination zone, created externally and
/// consumed by the allocator and schedule builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub id: Uuid,
    pub destination_zone: String,
    pub requested_flow_m3s: f64,
    pub target_start: DateTime<Utc>,
    pub target: DeliveryTarget,
    pub factors: PriorityFactors,
    pub requested_at: DateTime<Utc>,
    pub status: RequestStatus,
}

impl DeliveryRequest {
    /// Resolve the delivery window for a granted flow rate.
    ///
    /// Volume targets stretch the window when the grant is below the
    /// requested flow, so the zone still receives the full volume. Returns
    /// `None` for a non-positive flow (nothing can be delivered).
    pub fn delivery_window(&self, granted_flow_m3s: f64) -> Option<DeliveryWindow> {
        if granted_flow_m3s <= 0.0 {
            return None;
        }
        let duration = match self.target {
            DeliveryTarget::DurationMinutes(mins) => Duration::minutes(mins),
            DeliveryTarget::VolumeM3(volume) => {
                Duration::seconds((volume / granted_flow_m3s).ceil() as i64)
            }
        };
        Some(DeliveryWindow {
            start: self.target_start,
            end: self.target_start + duration,
        })
    }
}

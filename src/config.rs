use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::allocation::ScoreWeights;
use crate::controller::DispatchSettings;
use crate::error::PlanError;
use crate::hydraulics::SolverSettings;
use crate::routing::PathCosting;

/// Typed configuration merged from `config/default.toml` and
/// `CANAL__`-prefixed environment variables (`CANAL__SOLVER__DAMPING=0.5`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub solver: SolverSettings,
    pub routing: PathCosting,
    pub weights: ScoreWeights,
    pub dispatch: DispatchSettings,
    pub supply: SupplyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            solver: SolverSettings::default(),
            routing: PathCosting::default(),
            weights: ScoreWeights::default(),
            dispatch: DispatchSettings::default(),
            supply: SupplyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupplyConfig {
    /// Aggregate supply offered to the allocator each cycle (m3/s).
    pub available_m3s: f64,
}

impl Default for SupplyConfig {
    fn default() -> Self {
        Self { available_m3s: 5.0 }
    }
}

impl Config {
    pub fn load() -> Result<Self, PlanError> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("CANAL__").split("__"));
        let config: Config = figment
            .extract()
            .map_err(|e| PlanError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject a configuration that would make planning unsound rather than
    /// limping along with it.
    pub fn validate(&self) -> Result<(), PlanError> {
        self.solver.validate().map_err(PlanError::InvalidConfig)?;
        self.weights.validate().map_err(PlanError::InvalidConfig)?;
        if !self.supply.available_m3s.is_finite() || self.supply.available_m3s < 0.0 {
            return Err(PlanError::InvalidConfig(format!(
                "supply.available_m3s must be non-negative, got {}",
                self.supply.available_m3s
            )));
        }
        if !self.routing.reference_flow_m3s.is_finite() || self.routing.reference_flow_m3s <= 0.0 {
            return Err(PlanError::InvalidConfig(format!(
                "routing.reference_flow_m3s must be positive, got {}",
                self.routing.reference_flow_m3s
            )));
        }
        if !self.routing.loss_weight.is_finite() || self.routing.loss_weight < 0.0 {
            return Err(PlanError::InvalidConfig(format!(
                "routing.loss_weight must be non-negative, got {}",
                self.routing.loss_weight
            )));
        }
        if self.dispatch.confirm_timeout_ms == 0 {
            return Err(PlanError::InvalidConfig(
                "dispatch.confirm_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

use serde::{Deserialize, Serialize};

use crate::domain::PriorityFactors;

/// Weights for the seven demand factors. Must sum to 1.0; each factor is
/// normalized (clamped) to [0, 1] before weighting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub growth_stage_criticality: f64,
    pub water_stress_level: f64,
    pub delivery_efficiency: f64,
    pub historical_performance: f64,
    pub area_based_equity: f64,
    pub crop_economic_value: f64,
    pub social_impact: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        // Equal weighting until the district calibrates its own profile.
        let w = 1.0 / 7.0;
        Self {
            growth_stage_criticality: w,
            water_stress_level: w,
            delivery_efficiency: w,
            historical_performance: w,
            area_based_equity: w,
            crop_economic_value: w,
            social_impact: w,
        }
    }
}

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

impl ScoreWeights {
    fn as_array(&self) -> [f64; 7] {
        [
            self.growth_stage_criticality,
            self.water_stress_level,
            self.delivery_efficiency,
            self.historical_performance,
            self.area_based_equity,
            self.crop_economic_value,
            self.social_impact,
        ]
    }

    pub fn validate(&self) -> Result<(), String> {
        let weights = self.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("score weights must be finite and non-negative".into());
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(format!("score weights must sum to 1.0, got {sum}"));
        }
        Ok(())
    }

    /// Composite priority score in [0, 1].
    pub fn composite_score(&self, factors: &PriorityFactors) -> f64 {
        let normalize = |f: f64| f.clamp(0.0, 1.0);
        let values = [
            factors.growth_stage_criticality,
            factors.water_stress_level,
            factors.delivery_efficiency,
            factors.historical_performance,
            factors.area_based_equity,
            factors.crop_economic_value,
            factors.social_impact,
        ];
        self.as_array()
            .iter()
            .zip(values)
            .map(|(w, f)| w * normalize(f))
            .sum()
    }
}

//! Value-at-Risk over a return series.

use super::finite;
use crate::{
    distribution::{mean, sorted_ascending, standard_deviation},
    error::AlgorithmError,
};
use serde::{Deserialize, Serialize};

/// One-sided standard normal quantiles for the supported confidence levels.
const Z_TABLE: &[(f64, f64)] = &[(0.90, 1.2816), (0.95, 1.6449), (0.99, 2.3263)];

/// z-score for `confidence`; only the tabulated levels are supported.
pub fn z_score(confidence: f64) -> Result<f64, AlgorithmError> {
    Z_TABLE
        .iter()
        .find(|(level, _)| (level - confidence).abs() < 1e-9)
        .map(|(_, z)| *z)
        .ok_or_else(|| {
            AlgorithmError::UnsupportedParameter(format!(
                "confidence {confidence} is not supported (use 0.90, 0.95 or 0.99)"
            ))
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VarParams {
    pub returns: Vec<f64>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_horizon")]
    pub time_horizon: f64,
}

fn default_confidence() -> f64 {
    0.95
}

fn default_horizon() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VarResult {
    pub historical_var: f64,
    pub parametric_var: f64,
    pub expected_shortfall: f64,
    pub confidence: f64,
    pub time_horizon: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub observations: u64,
}

/// Index of the historical cutoff in the ascending series.
pub fn cutoff_index(n: usize, confidence: f64) -> usize {
    let idx = ((1.0 - confidence) * n as f64).floor() as usize;
    idx.min(n - 1)
}

pub fn calculate(params: &VarParams) -> Result<VarResult, AlgorithmError> {
    let n = params.returns.len();
    if n < 2 {
        return Err(AlgorithmError::InvalidParameter(format!(
            "returns must contain at least 2 observations, got {n}"
        )));
    }
    for (i, r) in params.returns.iter().enumerate() {
        finite(&format!("returns[{i}]"), *r)?;
    }
    if params.time_horizon <= 0.0 || !params.time_horizon.is_finite() {
        return Err(AlgorithmError::InvalidParameter(format!(
            "timeHorizon must be positive, got {}",
            params.time_horizon
        )));
    }
    let z = z_score(params.confidence)?;

    let mu = mean(&params.returns)?;
    let sigma = standard_deviation(&params.returns)?;
    let sorted = sorted_ascending(&params.returns);
    let idx = cutoff_index(n, params.confidence);

    Ok(VarResult {
        historical_var:     -sorted[idx],
        parametric_var:     -(mu - z * sigma) * params.time_horizon.sqrt(),
        expected_shortfall: -mean(&sorted[..=idx])?,
        confidence:         params.confidence,
        time_horizon:       params.time_horizon,
        mean:               mu,
        std_dev:            sigma,
        observations:       n as u64,
    })
}

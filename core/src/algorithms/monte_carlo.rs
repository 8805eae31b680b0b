//! Monte Carlo risk simulation.

use super::finite;
use crate::{
    distribution::{
        clamp, kurtosis, mean, percentile, percentile_index, sample_bounded, sample_uniform,
        skewness, sorted_ascending, standard_deviation, Distribution,
    },
    error::AlgorithmError,
    rng::SampleRng,
};
use serde::{Deserialize, Serialize};

/// Most trials one simulation may run.
pub const MAX_ITERATIONS: i64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloParams {
    pub iterations: i64,
    #[serde(default = "default_dist")]
    pub prob_dist: String,
    pub prob_min: f64,
    pub prob_max: f64,
    pub impact_min: f64,
    pub impact_max: f64,
    #[serde(default)]
    pub correlation: f64,
}

fn default_dist() -> String {
    Distribution::Uniform.name().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub var95: f64,
    pub var99: f64,
    /// Mean of the trials at or above the 95th-percentile index.
    pub cvar95: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub min: f64,
    pub max: f64,
    pub iterations: u64,
}

/// Run `iterations` trials. Per trial the probability draw comes before
/// the impact draw; both use `rng`.
pub fn simulate(params: &MonteCarloParams, rng: &mut SampleRng) -> Result<MonteCarloResult, AlgorithmError> {
    if params.iterations <= 0 {
        return Err(AlgorithmError::InvalidParameter(format!(
            "iterations must be positive, got {}",
            params.iterations
        )));
    }
    if params.iterations > MAX_ITERATIONS {
        return Err(AlgorithmError::InvalidParameter(format!(
            "iterations must not exceed {MAX_ITERATIONS}, got {}",
            params.iterations
        )));
    }
    let prob_min = finite("probMin", params.prob_min)?;
    let prob_max = finite("probMax", params.prob_max)?;
    let impact_min = finite("impactMin", params.impact_min)?;
    let impact_max = finite("impactMax", params.impact_max)?;
    let correlation = finite("correlation", params.correlation)?;
    if prob_min > prob_max {
        return Err(AlgorithmError::InvalidParameter(format!(
            "probMin {prob_min} exceeds probMax {prob_max}"
        )));
    }
    if impact_min > impact_max {
        return Err(AlgorithmError::InvalidParameter(format!(
            "impactMin {impact_min} exceeds impactMax {impact_max}"
        )));
    }

    let dist = Distribution::parse(&params.prob_dist);
    let n = params.iterations as usize;
    let mut risks = Vec::with_capacity(n);
    for _ in 0..n {
        let p = sample_bounded(rng, dist, prob_min, prob_max)?;
        let mut impact = sample_uniform(rng, impact_min, impact_max)?;
        impact *= 1.0 + correlation * (p - 0.5) * 2.0;
        risks.push(clamp(p, 0.0, 1.0) * impact.max(0.0));
    }

    let sorted = sorted_ascending(&risks);
    let tail = &sorted[percentile_index(n, 0.95)..];
    Ok(MonteCarloResult {
        mean:       mean(&sorted)?,
        median:     percentile(&sorted, 0.5)?,
        std_dev:    standard_deviation(&sorted)?,
        var95:      percentile(&sorted, 0.95)?,
        var99:      percentile(&sorted, 0.99)?,
        cvar95:     mean(tail)?,
        skewness:   skewness(&sorted)?,
        kurtosis:   kurtosis(&sorted)?,
        min:        sorted[0],
        max:        sorted[n - 1],
        iterations: n as u64,
    })
}

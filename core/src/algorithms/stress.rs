//! Stress testing against multiplicative scenarios.

use super::finite;
use crate::{distribution::clamp, error::AlgorithmError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    pub probability_multiplier: f64,
    pub impact_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Control {
    pub name: String,
    pub effectiveness: f64,
    pub stress_resistance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressParams {
    pub base_probability: f64,
    pub base_impact: f64,
    pub scenarios: Vec<Scenario>,
    #[serde(default)]
    pub controls: Vec<Control>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub name: String,
    pub stressed_probability: f64,
    pub stressed_impact: f64,
    pub stressed_risk: f64,
    /// Percentage over the baseline risk; 0 when the baseline is 0.
    pub risk_increase: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResult {
    pub name: String,
    pub resilience: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressResult {
    pub baseline_risk: f64,
    pub scenarios: Vec<ScenarioResult>,
    pub controls: Vec<ControlResult>,
    pub worst_case_scenario: ScenarioResult,
    pub average_risk_increase: f64,
}

pub fn run(params: &StressParams) -> Result<StressResult, AlgorithmError> {
    if params.scenarios.is_empty() {
        return Err(AlgorithmError::InvalidParameter(
            "scenarios must contain at least one scenario".into(),
        ));
    }
    let base_probability = finite("baseProbability", params.base_probability)?;
    let base_impact = finite("baseImpact", params.base_impact)?;
    let baseline_risk = base_probability * base_impact;

    let mut scenarios = Vec::with_capacity(params.scenarios.len());
    for scenario in &params.scenarios {
        for (what, m) in [
            ("probabilityMultiplier", scenario.probability_multiplier),
            ("impactMultiplier", scenario.impact_multiplier),
        ] {
            if finite(what, m)? < 0.0 {
                return Err(AlgorithmError::InvalidParameter(format!(
                    "scenario '{}': {what} must not be negative, got {m}",
                    scenario.name
                )));
            }
        }
        let stressed_probability =
            clamp(base_probability * scenario.probability_multiplier, 0.0, 1.0);
        let stressed_impact = base_impact * scenario.impact_multiplier;
        let stressed_risk = stressed_probability * stressed_impact;
        let risk_increase = if baseline_risk == 0.0 {
            0.0
        } else {
            (stressed_risk - baseline_risk) / baseline_risk * 100.0
        };
        scenarios.push(ScenarioResult {
            name: scenario.name.clone(),
            stressed_probability,
            stressed_impact,
            stressed_risk,
            risk_increase,
        });
    }

    let mut worst = &scenarios[0];
    let mut increase_sum = 0.0;
    for scenario in &scenarios {
        if scenario.stressed_risk > worst.stressed_risk {
            worst = scenario;
        }
        increase_sum += scenario.risk_increase;
    }
    let worst_case_scenario = worst.clone();
    let average_risk_increase = increase_sum / scenarios.len() as f64;

    let mut controls = Vec::with_capacity(params.controls.len());
    for control in &params.controls {
        controls.push(ControlResult {
            name: control.name.clone(),
            resilience: finite("effectiveness", control.effectiveness)?
                * finite("stressResistance", control.stress_resistance)?,
        });
    }

    Ok(StressResult {
        baseline_risk,
        scenarios,
        controls,
        worst_case_scenario,
        average_risk_increase,
    })
}

//! Bow-Tie barrier analysis.
//!
//! Threats on the left feed one top event; consequences on the right
//! follow from it. Preventive barriers attenuate the threat side and
//! protective barriers the consequence side. Barriers in a chain are
//! independent, so a chain's ineffectiveness is the product of
//! `(1 - effectiveness)` over its barriers.

use super::{finite, unit_interval};
use crate::error::AlgorithmError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threat {
    pub name: String,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consequence {
    pub name: String,
    pub impact: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Barrier {
    pub name: String,
    pub effectiveness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BowTieParams {
    pub threats: Vec<Threat>,
    #[serde(default)]
    pub consequences: Vec<Consequence>,
    #[serde(default)]
    pub preventive_barriers: Vec<Barrier>,
    #[serde(default)]
    pub protective_barriers: Vec<Barrier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BowTieResult {
    pub threat_probability: f64,
    pub consequence_impact: f64,
    pub preventive_effectiveness: f64,
    pub protective_effectiveness: f64,
    pub initial_risk: f64,
    pub residual_risk: f64,
    /// Percentage; 0 when the initial risk is 0.
    pub risk_reduction: f64,
}

pub fn analyse(params: &BowTieParams) -> Result<BowTieResult, AlgorithmError> {
    let mut none_occur = 1.0;
    for threat in &params.threats {
        let p = unit_interval(&format!("threat '{}' probability", threat.name), threat.probability)?;
        none_occur *= 1.0 - p;
    }
    let threat_probability = 1.0 - none_occur;

    let mut impact_sum = 0.0;
    for consequence in &params.consequences {
        impact_sum += finite(&format!("consequence '{}' impact", consequence.name), consequence.impact)?;
    }
    let consequence_impact = if params.consequences.is_empty() {
        0.0
    } else {
        impact_sum / params.consequences.len() as f64
    };

    let preventive_effectiveness = chain_effectiveness("preventive", &params.preventive_barriers)?;
    let protective_effectiveness = chain_effectiveness("protective", &params.protective_barriers)?;

    let initial_risk = threat_probability * consequence_impact;
    let residual_risk = threat_probability
        * (1.0 - preventive_effectiveness)
        * consequence_impact
        * (1.0 - protective_effectiveness);
    let risk_reduction = if initial_risk == 0.0 {
        0.0
    } else {
        (initial_risk - residual_risk) / initial_risk * 100.0
    };

    Ok(BowTieResult {
        threat_probability,
        consequence_impact,
        preventive_effectiveness,
        protective_effectiveness,
        initial_risk,
        residual_risk,
        risk_reduction,
    })
}

/// Combined effectiveness of independent barriers: `1 - Π(1 - e)`.
pub fn chain_effectiveness(side: &str, barriers: &[Barrier]) -> Result<f64, AlgorithmError> {
    let mut ineffectiveness = 1.0;
    for barrier in barriers {
        let e = unit_interval(
            &format!("{side} barrier '{}' effectiveness", barrier.name),
            barrier.effectiveness,
        )?;
        ineffectiveness *= 1.0 - e;
    }
    Ok(1.0 - ineffectiveness)
}

//! Native methodology algorithms.
//!
//! RULE: Each algorithm is a pure function of its typed parameters (and,
//! for Monte Carlo, the RNG it is handed). The built-in routines in
//! `routines.rs` compute the same values in the same floating-point
//! order, so a default routine and its native counterpart agree exactly.

pub mod bow_tie;
pub mod fmea;
pub mod monte_carlo;
pub mod stress;
pub mod var;

use crate::{error::AlgorithmError, rng::SampleRng};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinAlgorithm {
    MonteCarlo,
    Fmea,
    BowTie,
    ValueAtRisk,
    StressTest,
}

impl BuiltinAlgorithm {
    pub const ALL: [BuiltinAlgorithm; 5] = [
        Self::MonteCarlo,
        Self::Fmea,
        Self::BowTie,
        Self::ValueAtRisk,
        Self::StressTest,
    ];

    /// Registry name of the built-in methodology.
    pub fn methodology_name(&self) -> &'static str {
        match self {
            Self::MonteCarlo  => "Monte Carlo Simulation",
            Self::Fmea        => "FMEA",
            Self::BowTie      => "Bow-Tie Analysis",
            Self::ValueAtRisk => "Value at Risk",
            Self::StressTest  => "Stress Testing",
        }
    }

    pub fn from_methodology_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.methodology_name() == name)
    }

    /// Run natively against bound JSON parameters.
    pub fn run(&self, params: &Value, rng: &mut SampleRng) -> Result<Value, AlgorithmError> {
        match self {
            Self::MonteCarlo  => to_value(monte_carlo::simulate(&from_params(params)?, rng)?),
            Self::Fmea        => to_value(fmea::analyse(&from_params(params)?)?),
            Self::BowTie      => to_value(bow_tie::analyse(&from_params(params)?)?),
            Self::ValueAtRisk => to_value(var::calculate(&from_params(params)?)?),
            Self::StressTest  => to_value(stress::run(&from_params(params)?)?),
        }
    }
}

fn from_params<T: DeserializeOwned>(params: &Value) -> Result<T, AlgorithmError> {
    T::deserialize(params).map_err(|e| AlgorithmError::InvalidParameter(e.to_string()))
}

fn to_value<T: Serialize>(result: T) -> Result<Value, AlgorithmError> {
    serde_json::to_value(result).map_err(|e| AlgorithmError::InvalidParameter(e.to_string()))
}

/// Reject non-finite numbers in a named input.
pub(crate) fn finite(what: &str, value: f64) -> Result<f64, AlgorithmError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AlgorithmError::InvalidParameter(format!("{what} must be finite, got {value}")))
    }
}

/// Reject values outside [0, 1].
pub(crate) fn unit_interval(what: &str, value: f64) -> Result<f64, AlgorithmError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(AlgorithmError::InvalidParameter(format!("{what} must lie in [0, 1], got {value}")))
    }
}

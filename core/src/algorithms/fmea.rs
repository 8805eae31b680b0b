//! Failure Mode and Effects Analysis.

use super::finite;
use crate::error::AlgorithmError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureMode {
    pub name: String,
    pub severity: f64,
    pub occurrence: f64,
    pub detection: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FmeaParams {
    pub failure_modes: Vec<FailureMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criticality {
    Critical,
    High,
    Medium,
    Low,
}

impl Criticality {
    pub fn from_rpn(rpn: f64) -> Self {
        if rpn >= 200.0 {
            Self::Critical
        } else if rpn >= 100.0 {
            Self::High
        } else if rpn >= 50.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::High     => "High",
            Self::Medium   => "Medium",
            Self::Low      => "Low",
        }
    }
}

pub const IMMEDIATE: &str = "Immediate";

/// A single extreme factor escalates to Immediate regardless of tier.
pub fn action_priority(severity: f64, occurrence: f64, rpn: f64) -> String {
    if severity >= 9.0 || occurrence >= 9.0 || rpn >= 200.0 {
        IMMEDIATE.to_string()
    } else {
        Criticality::from_rpn(rpn).label().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureModeResult {
    pub name: String,
    pub severity: f64,
    pub occurrence: f64,
    pub detection: f64,
    pub rpn: f64,
    pub criticality: Criticality,
    pub action_priority: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalityCounts {
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FmeaResult {
    /// Sorted by RPN, highest first; ties keep input order.
    pub failure_modes: Vec<FailureModeResult>,
    pub total_rpn: f64,
    pub average_rpn: f64,
    pub max_rpn: f64,
    pub criticality_counts: CriticalityCounts,
    pub immediate_actions: u64,
}

pub fn analyse(params: &FmeaParams) -> Result<FmeaResult, AlgorithmError> {
    if params.failure_modes.is_empty() {
        return Err(AlgorithmError::InvalidParameter(
            "failureModes must contain at least one failure mode".into(),
        ));
    }

    let mut results = Vec::with_capacity(params.failure_modes.len());
    for mode in &params.failure_modes {
        for (factor, value) in [
            ("severity", mode.severity),
            ("occurrence", mode.occurrence),
            ("detection", mode.detection),
        ] {
            let value = finite(factor, value)?;
            if value <= 0.0 {
                return Err(AlgorithmError::InvalidParameter(format!(
                    "failure mode '{}': {factor} must be positive, got {value}",
                    mode.name
                )));
            }
        }
        let rpn = mode.severity * mode.occurrence * mode.detection;
        results.push(FailureModeResult {
            name: mode.name.clone(),
            severity: mode.severity,
            occurrence: mode.occurrence,
            detection: mode.detection,
            rpn,
            criticality: Criticality::from_rpn(rpn),
            action_priority: action_priority(mode.severity, mode.occurrence, rpn),
        });
    }
    results.sort_by(|a, b| b.rpn.total_cmp(&a.rpn));

    let mut total_rpn = 0.0;
    let mut max_rpn = f64::NEG_INFINITY;
    let mut counts = CriticalityCounts::default();
    let mut immediate_actions = 0;
    for result in &results {
        total_rpn += result.rpn;
        max_rpn = max_rpn.max(result.rpn);
        match result.criticality {
            Criticality::Critical => counts.critical += 1,
            Criticality::High     => counts.high += 1,
            Criticality::Medium   => counts.medium += 1,
            Criticality::Low      => counts.low += 1,
        }
        if result.action_priority == IMMEDIATE {
            immediate_actions += 1;
        }
    }

    Ok(FmeaResult {
        average_rpn: total_rpn / results.len() as f64,
        failure_modes: results,
        total_rpn,
        max_rpn,
        criticality_counts: counts,
        immediate_actions,
    })
}

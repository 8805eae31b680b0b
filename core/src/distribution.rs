//! Distribution library: sampling and descriptive statistics.
//!
//! RULE: Every function here is pure apart from the RNG it is handed.
//! Both the native algorithms and the sandbox builtins call into this
//! module, so a routine and its native counterpart draw identical
//! sequences from identical seeds.

use crate::{
    error::{AlgorithmError, StatsError},
    rng::SampleRng,
};
use rand_distr::{Distribution as _, LogNormal, Normal};
use serde::{Deserialize, Serialize};

/// Supported distribution families.
///
/// Unknown family names resolve to `Uniform` (see [`Distribution::parse`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    Normal,
    Uniform,
    Triangular,
    Lognormal,
}

impl Distribution {
    /// Resolve a family by name. Never fails; unknown names fall back
    /// to `Uniform` with a warning.
    pub fn parse(name: &str) -> Self {
        match Self::lookup(name) {
            Some(dist) => dist,
            None => {
                log::warn!("distribution: unknown family '{name}', falling back to uniform");
                Self::Uniform
            }
        }
    }

    /// Strict lookup; `None` for an unknown name.
    pub fn lookup(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "normal"     => Some(Self::Normal),
            "uniform"    => Some(Self::Uniform),
            "triangular" => Some(Self::Triangular),
            "lognormal"  => Some(Self::Lognormal),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal     => "normal",
            Self::Uniform    => "uniform",
            Self::Triangular => "triangular",
            Self::Lognormal  => "lognormal",
        }
    }
}

// ── Sampling ───────────────────────────────────────────────────────

pub fn sample_normal(rng: &mut SampleRng, mean: f64, stddev: f64) -> Result<f64, AlgorithmError> {
    let normal = Normal::new(mean, stddev).map_err(|e| {
        AlgorithmError::InvalidParameter(format!("normal(mean={mean}, stddev={stddev}): {e}"))
    })?;
    Ok(normal.sample(rng.inner_mut()))
}

/// Uniform draw in [min, max). A zero-width range returns `min`.
pub fn sample_uniform(rng: &mut SampleRng, min: f64, max: f64) -> Result<f64, AlgorithmError> {
    check_range("uniform", min, max)?;
    Ok(min + (max - min) * rng.next_f64())
}

/// Triangular draw by inverse CDF. `mode` is clamped into [min, max].
pub fn sample_triangular(
    rng: &mut SampleRng,
    min: f64,
    max: f64,
    mode: f64,
) -> Result<f64, AlgorithmError> {
    check_range("triangular", min, max)?;
    let u = rng.next_f64();
    if max == min {
        return Ok(min);
    }
    let mode = mode.clamp(min, max);
    let split = (mode - min) / (max - min);
    if u < split {
        Ok(min + (u * (mode - min) * (max - min)).sqrt())
    } else {
        Ok(max - ((1.0 - u) * (max - mode) * (max - min)).sqrt())
    }
}

pub fn sample_lognormal(
    rng: &mut SampleRng,
    log_mean: f64,
    log_stddev: f64,
) -> Result<f64, AlgorithmError> {
    let lognormal = LogNormal::new(log_mean, log_stddev).map_err(|e| {
        AlgorithmError::InvalidParameter(format!(
            "lognormal(logMean={log_mean}, logStddev={log_stddev}): {e}"
        ))
    })?;
    Ok(lognormal.sample(rng.inner_mut()))
}

/// Draw from `dist` parameterised by a [min, max] range.
///
///   normal:     mean = mid, stddev = (max - min) / 6
///   uniform:    [min, max)
///   triangular: mode = mid
///   lognormal:  logMean = ln(mid), logStddev = ((max - min) / 6) / mid
pub fn sample_bounded(
    rng: &mut SampleRng,
    dist: Distribution,
    min: f64,
    max: f64,
) -> Result<f64, AlgorithmError> {
    check_range(dist.name(), min, max)?;
    let mid = (min + max) / 2.0;
    let spread = (max - min) / 6.0;
    match dist {
        Distribution::Normal     => sample_normal(rng, mid, spread),
        Distribution::Uniform    => sample_uniform(rng, min, max),
        Distribution::Triangular => sample_triangular(rng, min, max, mid),
        Distribution::Lognormal  => {
            if mid <= 0.0 {
                // ln(mid) is undefined; consume a draw to keep streams aligned.
                rng.next_f64();
                return Ok(mid);
            }
            sample_lognormal(rng, mid.ln(), spread / mid)
        }
    }
}

/// `x` limited to [lo, hi]. Unlike `f64::clamp` this never panics;
/// a NaN `x` yields `lo`.
pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}

fn check_range(family: &str, min: f64, max: f64) -> Result<(), AlgorithmError> {
    if !min.is_finite() || !max.is_finite() || min > max {
        return Err(AlgorithmError::InvalidParameter(format!(
            "{family}: invalid range [{min}, {max}]"
        )));
    }
    Ok(())
}

// ── Order statistics ───────────────────────────────────────────────

/// Nearest-rank percentile: the value at index floor(p * n), clamped
/// to the last element. `sorted` must be ascending.
pub fn percentile(sorted: &[f64], p: f64) -> Result<f64, StatsError> {
    if !(0.0..=1.0).contains(&p) {
        return Err(StatsError::InvalidProbability(p));
    }
    if sorted.is_empty() {
        return Err(StatsError::InsufficientData { needed: 1, got: 0 });
    }
    Ok(sorted[percentile_index(sorted.len(), p)])
}

/// Index used by [`percentile`]; `n` must be non-zero.
pub fn percentile_index(n: usize, p: f64) -> usize {
    let idx = (p * n as f64).floor() as usize;
    idx.min(n - 1)
}

/// Ascending copy; NaNs sort last.
pub fn sorted_ascending(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

// ── Moments ────────────────────────────────────────────────────────

pub fn mean(values: &[f64]) -> Result<f64, StatsError> {
    require(values, 1)?;
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator).
pub fn standard_deviation(values: &[f64]) -> Result<f64, StatsError> {
    require(values, 2)?;
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Ok((ss / (values.len() - 1) as f64).sqrt())
}

/// Population skewness. Zero for a zero-variance sample.
pub fn skewness(values: &[f64]) -> Result<f64, StatsError> {
    require(values, 3)?;
    let (m, var) = population_moments(values);
    if var == 0.0 {
        return Ok(0.0);
    }
    let n = values.len() as f64;
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / n;
    Ok(m3 / var.powf(1.5))
}

/// Excess kurtosis (normal = 0). Zero for a zero-variance sample.
pub fn kurtosis(values: &[f64]) -> Result<f64, StatsError> {
    require(values, 3)?;
    let (m, var) = population_moments(values);
    if var == 0.0 {
        return Ok(0.0);
    }
    let n = values.len() as f64;
    let m4 = values.iter().map(|v| (v - m).powi(4)).sum::<f64>() / n;
    Ok(m4 / (var * var) - 3.0)
}

fn population_moments(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let m = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    (m, var)
}

fn require(values: &[f64], needed: usize) -> Result<(), StatsError> {
    if values.len() < needed {
        return Err(StatsError::InsufficientData { needed, got: values.len() });
    }
    Ok(())
}

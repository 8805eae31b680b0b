//! Built-in methodology definitions.
//!
//! RULE: A default routine must compute exactly what its native algorithm
//! in `algorithms/` computes: same draws in the same order, same float
//! operations in the same order. The engine tests hold both to that.

use crate::{
    algorithms::{monte_carlo, BuiltinAlgorithm},
    methodology::{MethodologyDefinition, MethodologyType, ParameterKind, ParameterSpec},
};
use serde_json::json;

pub const MONTE_CARLO_ROUTINE: &str = r#"// Monte Carlo risk simulation.
function calculate(params) {
  const n = params.iterations;
  if (n <= 0) {
    throw new RangeError('iterations must be positive, got ' + n);
  }
  if (params.probMin > params.probMax) {
    throw new RangeError('probMin ' + params.probMin + ' exceeds probMax ' + params.probMax);
  }
  if (params.impactMin > params.impactMax) {
    throw new RangeError('impactMin ' + params.impactMin + ' exceeds impactMax ' + params.impactMax);
  }

  const risks = [];
  for (let i = 0; i < n; i++) {
    const p = sampleDistribution(params.probDist, params.probMin, params.probMax);
    let impact = sampleUniform(params.impactMin, params.impactMax);
    impact *= 1 + params.correlation * (p - 0.5) * 2;
    risks.push(clamp(p, 0, 1) * Math.max(impact, 0));
  }

  const sorted = sortAscending(risks);
  const tail = sorted.slice(Math.floor(0.95 * n));
  return {
    mean: mean(sorted),
    median: percentile(sorted, 0.5),
    stdDev: standardDeviation(sorted),
    var95: percentile(sorted, 0.95),
    var99: percentile(sorted, 0.99),
    cvar95: mean(tail),
    skewness: skewness(sorted),
    kurtosis: kurtosis(sorted),
    min: sorted[0],
    max: sorted[n - 1],
    iterations: n
  };
}
"#;

pub const FMEA_ROUTINE: &str = r#"// Failure Mode and Effects Analysis.
function tier(rpn) {
  if (rpn >= 200) return 'Critical';
  if (rpn >= 100) return 'High';
  if (rpn >= 50) return 'Medium';
  return 'Low';
}

function calculate(params) {
  const modes = params.failureModes;
  if (modes.length === 0) {
    throw new RangeError('failureModes must contain at least one failure mode');
  }

  const results = [];
  for (const mode of modes) {
    for (const factor of ['severity', 'occurrence', 'detection']) {
      const value = mode[factor];
      if (!isFinite(value) || value <= 0) {
        throw new RangeError("failure mode '" + mode.name + "': " + factor + ' must be positive, got ' + value);
      }
    }
    const rpn = mode.severity * mode.occurrence * mode.detection;
    const criticality = tier(rpn);
    // One extreme factor escalates regardless of tier.
    const immediate = mode.severity >= 9 || mode.occurrence >= 9 || rpn >= 200;
    results.push({
      name: mode.name,
      severity: mode.severity,
      occurrence: mode.occurrence,
      detection: mode.detection,
      rpn: rpn,
      criticality: criticality,
      actionPriority: immediate ? 'Immediate' : criticality
    });
  }
  results.sort((a, b) => b.rpn - a.rpn);

  let totalRpn = 0;
  let maxRpn = 0;
  const counts = { critical: 0, high: 0, medium: 0, low: 0 };
  let immediateActions = 0;
  for (const r of results) {
    totalRpn += r.rpn;
    maxRpn = Math.max(maxRpn, r.rpn);
    if (r.criticality === 'Critical') counts.critical++;
    else if (r.criticality === 'High') counts.high++;
    else if (r.criticality === 'Medium') counts.medium++;
    else counts.low++;
    if (r.actionPriority === 'Immediate') immediateActions++;
  }

  return {
    failureModes: results,
    totalRpn: totalRpn,
    averageRpn: totalRpn / results.length,
    maxRpn: maxRpn,
    criticalityCounts: counts,
    immediateActions: immediateActions
  };
}
"#;

pub const BOW_TIE_ROUTINE: &str = r#"// Bow-Tie barrier analysis.
function unit(value, what) {
  if (!(value >= 0 && value <= 1)) {
    throw new RangeError(what + ' must lie in [0, 1], got ' + value);
  }
  return value;
}

function chain(barriers, side) {
  let ineffectiveness = 1;
  for (const b of barriers) {
    ineffectiveness *= 1 - unit(b.effectiveness, side + " barrier '" + b.name + "' effectiveness");
  }
  return 1 - ineffectiveness;
}

function calculate(params) {
  let noneOccur = 1;
  for (const t of params.threats) {
    noneOccur *= 1 - unit(t.probability, "threat '" + t.name + "' probability");
  }
  const threatProbability = 1 - noneOccur;

  let impactSum = 0;
  for (const c of params.consequences) {
    impactSum += c.impact;
  }
  const consequenceImpact = params.consequences.length === 0 ? 0 : impactSum / params.consequences.length;

  const preventiveEffectiveness = chain(params.preventiveBarriers, 'preventive');
  const protectiveEffectiveness = chain(params.protectiveBarriers, 'protective');

  const initialRisk = threatProbability * consequenceImpact;
  const residualRisk = threatProbability * (1 - preventiveEffectiveness)
    * consequenceImpact * (1 - protectiveEffectiveness);
  const riskReduction = initialRisk === 0 ? 0 : (initialRisk - residualRisk) / initialRisk * 100;

  return {
    threatProbability: threatProbability,
    consequenceImpact: consequenceImpact,
    preventiveEffectiveness: preventiveEffectiveness,
    protectiveEffectiveness: protectiveEffectiveness,
    initialRisk: initialRisk,
    residualRisk: residualRisk,
    riskReduction: riskReduction
  };
}
"#;

pub const VAR_ROUTINE: &str = r#"// Value-at-Risk: historical, parametric and expected shortfall.
function calculate(params) {
  const returns = params.returns;
  const n = returns.length;
  if (n < 2) {
    throw new RangeError('returns must contain at least 2 observations, got ' + n);
  }
  if (!(params.timeHorizon > 0)) {
    throw new RangeError('timeHorizon must be positive, got ' + params.timeHorizon);
  }
  const z = zScore(params.confidence);

  const mu = mean(returns);
  const sigma = standardDeviation(returns);
  const sorted = sortAscending(returns);
  const idx = Math.min(Math.floor((1 - params.confidence) * n), n - 1);

  return {
    historicalVar: -sorted[idx],
    parametricVar: -(mu - z * sigma) * Math.sqrt(params.timeHorizon),
    expectedShortfall: -mean(sorted.slice(0, idx + 1)),
    confidence: params.confidence,
    timeHorizon: params.timeHorizon,
    mean: mu,
    stdDev: sigma,
    observations: n
  };
}
"#;

pub const STRESS_ROUTINE: &str = r#"// Stress testing against multiplicative scenarios.
function calculate(params) {
  const scenarios = params.scenarios;
  if (scenarios.length === 0) {
    throw new RangeError('scenarios must contain at least one scenario');
  }
  const baselineRisk = params.baseProbability * params.baseImpact;

  const results = [];
  for (const s of scenarios) {
    if (s.probabilityMultiplier < 0 || s.impactMultiplier < 0) {
      throw new RangeError("scenario '" + s.name + "': multipliers must not be negative");
    }
    const stressedProbability = clamp(params.baseProbability * s.probabilityMultiplier, 0, 1);
    const stressedImpact = params.baseImpact * s.impactMultiplier;
    const stressedRisk = stressedProbability * stressedImpact;
    const riskIncrease = baselineRisk === 0 ? 0 : (stressedRisk - baselineRisk) / baselineRisk * 100;
    results.push({
      name: s.name,
      stressedProbability: stressedProbability,
      stressedImpact: stressedImpact,
      stressedRisk: stressedRisk,
      riskIncrease: riskIncrease
    });
  }

  let worst = results[0];
  let increaseSum = 0;
  for (const r of results) {
    if (r.stressedRisk > worst.stressedRisk) worst = r;
    increaseSum += r.riskIncrease;
  }

  const controls = [];
  for (const c of params.controls) {
    controls.push({ name: c.name, resilience: c.effectiveness * c.stressResistance });
  }

  return {
    baselineRisk: baselineRisk,
    scenarios: results,
    controls: controls,
    worstCaseScenario: worst,
    averageRiskIncrease: increaseSum / results.length
  };
}
"#;

/// Definition of one built-in methodology.
pub fn builtin_definition(algorithm: BuiltinAlgorithm) -> MethodologyDefinition {
    let (methodology_type, framework, description, schema, routine) = match algorithm {
        BuiltinAlgorithm::MonteCarlo => (
            MethodologyType::Quantitative,
            "ISO 31000",
            "Stochastic simulation of probability x impact with optional correlation.",
            monte_carlo_schema(),
            MONTE_CARLO_ROUTINE,
        ),
        BuiltinAlgorithm::Fmea => (
            MethodologyType::Hybrid,
            "IEC 60812",
            "Risk priority numbers from severity, occurrence and detection scores.",
            fmea_schema(),
            FMEA_ROUTINE,
        ),
        BuiltinAlgorithm::BowTie => (
            MethodologyType::Hybrid,
            "ISO 31010",
            "Threat and consequence barrier chains around a single top event.",
            bow_tie_schema(),
            BOW_TIE_ROUTINE,
        ),
        BuiltinAlgorithm::ValueAtRisk => (
            MethodologyType::Quantitative,
            "Basel III",
            "Historical and parametric VaR with expected shortfall.",
            var_schema(),
            VAR_ROUTINE,
        ),
        BuiltinAlgorithm::StressTest => (
            MethodologyType::Quantitative,
            "Basel III",
            "Baseline risk under multiplicative stress scenarios, with control resilience.",
            stress_schema(),
            STRESS_ROUTINE,
        ),
    };
    MethodologyDefinition {
        name: algorithm.methodology_name().to_string(),
        methodology_type,
        framework: Some(framework.to_string()),
        description: Some(description.to_string()),
        parameter_schema: schema,
        calculation_routine: routine.to_string(),
        is_active: true,
    }
}

/// All five built-ins, in a stable order.
pub fn builtin_definitions() -> Vec<MethodologyDefinition> {
    BuiltinAlgorithm::ALL.into_iter().map(builtin_definition).collect()
}

// ── Schemas ────────────────────────────────────────────────────────

fn monte_carlo_schema() -> Vec<ParameterSpec> {
    vec![
        ParameterSpec::new("iterations", ParameterKind::Integer)
            .bounds(1.0, monte_carlo::MAX_ITERATIONS as f64)
            .default_value(json!(10_000))
            .describe("number of trials"),
        ParameterSpec::new("probDist", ParameterKind::String)
            .default_value(json!("uniform"))
            .describe("normal, uniform, triangular or lognormal; unknown names use uniform"),
        ParameterSpec::new("probMin", ParameterKind::Number)
            .default_value(json!(0.1)),
        ParameterSpec::new("probMax", ParameterKind::Number)
            .default_value(json!(0.5)),
        ParameterSpec::new("impactMin", ParameterKind::Number)
            .default_value(json!(10_000.0)),
        ParameterSpec::new("impactMax", ParameterKind::Number)
            .default_value(json!(100_000.0)),
        ParameterSpec::new("correlation", ParameterKind::Number)
            .bounds(-1.0, 1.0)
            .default_value(json!(0.0))
            .describe("linear coupling of impact to probability"),
    ]
}

fn fmea_schema() -> Vec<ParameterSpec> {
    vec![ParameterSpec::new("failureModes", ParameterKind::Array)
        .default_value(json!([
            { "name": "Seal leak", "severity": 7, "occurrence": 4, "detection": 5 },
            { "name": "Sensor drift", "severity": 5, "occurrence": 3, "detection": 3 },
            { "name": "Power loss", "severity": 9, "occurrence": 2, "detection": 2 },
        ]))
        .describe("[{ name, severity, occurrence, detection }], factors typically 1-10")]
}

fn bow_tie_schema() -> Vec<ParameterSpec> {
    vec![
        ParameterSpec::new("threats", ParameterKind::Array)
            .default_value(json!([
                { "name": "Phishing", "probability": 0.3 },
                { "name": "Insider misuse", "probability": 0.05 },
            ]))
            .describe("[{ name, probability }]"),
        ParameterSpec::new("consequences", ParameterKind::Array)
            .default_value(json!([
                { "name": "Data breach", "impact": 500_000.0 },
                { "name": "Service outage", "impact": 120_000.0 },
            ]))
            .describe("[{ name, impact }]"),
        ParameterSpec::new("preventiveBarriers", ParameterKind::Array)
            .default_value(json!([
                { "name": "Awareness training", "effectiveness": 0.4 },
                { "name": "Email filtering", "effectiveness": 0.6 },
            ]))
            .describe("[{ name, effectiveness }]"),
        ParameterSpec::new("protectiveBarriers", ParameterKind::Array)
            .default_value(json!([
                { "name": "Incident response", "effectiveness": 0.5 },
            ]))
            .describe("[{ name, effectiveness }]"),
    ]
}

fn var_schema() -> Vec<ParameterSpec> {
    vec![
        ParameterSpec::new("returns", ParameterKind::Array)
            .default_value(json!([
                0.012, -0.008, 0.004, -0.021, 0.015, 0.003, -0.012, 0.007, -0.004, 0.019,
                -0.027, 0.009, 0.001, -0.006, 0.011, -0.015, 0.006, -0.002, 0.013, -0.010,
            ]))
            .describe("periodic returns"),
        ParameterSpec::new("confidence", ParameterKind::Number)
            .bounds(0.0, 1.0)
            .default_value(json!(0.95))
            .describe("0.90, 0.95 or 0.99"),
        ParameterSpec::new("timeHorizon", ParameterKind::Number)
            .min(0.0)
            .default_value(json!(1.0))
            .describe("horizon in periods"),
    ]
}

fn stress_schema() -> Vec<ParameterSpec> {
    vec![
        ParameterSpec::new("baseProbability", ParameterKind::Number)
            .bounds(0.0, 1.0)
            .default_value(json!(0.2)),
        ParameterSpec::new("baseImpact", ParameterKind::Number)
            .min(0.0)
            .default_value(json!(250_000.0)),
        ParameterSpec::new("scenarios", ParameterKind::Array)
            .default_value(json!([
                { "name": "Market crash", "probabilityMultiplier": 2.0, "impactMultiplier": 1.8 },
                { "name": "Pandemic", "probabilityMultiplier": 1.5, "impactMultiplier": 2.5 },
                { "name": "Cyber attack", "probabilityMultiplier": 3.0, "impactMultiplier": 1.2 },
            ]))
            .describe("[{ name, probabilityMultiplier, impactMultiplier }]"),
        ParameterSpec::new("controls", ParameterKind::Array)
            .default_value(json!([
                { "name": "Business continuity plan", "effectiveness": 0.7, "stressResistance": 0.6 },
                { "name": "Cyber insurance", "effectiveness": 0.5, "stressResistance": 0.9 },
            ]))
            .describe("[{ name, effectiveness, stressResistance }]"),
    ]
}

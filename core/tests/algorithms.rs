use riskquant_core::{
    algorithms::{
        bow_tie::{self, Barrier, BowTieParams, Consequence, Threat},
        fmea::{self, Criticality, FailureMode, FmeaParams, IMMEDIATE},
        monte_carlo::{self, MonteCarloParams},
        stress::{self, Control, Scenario, StressParams},
        var::{self, VarParams},
        BuiltinAlgorithm,
    },
    error::AlgorithmError,
    rng::SampleRng,
};
use serde_json::json;

// ── FMEA ───────────────────────────────────────────────────────

fn mode(name: &str, s: f64, o: f64, d: f64) -> FailureMode {
    FailureMode {
        name: name.into(),
        severity: s,
        occurrence: o,
        detection: d,
    }
}

#[test]
fn fmea_rpn_and_immediate_rule_hold_everywhere() {
    let mut modes = Vec::new();
    for s in [1.0, 4.0, 8.0, 9.0, 10.0] {
        for o in [1.0, 3.0, 9.0] {
            for d in [1.0, 5.0, 10.0] {
                modes.push(mode(&format!("{s}-{o}-{d}"), s, o, d));
            }
        }
    }
    let result = fmea::analyse(&FmeaParams { failure_modes: modes }).unwrap();
    for r in &result.failure_modes {
        assert_eq!(r.rpn, r.severity * r.occurrence * r.detection);
        let immediate = r.severity >= 9.0 || r.occurrence >= 9.0 || r.rpn >= 200.0;
        assert_eq!(r.action_priority == IMMEDIATE, immediate, "{}", r.name);
        if !immediate {
            assert_eq!(r.action_priority, r.criticality.label());
        }
    }
}

#[test]
fn fmea_escalates_low_tier_extreme_factor() {
    // RPN 9 is Low, but severity 9 forces an immediate action.
    let result = fmea::analyse(&FmeaParams {
        failure_modes: vec![mode("brittle weld", 9.0, 1.0, 1.0)],
    })
    .unwrap();
    let r = &result.failure_modes[0];
    assert_eq!(r.criticality, Criticality::Low);
    assert_eq!(r.action_priority, IMMEDIATE);
    assert_eq!(result.immediate_actions, 1);
}

#[test]
fn fmea_sorts_by_rpn_and_aggregates() {
    let result = fmea::analyse(&FmeaParams {
        failure_modes: vec![
            mode("a", 2.0, 5.0, 5.0),  // 50  Medium
            mode("b", 8.0, 5.0, 6.0),  // 240 Critical
            mode("c", 5.0, 5.0, 2.0),  // 50  Medium (tie keeps order)
            mode("d", 5.0, 4.0, 6.0),  // 120 High
        ],
    })
    .unwrap();
    let names: Vec<&str> = result.failure_modes.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["b", "d", "a", "c"]);
    assert_eq!(result.total_rpn, 460.0);
    assert_eq!(result.average_rpn, 115.0);
    assert_eq!(result.max_rpn, 240.0);
    assert_eq!(result.criticality_counts.critical, 1);
    assert_eq!(result.criticality_counts.high, 1);
    assert_eq!(result.criticality_counts.medium, 2);
    assert_eq!(result.criticality_counts.low, 0);
}

#[test]
fn fmea_rejects_empty_and_non_positive_input() {
    assert!(fmea::analyse(&FmeaParams { failure_modes: vec![] }).is_err());
    assert!(fmea::analyse(&FmeaParams { failure_modes: vec![mode("z", 0.0, 1.0, 1.0)] }).is_err());
    assert!(fmea::analyse(&FmeaParams { failure_modes: vec![mode("n", 1.0, f64::NAN, 1.0)] }).is_err());
}

// ── Bow-Tie ────────────────────────────────────────────────────

fn barrier(e: f64) -> Barrier {
    Barrier {
        name: format!("b{e}"),
        effectiveness: e,
    }
}

#[test]
fn bow_tie_zero_initial_risk_has_zero_reduction() {
    let no_consequences = BowTieParams {
        threats: vec![Threat { name: "t".into(), probability: 0.4 }],
        consequences: vec![],
        preventive_barriers: vec![barrier(0.5)],
        protective_barriers: vec![],
    };
    let result = bow_tie::analyse(&no_consequences).unwrap();
    assert_eq!(result.initial_risk, 0.0);
    assert_eq!(result.risk_reduction, 0.0);

    let no_threats = BowTieParams {
        threats: vec![],
        consequences: vec![Consequence { name: "c".into(), impact: 100.0 }],
        preventive_barriers: vec![],
        protective_barriers: vec![],
    };
    let result = bow_tie::analyse(&no_threats).unwrap();
    assert_eq!(result.threat_probability, 0.0);
    assert_eq!(result.risk_reduction, 0.0);
}

#[test]
fn bow_tie_combines_independent_barriers() {
    let params = BowTieParams {
        threats: vec![
            Threat { name: "t1".into(), probability: 0.5 },
            Threat { name: "t2".into(), probability: 0.5 },
        ],
        consequences: vec![
            Consequence { name: "c1".into(), impact: 100.0 },
            Consequence { name: "c2".into(), impact: 300.0 },
        ],
        preventive_barriers: vec![barrier(0.5), barrier(0.5)],
        protective_barriers: vec![barrier(0.2)],
    };
    let result = bow_tie::analyse(&params).unwrap();
    assert!((result.threat_probability - 0.75).abs() < 1e-12);
    assert_eq!(result.consequence_impact, 200.0);
    assert!((result.preventive_effectiveness - 0.75).abs() < 1e-12);
    assert!((result.initial_risk - 150.0).abs() < 1e-9);
    // 0.75 * 0.25 * 200 * 0.8
    assert!((result.residual_risk - 30.0).abs() < 1e-9);
    assert!((result.risk_reduction - 80.0).abs() < 1e-9);
}

#[test]
fn bow_tie_rejects_out_of_range_probabilities() {
    let params = BowTieParams {
        threats: vec![Threat { name: "t".into(), probability: 1.2 }],
        consequences: vec![],
        preventive_barriers: vec![],
        protective_barriers: vec![],
    };
    assert!(matches!(bow_tie::analyse(&params), Err(AlgorithmError::InvalidParameter(_))));
    assert!(bow_tie::chain_effectiveness("preventive", &[barrier(-0.1)]).is_err());
}

// ── Monte Carlo ────────────────────────────────────────────────

fn mc(iterations: i64, prob: (f64, f64), impact: (f64, f64), correlation: f64) -> MonteCarloParams {
    MonteCarloParams {
        iterations,
        prob_dist: "uniform".into(),
        prob_min: prob.0,
        prob_max: prob.1,
        impact_min: impact.0,
        impact_max: impact.1,
        correlation,
    }
}

#[test]
fn monte_carlo_degenerate_case_has_known_mean() {
    let params = mc(10_000, (0.5, 0.5), (1.0, 1.0), 0.0);
    let result = monte_carlo::simulate(&params, &mut SampleRng::new(42)).unwrap();
    assert!((result.mean - 0.5).abs() < 1e-9, "mean {}", result.mean);
    assert_eq!(result.iterations, 10_000);
    assert_eq!(result.std_dev, 0.0);
    assert_eq!(result.min, result.max);
}

#[test]
fn monte_carlo_is_reproducible_per_seed() {
    let params = mc(2_000, (0.1, 0.6), (1_000.0, 5_000.0), 0.3);
    let a = monte_carlo::simulate(&params, &mut SampleRng::new(7)).unwrap();
    let b = monte_carlo::simulate(&params, &mut SampleRng::new(7)).unwrap();
    let c = monte_carlo::simulate(&params, &mut SampleRng::new(8)).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn monte_carlo_statistics_are_ordered() {
    for dist in ["normal", "uniform", "triangular", "lognormal", "unheard-of"] {
        let mut params = mc(5_000, (0.2, 0.4), (100.0, 200.0), 0.0);
        params.prob_dist = dist.into();
        let r = monte_carlo::simulate(&params, &mut SampleRng::new(3)).unwrap();
        assert!(r.min <= r.median && r.median <= r.var95 && r.var95 <= r.var99 && r.var99 <= r.max, "{dist}");
        assert!(r.cvar95 >= r.var95, "{dist}");
        assert!(r.min >= 0.0, "{dist}");
    }
}

#[test]
fn monte_carlo_rejects_bad_parameters() {
    let mut rng = SampleRng::new(1);
    assert!(monte_carlo::simulate(&mc(0, (0.1, 0.2), (1.0, 2.0), 0.0), &mut rng).is_err());
    assert!(monte_carlo::simulate(&mc(-5, (0.1, 0.2), (1.0, 2.0), 0.0), &mut rng).is_err());
    assert!(monte_carlo::simulate(&mc(100, (0.3, 0.2), (1.0, 2.0), 0.0), &mut rng).is_err());
    assert!(monte_carlo::simulate(&mc(100, (0.1, 0.2), (5.0, 2.0), 0.0), &mut rng).is_err());
}

#[test]
fn monte_carlo_caps_iterations_before_allocating() {
    let mut rng = SampleRng::new(1);
    let too_many = mc(monte_carlo::MAX_ITERATIONS + 1, (0.1, 0.2), (1.0, 2.0), 0.0);
    match monte_carlo::simulate(&too_many, &mut rng) {
        Err(AlgorithmError::InvalidParameter(message)) => assert!(message.contains("exceed"), "{message}"),
        other => panic!("Expected InvalidParameter, got {other:?}"),
    }
    let huge = mc(i64::MAX, (0.1, 0.2), (1.0, 2.0), 0.0);
    assert!(matches!(
        monte_carlo::simulate(&huge, &mut rng),
        Err(AlgorithmError::InvalidParameter(_))
    ));
}

// ── VaR ────────────────────────────────────────────────────────

fn returns() -> Vec<f64> {
    vec![
        0.012, -0.008, 0.004, -0.021, 0.015, 0.003, -0.012, 0.007, -0.004, 0.019, -0.027, 0.009,
        0.001, -0.006, 0.011, -0.015, 0.006, -0.002, 0.013, -0.010, -0.031, 0.017, 0.002, -0.019,
        0.008, -0.001, 0.014, -0.009, 0.005, -0.013,
    ]
}

fn var_at(confidence: f64, series: Vec<f64>) -> f64 {
    var::calculate(&VarParams { returns: series, confidence, time_horizon: 1.0 })
        .unwrap()
        .historical_var
}

#[test]
fn historical_var_is_monotone_in_confidence() {
    let series = returns();
    let v90 = var_at(0.90, series.clone());
    let v95 = var_at(0.95, series.clone());
    let v99 = var_at(0.99, series);
    assert!(v90 <= v95 && v95 <= v99, "{v90} {v95} {v99}");

    let short = vec![0.01, -0.02, 0.03];
    assert!(var_at(0.95, short.clone()) <= var_at(0.99, short));
}

#[test]
fn var_components() {
    let result = var::calculate(&VarParams {
        returns: returns(),
        confidence: 0.95,
        time_horizon: 4.0,
    })
    .unwrap();
    // floor(0.05 * 30) = 1: the second-smallest return
    assert_eq!(result.historical_var, 0.027);
    let es = (0.031 + 0.027) / 2.0;
    assert!((result.expected_shortfall - es).abs() < 1e-12);
    let expected = -(result.mean - 1.6449 * result.std_dev) * 2.0;
    assert!((result.parametric_var - expected).abs() < 1e-12);
    assert_eq!(result.observations, 30);
}

#[test]
fn var_rejects_bad_input() {
    let err = var::calculate(&VarParams { returns: vec![0.01], confidence: 0.95, time_horizon: 1.0 });
    assert!(matches!(err, Err(AlgorithmError::InvalidParameter(_))));

    let err = var::calculate(&VarParams { returns: returns(), confidence: 0.975, time_horizon: 1.0 });
    assert!(matches!(err, Err(AlgorithmError::UnsupportedParameter(_))));

    let err = var::calculate(&VarParams { returns: returns(), confidence: 0.95, time_horizon: 0.0 });
    assert!(matches!(err, Err(AlgorithmError::InvalidParameter(_))));

    assert!((var::z_score(0.99).unwrap() - 2.3263).abs() < 1e-12);
    assert!(var::z_score(0.99 + 1e-12).is_ok());
}

// ── Stress ─────────────────────────────────────────────────────

fn scenario(name: &str, p: f64, i: f64) -> Scenario {
    Scenario {
        name: name.into(),
        probability_multiplier: p,
        impact_multiplier: i,
    }
}

#[test]
fn stress_worst_case_is_the_max_stressed_risk() {
    let grids = [
        vec![scenario("a", 1.5, 1.0), scenario("b", 2.0, 3.0), scenario("c", 3.0, 1.1)],
        vec![scenario("only", 0.5, 0.5)],
        vec![scenario("x", 10.0, 1.0), scenario("y", 1.0, 2.0), scenario("z", 20.0, 1.0)],
    ];
    for scenarios in grids {
        let result = stress::run(&StressParams {
            base_probability: 0.2,
            base_impact: 1_000.0,
            scenarios,
            controls: vec![],
        })
        .unwrap();
        let max = result
            .scenarios
            .iter()
            .map(|s| s.stressed_risk)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(result.worst_case_scenario.stressed_risk, max);
        // First scenario achieving the max.
        let first = result.scenarios.iter().find(|s| s.stressed_risk == max).unwrap();
        assert_eq!(result.worst_case_scenario.name, first.name);
    }
}

#[test]
fn stress_clamps_probability_and_scores_controls() {
    let result = stress::run(&StressParams {
        base_probability: 0.4,
        base_impact: 100.0,
        scenarios: vec![scenario("severe", 5.0, 2.0), scenario("mild", 1.0, 1.0)],
        controls: vec![Control {
            name: "bcp".into(),
            effectiveness: 0.8,
            stress_resistance: 0.5,
        }],
    })
    .unwrap();
    assert_eq!(result.baseline_risk, 40.0);
    assert_eq!(result.scenarios[0].stressed_probability, 1.0);
    assert_eq!(result.scenarios[0].stressed_risk, 200.0);
    assert_eq!(result.scenarios[0].risk_increase, 400.0);
    assert_eq!(result.scenarios[1].risk_increase, 0.0);
    assert_eq!(result.average_risk_increase, 200.0);
    assert!((result.controls[0].resilience - 0.4).abs() < 1e-12);
}

#[test]
fn stress_zero_baseline_and_empty_scenarios() {
    let result = stress::run(&StressParams {
        base_probability: 0.0,
        base_impact: 100.0,
        scenarios: vec![scenario("s", 2.0, 2.0)],
        controls: vec![],
    })
    .unwrap();
    assert_eq!(result.scenarios[0].risk_increase, 0.0);

    let err = stress::run(&StressParams {
        base_probability: 0.1,
        base_impact: 1.0,
        scenarios: vec![],
        controls: vec![],
    });
    assert!(matches!(err, Err(AlgorithmError::InvalidParameter(_))));
}

// ── Dispatch ───────────────────────────────────────────────────

#[test]
fn builtin_dispatch_by_name_and_json() {
    for alg in BuiltinAlgorithm::ALL {
        assert_eq!(BuiltinAlgorithm::from_methodology_name(alg.methodology_name()), Some(alg));
    }
    let output = BuiltinAlgorithm::Fmea
        .run(
            &json!({ "failureModes": [{ "name": "m", "severity": 2, "occurrence": 3, "detection": 4 }] }),
            &mut SampleRng::new(0),
        )
        .unwrap();
    assert_eq!(output["totalRpn"], json!(24.0));
    assert_eq!(output["failureModes"][0]["actionPriority"], json!("Low"));

    let err = BuiltinAlgorithm::ValueAtRisk.run(&json!({ "returns": "nope" }), &mut SampleRng::new(0));
    assert!(matches!(err, Err(AlgorithmError::InvalidParameter(_))));
}

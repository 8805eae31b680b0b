use riskquant_core::{
    config::{EngineConfig, ExecutionLimits},
    error::ExecutionError,
    executor::{CancelToken, SandboxedExecutor},
};
use serde_json::{json, Map, Value};
use std::thread;
use std::time::{Duration, Instant};

fn executor() -> SandboxedExecutor {
    SandboxedExecutor::new(EngineConfig::default_test().limits)
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn run(source: &str, p: Value) -> Result<Value, ExecutionError> {
    executor()
        .execute(source, params(p), 7, &CancelToken::new())
        .map(|r| r.output)
}

#[test]
fn routine_receives_bound_parameters() {
    let source = "function calculate(params) { return { total: params.a * params.b, label: params.name } }";
    let output = run(source, json!({ "a": 6, "b": 7, "name": "x" })).unwrap();
    assert_eq!(output, json!({ "total": 42, "label": "x" }));
}

#[test]
fn result_reports_seed_and_iterations() {
    let source = "function calculate() { let s = 0; for (let i = 0; i < 25; i++) { s += i } return s }";
    let result = executor()
        .execute(source, Map::new(), 1234, &CancelToken::new())
        .unwrap();
    assert_eq!(result.output, json!(300));
    assert_eq!(result.seed, 1234);
    assert_eq!(result.iterations_run, 25);
    assert_eq!(result.methodology_id, None);
}

#[test]
fn top_level_statements_run_before_entry_point() {
    let source = "const scale = 10;\nfunction calculate(p) { return p.x * scale }";
    assert_eq!(run(source, json!({ "x": 4 })).unwrap(), json!(40));
}

#[test]
fn same_seed_same_output() {
    let source = "function calculate() { const xs = []; for (let i = 0; i < 50; i++) { xs.push(sampleNormal(0, 1)) } return { m: mean(xs), r: Math.random() } }";
    let a = executor().execute(source, Map::new(), 99, &CancelToken::new()).unwrap();
    let b = executor().execute(source, Map::new(), 99, &CancelToken::new()).unwrap();
    let c = executor().execute(source, Map::new(), 100, &CancelToken::new()).unwrap();
    assert_eq!(a.output, b.output);
    assert_ne!(a.output, c.output);
}

#[test]
fn thrown_error_is_a_runtime_fault() {
    let err = run("function calculate() { throw new Error('boom') }", json!({})).unwrap_err();
    match err {
        ExecutionError::RuntimeFault(message) => assert!(message.contains("boom"), "{message}"),
        other => panic!("Expected RuntimeFault, got {other:?}"),
    }
}

#[test]
fn range_error_is_an_invalid_parameter() {
    let err = run("function calculate() { throw new RangeError('n too small') }", json!({})).unwrap_err();
    assert_eq!(err, ExecutionError::InvalidParameter("n too small".into()));
}

#[test]
fn unsupported_confidence_is_reported_as_such() {
    let err = run("function calculate() { return zScore(0.8) }", json!({})).unwrap_err();
    assert_eq!(err.category(), "unsupported_parameter");
}

#[test]
fn strict_runtime_faults() {
    let cases = [
        "function calculate() { return 1 / 0 }",
        "function calculate() { return 5 % 0 }",
        "function calculate(p) { return p.missing + 1 }",
        "function calculate() { return nothing }",
        "function calculate() { const xs = [1, 2]; return xs[5] }",
        "function calculate() { const f = 3; return f() }",
        "function calculate() { undeclared = 2; return 1 }",
        "function calculate() { return Math.sqrt(-1) }",
    ];
    for source in cases {
        let err = run(source, json!({})).unwrap_err();
        assert_eq!(err.category(), "runtime_fault", "{source}: {err}");
    }
}

fn runtime_fault_message(err: ExecutionError) -> String {
    match err {
        ExecutionError::RuntimeFault(message) => message,
        other => panic!("Expected RuntimeFault, got {other:?}"),
    }
}

#[test]
fn arrays_join_into_strings() {
    let source = "function calculate() { return 'v=' + [1, [2, 3], null, 'x'] + ';' + [] }";
    assert_eq!(run(source, json!({})).unwrap(), json!("v=1,2,3,,x;"));
}

#[test]
fn self_referencing_array_in_a_string_is_a_runtime_fault() {
    let source = "function calculate() { const a = [1]; a.push(a); const s = '' + a; return 1 }";
    let message = runtime_fault_message(run(source, json!({})).unwrap_err());
    assert!(message.contains("self-referencing"), "{message}");
}

#[test]
fn array_reached_through_another_array_is_still_a_cycle() {
    let source = "function calculate() { const a = [1]; const b = [a]; a.push(b); return a + '' }";
    let message = runtime_fault_message(run(source, json!({})).unwrap_err());
    assert!(message.contains("self-referencing"), "{message}");
}

#[test]
fn throwing_a_cyclic_value_is_a_runtime_fault() {
    let cases = [
        "function calculate() { const a = []; a.push(a); throw a }",
        "function calculate() { const a = []; a.push(a); throw new Error(a) }",
        "function calculate() { const a = []; a.push(a); throw { message: a } }",
        "function calculate() { const a = []; a.push(a); throw new RangeError(a) }",
    ];
    for source in cases {
        let message = runtime_fault_message(run(source, json!({})).unwrap_err());
        assert!(message.contains("self-referencing"), "{source}: {message}");
    }
}

#[test]
fn deeply_nested_array_in_a_string_is_a_runtime_fault() {
    let source = "function calculate() { let a = [1]; for (let i = 0; i < 500; i++) { a = [a] } return '' + a }";
    let message = runtime_fault_message(run(source, json!({})).unwrap_err());
    assert!(message.contains("nested"), "{message}");
}

#[test]
fn shared_arrays_cannot_blow_up_a_string() {
    // Sixty levels of [a, a] stay acyclic but expand to 2^60 elements.
    let source = "function calculate() { let a = [1]; for (let i = 0; i < 60; i++) { a = [a, a] } return ('' + a).length }";
    let err = run(source, json!({})).unwrap_err();
    assert_eq!(err.category(), "resource_exceeded", "{err}");
}

#[test]
fn shared_arrays_cannot_blow_up_a_result() {
    let source = "function calculate() { let a = [1]; for (let i = 0; i < 60; i++) { a = [a, a] } return { a } }";
    let message = runtime_fault_message(run(source, json!({})).unwrap_err());
    assert!(message.contains("invalid result"), "{message}");
}

#[test]
fn long_operator_chain_is_rejected_before_running() {
    let source = format!("function calculate() {{ return 1{} }}", "+1".repeat(150_000));
    let message = runtime_fault_message(run(&source, json!({})).unwrap_err());
    assert!(message.contains("failed validation"), "{message}");
    assert!(message.contains("nested too deeply"), "{message}");
}

#[test]
fn long_member_chain_is_rejected_before_running() {
    let source = format!("function calculate(p) {{ return p{} }}", ".b".repeat(150_000));
    let message = runtime_fault_message(run(&source, json!({})).unwrap_err());
    assert!(message.contains("nested too deeply"), "{message}");
}

#[test]
fn recursion_past_the_evaluation_depth_is_a_resource_error() {
    let limits = ExecutionLimits {
        max_call_depth: 1_000_000,
        ..EngineConfig::default_test().limits
    };
    let source = "function f(n) { return 1 + f(n + 1) }\nfunction calculate() { return f(0) }";
    let err = SandboxedExecutor::new(limits)
        .execute(source, Map::new(), 1, &CancelToken::new())
        .unwrap_err();
    match err {
        ExecutionError::ResourceExceeded(message) => assert!(message.contains("evaluation depth"), "{message}"),
        other => panic!("Expected ResourceExceeded, got {other:?}"),
    }
}

#[test]
fn routine_without_entry_point_faults() {
    let err = run("const x = 1;", json!({})).unwrap_err();
    assert_eq!(err.category(), "runtime_fault");
}

#[test]
fn invalid_routine_never_runs() {
    let err = run("function calculate() { return eval('1') }", json!({})).unwrap_err();
    assert_eq!(err.category(), "runtime_fault");
}

#[test]
fn infinite_loop_is_stopped_by_step_limit() {
    let limits = ExecutionLimits {
        max_steps: 100_000,
        ..EngineConfig::default_test().limits
    };
    let err = SandboxedExecutor::new(limits)
        .execute("function calculate() { while (true) {} }", Map::new(), 1, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, ExecutionError::ResourceExceeded(_)), "{err:?}");
}

#[test]
fn infinite_loop_is_stopped_by_wall_clock() {
    let limits = ExecutionLimits {
        timeout_ms: 200,
        max_steps: u64::MAX,
        ..EngineConfig::default_test().limits
    };
    let started = Instant::now();
    let err = SandboxedExecutor::new(limits)
        .execute("function calculate() { let i = 0; while (true) { i++ } }", Map::new(), 1, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, ExecutionError::ResourceExceeded(_)), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn deep_recursion_is_a_resource_error() {
    let err = run("function f(n) { return f(n + 1) }\nfunction calculate() { return f(0) }", json!({})).unwrap_err();
    assert_eq!(err.category(), "resource_exceeded");
}

#[test]
fn cancellation_returns_cancelled() {
    let cancel = CancelToken::new();
    let remote = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        remote.cancel();
    });
    let limits = ExecutionLimits {
        max_steps: u64::MAX,
        ..EngineConfig::default_test().limits
    };
    let err = SandboxedExecutor::new(limits)
        .execute("function calculate() { while (true) {} }", Map::new(), 1, &cancel)
        .unwrap_err();
    canceller.join().unwrap();
    assert_eq!(err, ExecutionError::Cancelled);
}

#[test]
fn concurrent_runs_do_not_interfere() {
    let source = "function calculate(p) { let s = 0; for (let i = 0; i < 1000; i++) { s += sampleUniform(0, p.k) } return s }";
    let sequential: Vec<Value> = (0..8u64)
        .map(|k| {
            executor()
                .execute(source, params(json!({ "k": k + 1 })), k, &CancelToken::new())
                .unwrap()
                .output
        })
        .collect();

    let handles: Vec<_> = (0..8u64)
        .map(|k| {
            thread::spawn(move || {
                executor()
                    .execute(source, params(json!({ "k": k + 1 })), k, &CancelToken::new())
                    .unwrap()
                    .output
            })
        })
        .collect();
    let concurrent: Vec<Value> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(sequential, concurrent);
}

#[test]
fn parameters_are_copied_into_each_run() {
    let source = "function calculate(p) { p.xs.push(4); return p.xs.length }";
    let shared = params(json!({ "xs": [1, 2, 3] }));
    let exec = executor();
    let first = exec.execute(source, shared.clone(), 1, &CancelToken::new()).unwrap();
    let second = exec.execute(source, shared.clone(), 1, &CancelToken::new()).unwrap();
    assert_eq!(first.output, json!(4));
    assert_eq!(second.output, json!(4));
    assert_eq!(shared["xs"], json!([1, 2, 3]));
}

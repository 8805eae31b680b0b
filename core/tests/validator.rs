use riskquant_core::{routines::builtin_definitions, validator::validate};

#[test]
fn empty_routine_is_invalid() {
    for source in ["", "   \n\t  "] {
        let report = validate(source);
        assert!(!report.is_valid);
        assert!(!report.errors.is_empty(), "Expected an error for {source:?}");
    }
}

#[test]
fn dynamic_code_constructs_are_rejected() {
    let cases = [
        "function calculate(p) { return eval('1 + 1'); }",
        "function calculate(p) { const f = Function('return 1'); return f(); }",
        "function calculate(p) { setTimeout(calculate, 10); return 1; }",
        "function calculate(p) { setInterval(calculate, 10); return 1; }",
        "function calculate(p) { return p.constructor; }",
        "function calculate(p) { return p['__proto__']; }",
        "function calculate(p) { return Object.prototype; }",
    ];
    for source in cases {
        let report = validate(source);
        assert!(!report.is_valid, "Expected rejection of: {source}");
    }
}

#[test]
fn module_loading_is_rejected() {
    for source in [
        "const fs = require('fs'); function calculate() { return 1; }",
        "import x from 'y'; function calculate() { return 1; }",
        "export function calculate() { return 1; }",
    ] {
        assert!(!validate(source).is_valid, "Expected rejection of: {source}");
    }
}

#[test]
fn forbidden_names_match_whole_tokens_only() {
    let report = validate(
        "function calculate(params) { const evaluate = 2; const prototypes = 3; return { v: evaluate * prototypes }; }",
    );
    assert!(report.is_valid, "errors: {:?}", report.errors);
}

#[test]
fn forbidden_constructs_reported_even_when_unparseable() {
    let report = validate("function calculate( { eval(");
    assert!(!report.is_valid);
    assert!(report.errors.iter().any(|e| e.contains("eval")));
    assert!(report.errors.iter().any(|e| e.contains("syntax error")));
}

#[test]
fn syntax_errors_carry_a_position() {
    let report = validate("function calculate(p) {\n  return p.x +;\n}");
    assert!(!report.is_valid);
    assert!(report.errors[0].contains("line 2"), "got {:?}", report.errors);
}

#[test]
fn routine_without_function_is_only_a_warning() {
    let report = validate("const x = 1 + 2;");
    assert!(report.is_valid);
    assert!(report.errors.is_empty());
    assert_eq!(report.warnings.len(), 1);
}

#[test]
fn missing_calculate_names_the_fallback_entry_point() {
    let report = validate("function score(p) { return 1; }");
    assert!(report.is_valid);
    assert!(report.warnings.iter().any(|w| w.contains("'score'")));

    let clean = validate("function helper() { return 2; }\nfunction calculate(p) { return helper(); }");
    assert!(clean.is_valid);
    assert!(clean.warnings.is_empty());
}

#[test]
fn every_builtin_routine_validates_cleanly() {
    for def in builtin_definitions() {
        let report = validate(&def.calculation_routine);
        assert!(report.is_valid, "{}: {:?}", def.name, report.errors);
        assert!(report.warnings.is_empty(), "{}: {:?}", def.name, report.warnings);
    }
}

#[test]
fn validation_is_pure() {
    let source = "function calculate(p) { while (true) {} }";
    // Validating a non-terminating routine returns immediately.
    assert_eq!(validate(source), validate(source));
    assert!(validate(source).is_valid);
}

fn assert_too_deep(source: &str) {
    let report = validate(source);
    assert!(!report.is_valid);
    assert!(
        report.errors.iter().any(|e| e.contains("nested too deeply")),
        "Expected a nesting error, got {:?}",
        report.errors
    );
}

#[test]
fn long_operator_chains_are_rejected() {
    let terms = 150_000;
    assert_too_deep(&format!("function calculate(p) {{ return 1{} }}", "+1".repeat(terms)));
    assert_too_deep(&format!("function calculate(p) {{ return 2{} }}", "*2".repeat(terms)));
    assert_too_deep(&format!("function calculate(p) {{ return p.a{} }}", " && p.a".repeat(terms)));
    assert_too_deep(&format!("function calculate(p) {{ return 1{} }}", " < 2".repeat(terms)));
}

#[test]
fn long_postfix_chains_are_rejected() {
    let steps = 150_000;
    assert_too_deep(&format!("function calculate(p) {{ return p{} }}", ".b".repeat(steps)));
    assert_too_deep(&format!("function calculate(p) {{ return p{} }}", "[0]".repeat(steps)));
    assert_too_deep(&format!("function calculate(p) {{ return p.f{} }}", "()".repeat(steps)));
}

#[test]
fn ordinary_chains_are_accepted() {
    let sum = format!("function calculate(p) {{ return p.a{} }}", " + p.a".repeat(40));
    assert!(validate(&sum).is_valid, "{:?}", validate(&sum).errors);
    let members = "function calculate(p) { return p.portfolio.positions[0].exposure.value }";
    assert!(validate(members).is_valid);
}

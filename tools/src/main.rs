//! quant-runner: command-line front end for the risk quantification engine.
//!
//! Usage:
//!   quant-runner --list
//!   quant-runner --run "Monte Carlo Simulation" --params '{"iterations": 5000}' --seed 7
//!   quant-runner --run "Value at Risk" --native
//!   quant-runner --validate routine.js
//!   quant-runner --db methodologies.db --export > snapshot.json
//!   quant-runner --db methodologies.db --import snapshot.json

use anyhow::{anyhow, bail, Context, Result};
use riskquant_core::{
    algorithms::BuiltinAlgorithm,
    config::EngineConfig,
    engine::QuantEngine,
    rng::SampleRng,
    snapshot::ExportSnapshot,
    store::SqliteStore,
};
use serde_json::Value;
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config = match flag_value(&args, "--config") {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    if let Some(path) = flag_value(&args, "--validate") {
        return validate_file(path);
    }

    let engine = match flag_value(&args, "--db") {
        Some(path) => QuantEngine::with_store(config, Box::new(SqliteStore::open(path)?))?,
        None => QuantEngine::new(config)?,
    };

    if let Some(path) = flag_value(&args, "--import") {
        let json = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        let report = engine.import_methodologies(&ExportSnapshot::from_json(&json)?)?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if has_flag(&args, "--list") {
        print_list(&engine);
    }

    if has_flag(&args, "--export") {
        println!("{}", engine.export_json()?);
    }

    if let Some(name) = flag_value(&args, "--run") {
        let params: Value = match flag_value(&args, "--params") {
            Some(json) => serde_json::from_str(json).context("--params is not valid JSON")?,
            None => Value::Object(Default::default()),
        };
        let seed = flag_value(&args, "--seed").map(str::parse::<u64>).transpose()?;
        if has_flag(&args, "--native") {
            run_native(&engine, name, &params, seed.unwrap_or(engine.config().master_seed))?;
        } else {
            run_routine(&engine, name, &params, seed)?;
        }
    }

    Ok(())
}

fn validate_file(path: &str) -> Result<()> {
    let source = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let report = riskquant_core::validator::validate(&source);
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_valid {
        bail!("{path} failed validation");
    }
    Ok(())
}

fn print_list(engine: &QuantEngine) {
    println!("=== METHODOLOGIES ===");
    for m in engine.list_methodologies(false) {
        println!(
            "  {:<28} {:<13} {:<8} params: {:<2} {}",
            m.name,
            m.methodology_type.as_str(),
            if m.is_active { "active" } else { "inactive" },
            m.parameter_count,
            m.id
        );
    }
}

fn run_routine(engine: &QuantEngine, name: &str, params: &Value, seed: Option<u64>) -> Result<()> {
    let methodology = engine
        .find_methodology(name)
        .ok_or_else(|| anyhow!("no methodology named '{name}'"))?;
    let result = match seed {
        Some(seed) => engine.run_methodology_seeded(&methodology.id, params, seed)?,
        None => engine.run_methodology(&methodology.id, params)?,
    };
    log::info!(
        "runner: '{name}' finished in {}ms ({} iterations, seed {})",
        result.duration_ms,
        result.iterations_run,
        result.seed
    );
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Run the native algorithm behind a built-in methodology, with the
/// parameters bound against that methodology's schema.
fn run_native(engine: &QuantEngine, name: &str, params: &Value, seed: u64) -> Result<()> {
    let algorithm = BuiltinAlgorithm::from_methodology_name(name)
        .ok_or_else(|| anyhow!("'{name}' has no native implementation"))?;
    let bound = match engine.find_methodology(name) {
        Some(methodology) => Value::Object(methodology.bind_parameters(params)?),
        None => params.clone(),
    };
    let output = algorithm.run(&bound, &mut SampleRng::new(seed))?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

//! The quantification engine: one facade over registry, validator and
//! sandbox.
//!
//! RUN PATH (fixed order):
//!   1. Look up the methodology (NotFound)
//!   2. Reject it if inactive
//!   3. Bind parameters against its schema
//!   4. Snapshot the routine (the `Arc` held for the whole run)
//!   5. Execute in the sandbox
//!   6. Interpret the output
//!
//! RULES:
//!   - All randomness flows through the RngBank or an explicit seed.
//!   - Runs share no mutable state; the engine is Send + Sync.
//!   - A failed run never yields a partial result.

use crate::{
    config::EngineConfig,
    error::{EngineError, EngineResult, ExecutionError},
    executor::{CancelToken, ExecutionResult, SandboxedExecutor},
    methodology::{Methodology, MethodologyDefinition, MethodologySummary},
    registry::Registry,
    rng::RngBank,
    routines,
    snapshot::{self, ExportSnapshot, ImportReport},
    store::MethodologyStore,
    types::{MethodologyId, Seed},
    validator::{self, ValidationResult},
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct QuantEngine {
    config:   EngineConfig,
    registry: Registry,
    executor: SandboxedExecutor,
    rng_bank: RngBank,
}

/// A run started with [`QuantEngine::spawn_run`].
pub struct RunHandle {
    methodology_id: MethodologyId,
    seed:           Seed,
    cancel:         CancelToken,
    handle:         JoinHandle<Result<ExecutionResult, ExecutionError>>,
}

impl RunHandle {
    pub fn methodology_id(&self) -> &str {
        &self.methodology_id
    }

    pub fn seed(&self) -> Seed {
        self.seed
    }

    /// Request cooperative cancellation. The run ends with `Cancelled`
    /// at its next poll.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the run finishes.
    pub fn wait(self) -> EngineResult<ExecutionResult> {
        match self.handle.join() {
            Ok(result) => Ok(result?),
            Err(_) => Err(ExecutionError::RuntimeFault("run thread panicked".into()).into()),
        }
    }
}

/// Everything a run needs, captured before it starts.
struct PreparedRun {
    methodology: Arc<Methodology>,
    params:      Map<String, Value>,
}

impl QuantEngine {
    /// Engine over an in-memory store.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.limits.check()?;
        let install = config.install_builtins;
        let engine = Self::assemble(config, Registry::new());
        if install {
            engine.install_builtins()?;
        }
        Ok(engine)
    }

    /// Engine over an existing store; stored methodologies are loaded.
    pub fn with_store(config: EngineConfig, store: Box<dyn MethodologyStore>) -> EngineResult<Self> {
        config.limits.check()?;
        let install = config.install_builtins;
        let engine = Self::assemble(config, Registry::open(store)?);
        if install {
            engine.install_builtins()?;
        }
        Ok(engine)
    }

    /// Engine for tests: fixed seed, tight limits, empty registry.
    pub fn build_test() -> Self {
        Self::assemble(EngineConfig::default_test(), Registry::new())
    }

    fn assemble(config: EngineConfig, registry: Registry) -> Self {
        log::info!(
            "engine: ready (seed {}, timeout {}ms, {} methodologies)",
            config.master_seed,
            config.limits.timeout_ms,
            registry.len()
        );
        Self {
            executor: SandboxedExecutor::new(config.limits.clone()),
            rng_bank: RngBank::new(config.master_seed),
            registry,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Methodology management ─────────────────────────────────

    pub fn validate_formula(&self, source: &str) -> ValidationResult {
        validator::validate(source)
    }

    pub fn create_methodology(&self, def: MethodologyDefinition) -> EngineResult<MethodologyId> {
        Ok(self.registry.create(def)?.id.clone())
    }

    pub fn update_methodology(&self, id: &str, def: MethodologyDefinition) -> EngineResult<()> {
        self.registry.update(id, def)?;
        Ok(())
    }

    pub fn get_methodology(&self, id: &str) -> EngineResult<Arc<Methodology>> {
        self.registry.get(id)
    }

    pub fn find_methodology(&self, name: &str) -> Option<Arc<Methodology>> {
        self.registry.find_by_name(name)
    }

    pub fn list_methodologies(&self, active_only: bool) -> Vec<MethodologySummary> {
        self.registry.list(active_only)
    }

    pub fn set_active(&self, id: &str, active: bool) -> EngineResult<()> {
        self.registry.set_active(id, active)?;
        Ok(())
    }

    pub fn delete_methodology(&self, id: &str) -> EngineResult<()> {
        self.registry.delete(id)
    }

    /// Create each built-in methodology whose name is not taken yet.
    /// Returns the ids of the ones created.
    pub fn install_builtins(&self) -> EngineResult<Vec<MethodologyId>> {
        let mut created = Vec::new();
        for def in routines::builtin_definitions() {
            if self.registry.find_by_name(&def.name).is_some() {
                continue;
            }
            created.push(self.create_methodology(def)?);
        }
        if !created.is_empty() {
            log::info!("engine: installed {} built-in methodologies", created.len());
        }
        Ok(created)
    }

    // ── Runs ───────────────────────────────────────────────────

    /// Run with the next seed from the engine's RngBank.
    pub fn run_methodology(&self, id: &str, params: &Value) -> EngineResult<ExecutionResult> {
        self.run_methodology_seeded(id, params, self.rng_bank.next_seed())
    }

    /// Run with an explicit seed; the same seed replays the same run.
    pub fn run_methodology_seeded(
        &self,
        id: &str,
        params: &Value,
        seed: Seed,
    ) -> EngineResult<ExecutionResult> {
        let run = self.prepare(id, params)?;
        let outcome = self.executor.execute(
            &run.methodology.calculation_routine,
            run.params,
            seed,
            &CancelToken::new(),
        );
        finish(&run.methodology, seed, outcome)
    }

    /// Start a run on its own thread. Lookup and parameter binding
    /// happen before this returns.
    pub fn spawn_run(&self, id: &str, params: &Value) -> EngineResult<RunHandle> {
        let run = self.prepare(id, params)?;
        let seed = self.rng_bank.next_seed();
        let cancel = CancelToken::new();
        let executor = self.executor.clone();
        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name("quant-run".into())
            .spawn(move || {
                let outcome = executor.execute(
                    &run.methodology.calculation_routine,
                    run.params,
                    seed,
                    &token,
                );
                finish(&run.methodology, seed, outcome).map_err(|e| match e {
                    EngineError::Execution(e) => e,
                    other => ExecutionError::RuntimeFault(other.to_string()),
                })
            })
            .map_err(|e| ExecutionError::RuntimeFault(format!("cannot start run thread: {e}")))?;
        Ok(RunHandle {
            methodology_id: id.to_string(),
            seed,
            cancel,
            handle,
        })
    }

    fn prepare(&self, id: &str, params: &Value) -> EngineResult<PreparedRun> {
        let methodology = self.registry.get(id)?;
        if !methodology.is_active {
            return Err(EngineError::Inactive(id.to_string()));
        }
        let params = methodology.bind_parameters(params)?;
        Ok(PreparedRun { methodology, params })
    }

    // ── Export / import ────────────────────────────────────────

    pub fn export_methodologies(&self) -> ExportSnapshot {
        ExportSnapshot::capture(&self.registry)
    }

    pub fn export_json(&self) -> EngineResult<String> {
        self.export_methodologies().to_json()
    }

    pub fn import_methodologies(&self, snapshot: &ExportSnapshot) -> EngineResult<ImportReport> {
        snapshot::import(&self.registry, snapshot)
    }
}

/// Interpret the sandbox outcome: only objects and numbers are results.
fn finish(
    methodology: &Methodology,
    seed: Seed,
    outcome: Result<ExecutionResult, ExecutionError>,
) -> EngineResult<ExecutionResult> {
    let outcome = outcome.and_then(|mut result| match &result.output {
        Value::Object(_) | Value::Number(_) => {
            result.methodology_id = Some(methodology.id.clone());
            Ok(result)
        }
        other => Err(ExecutionError::RuntimeFault(format!(
            "routine returned {}; expected an object or a number",
            json_type(other)
        ))),
    });
    match outcome {
        Ok(result) => {
            log::debug!(
                "engine: ran '{}' ({}) in {}ms (seed {seed})",
                methodology.name,
                methodology.id,
                result.duration_ms
            );
            Ok(result)
        }
        Err(e) => {
            match &e {
                ExecutionError::RuntimeFault(_) | ExecutionError::ResourceExceeded(_) => log::warn!(
                    "engine: run of '{}' ({}) failed (seed {seed}): {}",
                    methodology.name,
                    methodology.id,
                    e.category()
                ),
                _ => log::debug!(
                    "engine: run of '{}' ({}) rejected: {e}",
                    methodology.name,
                    methodology.id
                ),
            }
            Err(e.into())
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

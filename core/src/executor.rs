//! Sandboxed executor: runs one routine on its own worker thread.
//!
//! RULE: The host never trusts the worker to stop on its own. It waits
//! for at most the wall-clock budget plus a grace period and then
//! abandons the worker. The interpreter polls the same deadline and the
//! cancel flag, so an abandoned worker exits at its next poll.
//!
//! RULE: Each run owns its interpreter heap, its RNG stream and a copy
//! of its parameters. Nothing is shared between concurrent runs.

use crate::{
    config::ExecutionLimits,
    error::ExecutionError,
    rng::SampleRng,
    script::{interpreter, Budget, Fault, FaultKind, RunStats},
    types::{MethodologyId, Seed},
    validator,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{self, RecvTimeoutError},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

/// Holds `interpreter::MAX_EVAL_DEPTH` levels of recursion with room to spare.
const WORKER_STACK_BYTES: usize = 128 * 1024 * 1024;
const WORKER_GRACE: Duration = Duration::from_millis(250);

/// Cooperative cancellation shared between a caller and one run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Set by the engine facade; `None` for ad-hoc executions.
    pub methodology_id: Option<MethodologyId>,
    pub output: Value,
    pub duration_ms: u64,
    /// Loop-body iterations executed by the routine.
    pub iterations_run: u64,
    pub seed: Seed,
}

struct Outcome {
    result: Result<Value, Fault>,
    stats:  RunStats,
}

#[derive(Debug, Clone)]
pub struct SandboxedExecutor {
    limits: ExecutionLimits,
}

impl SandboxedExecutor {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Run `routine` with already-bound parameters. The routine is
    /// re-validated before it runs.
    pub fn execute(
        &self,
        routine: &str,
        params: Map<String, Value>,
        seed: Seed,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.limits.timeout_ms);
        let budget = Budget {
            max_steps:       self.limits.max_steps,
            max_allocations: self.limits.max_allocations,
            max_call_depth:  self.limits.max_call_depth,
            deadline:        started + timeout,
            cancel:          cancel.0.clone(),
        };

        let source = routine.to_string();
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("quant-sandbox".into())
            .stack_size(WORKER_STACK_BYTES)
            .spawn(move || {
                let outcome = run_worker(&source, &params, seed, budget);
                // The host may have given up on us already.
                let _ = tx.send(outcome);
            })
            .map_err(|e| ExecutionError::RuntimeFault(format!("cannot start sandbox worker: {e}")))?;

        let outcome = match rx.recv_timeout(timeout + WORKER_GRACE) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "sandbox: worker silent after {}ms (seed {seed}), abandoning it",
                    started.elapsed().as_millis()
                );
                return Err(ExecutionError::ResourceExceeded(format!(
                    "wall-clock time limit of {}ms exceeded",
                    self.limits.timeout_ms
                )));
            }
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("sandbox: worker terminated abnormally (seed {seed})");
                return Err(ExecutionError::RuntimeFault(
                    "sandbox worker terminated abnormally".into(),
                ));
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome.result {
            Ok(output) => {
                log::debug!(
                    "sandbox: run ok in {duration_ms}ms (seed {seed}, {} steps, {} iterations)",
                    outcome.stats.steps,
                    outcome.stats.iterations
                );
                Ok(ExecutionResult {
                    methodology_id: None,
                    output,
                    duration_ms,
                    iterations_run: outcome.stats.iterations,
                    seed,
                })
            }
            Err(fault) => {
                if matches!(fault.kind, FaultKind::Runtime | FaultKind::ResourceExceeded) {
                    log::warn!(
                        "sandbox: run faulted after {duration_ms}ms (seed {seed}, {} steps): {} | trace: [{}]",
                        outcome.stats.steps,
                        fault.message,
                        fault.trace.join(" > ")
                    );
                } else {
                    log::debug!("sandbox: run stopped (seed {seed}): {}", fault.message);
                }
                Err(into_execution_error(fault))
            }
        }
    }
}

fn run_worker(source: &str, params: &Map<String, Value>, seed: Seed, budget: Budget) -> Outcome {
    let program = match validator::analyse(source) {
        (_, Some(program)) => program,
        (report, None) => {
            return Outcome {
                result: Err(Fault {
                    kind:    FaultKind::Runtime,
                    message: format!("routine failed validation: {}", report.errors.join("; ")),
                    trace:   Vec::new(),
                }),
                stats: RunStats::default(),
            }
        }
    };
    let (result, stats) = interpreter::run(&program, params, SampleRng::new(seed), budget);
    Outcome { result, stats }
}

fn into_execution_error(fault: Fault) -> ExecutionError {
    match fault.kind {
        FaultKind::Runtime              => ExecutionError::RuntimeFault(fault.message),
        FaultKind::ResourceExceeded     => ExecutionError::ResourceExceeded(fault.message),
        FaultKind::Cancelled            => ExecutionError::Cancelled,
        FaultKind::InvalidParameter     => ExecutionError::InvalidParameter(fault.message),
        FaultKind::UnsupportedParameter => ExecutionError::UnsupportedParameter(fault.message),
    }
}

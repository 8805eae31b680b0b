use crate::{
    error::{EngineError, EngineResult},
    types::Seed,
};
use serde::{Deserialize, Serialize};

/// Deepest `max_call_depth` a config may ask for. The sandbox worker's
/// stack is sized for it.
pub const MAX_CALL_DEPTH: usize = 1_000;

/// Ceilings applied to every sandboxed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Wall-clock budget per run.
    pub timeout_ms: u64,
    /// Statement and expression evaluations per run.
    pub max_steps: u64,
    /// Array elements, object fields and string bytes / 16.
    pub max_allocations: u64,
    pub max_call_depth: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout_ms:      5_000,
            max_steps:       50_000_000,
            max_allocations: 5_000_000,
            max_call_depth:  200,
        }
    }
}

impl ExecutionLimits {
    /// Reject limits a run cannot honour.
    pub fn check(&self) -> EngineResult<()> {
        if self.timeout_ms == 0 {
            return Err(EngineError::Config("limits.timeout_ms must be positive".into()));
        }
        if self.max_steps == 0 || self.max_allocations == 0 || self.max_call_depth == 0 {
            return Err(EngineError::Config(
                "limits.max_steps, max_allocations and max_call_depth must be positive".into(),
            ));
        }
        if self.max_call_depth > MAX_CALL_DEPTH {
            return Err(EngineError::Config(format!(
                "limits.max_call_depth must not exceed {MAX_CALL_DEPTH}, got {}",
                self.max_call_depth
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Master seed for the engine's RngBank.
    pub master_seed: Seed,
    pub limits: ExecutionLimits,
    /// Create the built-in methodologies on startup if absent.
    pub install_builtins: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            master_seed:      0x5eed_0f_5eed,
            limits:           ExecutionLimits::default(),
            install_builtins: true,
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &str) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Cannot read {path}: {e}")))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Cannot parse {path}: {e}")))?;
        config.limits.check()?;
        log::info!(
            "config: loaded {path} (seed {}, timeout {}ms)",
            config.master_seed,
            config.limits.timeout_ms
        );
        Ok(config)
    }

    /// Config for tests: fixed seed, tighter limits, no built-ins.
    pub fn default_test() -> Self {
        Self {
            master_seed: 42,
            limits: ExecutionLimits {
                timeout_ms:      10_000,
                max_steps:       10_000_000,
                max_allocations: 2_000_000,
                max_call_depth:  64,
            },
            install_builtins: false,
        }
    }
}

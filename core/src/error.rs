use thiserror::Error;

/// Failures of the descriptive-statistics primitives.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("Insufficient data: need at least {needed} samples, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("Invalid probability {0}: must lie in [0, 1]")]
    InvalidProbability(f64),
}

/// Failures of the native methodology algorithms.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlgorithmError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported parameter: {0}")]
    UnsupportedParameter(String),

    #[error(transparent)]
    Stats(#[from] StatsError),
}

/// Failures of a single sandboxed run. Every variant is a failed run;
/// no partial result ever accompanies one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Runtime fault: {0}")]
    RuntimeFault(String),

    #[error("Resource exceeded: {0}")]
    ResourceExceeded(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported parameter: {0}")]
    UnsupportedParameter(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl ExecutionError {
    /// Stable category name, used in logs and by callers that only
    /// report the kind of failure.
    pub fn category(&self) -> &'static str {
        match self {
            Self::RuntimeFault(_)         => "runtime_fault",
            Self::ResourceExceeded(_)     => "resource_exceeded",
            Self::InvalidParameter(_)     => "invalid_parameter",
            Self::UnsupportedParameter(_) => "unsupported_parameter",
            Self::Cancelled               => "cancelled",
        }
    }
}

impl From<AlgorithmError> for ExecutionError {
    fn from(err: AlgorithmError) -> Self {
        match err {
            AlgorithmError::InvalidParameter(msg)     => Self::InvalidParameter(msg),
            AlgorithmError::UnsupportedParameter(msg) => Self::UnsupportedParameter(msg),
            AlgorithmError::Stats(e)                  => Self::InvalidParameter(e.to_string()),
        }
    }
}

impl From<StatsError> for ExecutionError {
    fn from(err: StatsError) -> Self {
        Self::InvalidParameter(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Routine failed validation: {}", errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("Invalid parameter schema: {0}")]
    InvalidSchema(String),

    #[error("A methodology named '{0}' already exists")]
    DuplicateName(String),

    #[error("A methodology with id '{0}' already exists")]
    DuplicateId(String),

    #[error("Methodology '{0}' not found")]
    NotFound(String),

    #[error("Methodology '{0}' is inactive")]
    Inactive(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Unsupported snapshot schema version {0}")]
    UnsupportedSnapshot(u32),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

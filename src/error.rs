use thiserror::Error;

/// Convenience type alias for Results with SpiralError
pub type Result<T> = std::result::Result<T, SpiralError>;

/// Main error type for the coordination engine.
///
/// Variants are grouped loosely by the five error kinds the supervisor loop
/// distinguishes: transient, recoverable-agent, quality-gate, validation, and
/// configuration. The supervisor matches on these groups to decide whether to
/// retry, intervene, raise a blocker, or fail fast.
#[derive(Error, Debug)]
pub enum SpiralError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Circular dependencies detected: {0}")]
    CycleDetected(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Blocker not found: {0}")]
    BlockerNotFound(String),

    #[error("Agent definition invalid: {0}")]
    InvalidAgentDefinition(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Task execution error: {task_id} - {message}")]
    TaskExecution { task_id: String, message: String },

    #[error("Transient error: {message}")]
    Transient { message: String },

    #[error("Timeout error: {message}")]
    Timeout { message: String },

    #[error("LLM authentication failed: {0}")]
    Authentication(String),

    #[error("LLM rate limit exceeded{}", retry_after.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimit { retry_after: Option<u64> },

    #[error("LLM connection error: {0}")]
    Connection(String),

    #[error("Quality gate failed: {0}")]
    QualityGate(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Queue is full")]
    QueueFull,

    #[error("Not found: {0}")]
    NotFound(String),
}

impl SpiralError {
    /// True for errors the supervisor should retry with backoff (error kind 1).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SpiralError::Transient { .. }
                | SpiralError::Timeout { .. }
                | SpiralError::RateLimit { .. }
                | SpiralError::Connection(_)
        )
    }

    /// True for configuration errors (error kind 5): these fail fast at
    /// startup rather than being retried or turned into a blocker.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SpiralError::Config(_)
                | SpiralError::ConfigurationError(_)
                | SpiralError::UnknownAgent(_)
                | SpiralError::InvalidAgentDefinition(_)
        )
    }
}

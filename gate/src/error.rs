//! Error types for the admission gate

use thiserror::Error;

/// Result type alias for gate operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Error types for swarm consensus and admission
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Swarm not ready: {registered} instances registered, {required} required")]
    NotReady { registered: usize, required: usize },

    #[error("Swarm at capacity: maximum of {max} instances")]
    CapacityExceeded { max: usize },

    #[error("Invalid weight for instance {instance}: {weight}")]
    InvalidWeight { instance: String, weight: f64 },

    #[error("Evaluation error: {message}")]
    Evaluation { message: String },

    #[error("Unknown opportunity: {0}")]
    UnknownOpportunity(String),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Risk error: {0}")]
    Risk(#[from] aegis_risk::RiskError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Create an evaluation error
    pub fn evaluation<S: Into<String>>(message: S) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error is a violated precondition the caller can fix
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            GateError::NotReady { .. }
                | GateError::CapacityExceeded { .. }
                | GateError::InvalidWeight { .. }
                | GateError::UnknownOpportunity(_)
        )
    }

    /// Get the error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            GateError::NotReady { .. } => "precondition",
            GateError::CapacityExceeded { .. } => "precondition",
            GateError::InvalidWeight { .. } => "validation",
            GateError::Evaluation { .. } => "evaluation",
            GateError::UnknownOpportunity(_) => "precondition",
            GateError::InvalidConfig { .. } => "config",
            GateError::Config(_) => "config",
            GateError::Risk(e) => e.category(),
            GateError::Serialization(_) => "serialization",
            GateError::Yaml(_) => "serialization",
            GateError::Io(_) => "io",
            GateError::Internal(_) => "internal",
        }
    }
}

//! Error types for the risk module

use thiserror::Error;

/// Result type alias for risk operations
pub type Result<T> = std::result::Result<T, RiskError>;

/// Error types for risk scoring, calibration and threshold management
#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Invalid weight for factor {factor}: {weight}")]
    InvalidWeight { factor: String, weight: f64 },

    #[error("Invalid threshold definition: {message}")]
    InvalidThreshold { message: String },

    #[error("Invalid severity: {0}")]
    InvalidSeverity(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Invalid risk level: {0}")]
    InvalidRiskLevel(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RiskError {
    /// Create a new invalid weight error
    pub fn invalid_weight<S: Into<String>>(factor: S, weight: f64) -> Self {
        Self::InvalidWeight {
            factor: factor.into(),
            weight,
        }
    }

    /// Create a new invalid threshold error
    pub fn invalid_threshold<S: Into<String>>(message: S) -> Self {
        Self::InvalidThreshold {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            RiskError::InvalidWeight { .. } => "validation",
            RiskError::InvalidThreshold { .. } => "validation",
            RiskError::InvalidSeverity(_) => "validation",
            RiskError::InvalidOperator(_) => "validation",
            RiskError::InvalidRiskLevel(_) => "validation",
            RiskError::Serialization(_) => "serialization",
            RiskError::Internal(_) => "internal",
        }
    }
}

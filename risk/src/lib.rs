//! # Aegis Risk
//!
//! The risk half of the admission gate: scores opportunities against weighted
//! risk factors, measures how well those scores predicted realized outcomes,
//! and watches operational metrics through static or self-adapting
//! thresholds.
//!
//! Nothing in this crate performs I/O, blocks or retries. Every component is
//! constructed explicitly and can be shared behind an `Arc`.

pub mod assessor;
pub mod calibrator;
pub mod error;
pub mod thresholds;
pub mod types;

// Re-export commonly used types
pub use assessor::RiskAssessor;
pub use calibrator::{
    Calibration, CalibrationDataPoint, CalibrationMetrics, CalibrationResult, CalibratorConfig,
    OutcomeLabel, RiskCalibrator,
};
pub use error::{Result, RiskError};
pub use thresholds::{
    DynamicThresholdConfig, Severity, Threshold, ThresholdManager, ThresholdManagerConfig,
    ThresholdOperator, ThresholdSnapshot, ThresholdSpec, ThresholdViolation, ViolationStats,
    ViolationTrend,
};
pub use types::*;

/// Current version of the risk crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Discrete risk classification derived from an overall score in [0, 1]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Classify a score using fixed 0.2-wide bands. NaN is `Critical`.
    pub fn from_score(score: f64) -> Self {
        if score.is_nan() || score >= 0.8 {
            RiskLevel::Critical
        } else if score >= 0.6 {
            RiskLevel::High
        } else if score >= 0.4 {
            RiskLevel::Medium
        } else if score >= 0.2 {
            RiskLevel::Low
        } else {
            RiskLevel::Minimal
        }
    }

    /// Get the level as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Minimal => "MINIMAL",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "minimal" => Ok(RiskLevel::Minimal),
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            _ => Err(RiskError::InvalidRiskLevel(s.to_string())),
        }
    }
}

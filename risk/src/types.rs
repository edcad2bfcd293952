//! Core data types for risk scoring

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::RiskLevel;

/// Risk factor categories
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorCategory {
    Operational,
    Technical,
    Compliance,
    Market,
    Liquidity,
    Execution,
    Other(String),
}

impl FactorCategory {
    /// Get the category name
    pub fn name(&self) -> &str {
        match self {
            FactorCategory::Operational => "operational",
            FactorCategory::Technical => "technical",
            FactorCategory::Compliance => "compliance",
            FactorCategory::Market => "market",
            FactorCategory::Liquidity => "liquidity",
            FactorCategory::Execution => "execution",
            FactorCategory::Other(name) => name,
        }
    }
}

impl std::fmt::Display for FactorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A registered risk factor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    /// Generated identifier
    pub id: Uuid,

    /// Human-readable name (unique within an assessor)
    pub name: String,

    /// Factor category
    pub category: FactorCategory,

    /// Relative weight, non-negative
    pub weight: f64,

    /// Optional per-factor alert level for the normalized value
    pub threshold: Option<f64>,

    /// Latest value pushed by a sensor
    pub current_value: Option<f64>,

    /// Registration timestamp
    pub registered_at: DateTime<Utc>,

    /// Last time `current_value` changed
    pub updated_at: Option<DateTime<Utc>>,
}

/// Contribution of a single factor to an assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorContribution {
    pub factor_id: Uuid,
    pub name: String,

    /// Value as supplied, before clamping
    pub value: f64,

    /// weight × clamp(value, 0, 1)
    pub contribution: f64,

    /// Supplied value exceeded the factor's own threshold
    pub breached: bool,
}

/// Result of scoring a target against the registered factors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub target_id: String,
    pub target_type: String,
    pub timestamp: DateTime<Utc>,

    /// Contributions in the order the values were supplied
    pub factors: Vec<FactorContribution>,

    /// Weighted score in [0, 1]
    pub overall_risk_score: f64,

    pub risk_level: RiskLevel,
}

impl RiskAssessment {
    /// Factors whose supplied value exceeded their own threshold
    pub fn breached_factors(&self) -> Vec<&FactorContribution> {
        self.factors.iter().filter(|f| f.breached).collect()
    }

    /// Check whether the assessment is at or above the given level
    pub fn is_at_least(&self, level: RiskLevel) -> bool {
        self.risk_level >= level
    }
}

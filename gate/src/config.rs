//! Configuration management for the admission gate
//!
//! Loads from a YAML file, from layered `config/aegis*` files plus `AEGIS__*`
//! environment variables, or falls back to defaults.

use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use aegis_risk::{
    CalibratorConfig, FactorCategory, RiskLevel, Severity, ThresholdManagerConfig,
    ThresholdOperator,
};

use crate::error::{GateError, Result};

/// Gate configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GateConfig {
    /// Swarm consensus settings
    pub swarm: SwarmConfig,

    /// Risk pre-gate and calibration settings
    pub risk: RiskGateConfig,

    /// Threshold monitoring settings
    pub thresholds: ThresholdsConfig,

    /// Receipt tracking and retention
    pub feedback: FeedbackConfig,

    /// Warden roster built at startup
    pub evaluators: Vec<WardenProfile>,
}

/// Swarm consensus configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Instances required before evaluation is allowed
    pub min_instances: usize,

    /// Registration beyond this count is refused
    pub max_instances: usize,

    /// Minimum weighted approval rate to execute
    pub consensus_threshold: f64,

    /// Per-warden voting window in milliseconds
    pub voting_timeout_ms: u64,

    /// Let an ethics-specialized reject override the quorum
    pub enable_ethics_veto: bool,

    /// Decisions retained for audit
    pub decision_history_size: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            min_instances: 3,
            max_instances: 10,
            consensus_threshold: 0.7,
            voting_timeout_ms: 5000,
            enable_ethics_veto: true,
            decision_history_size: 1000,
        }
    }
}

impl SwarmConfig {
    /// Validate the swarm settings
    pub fn validate(&self) -> Result<()> {
        if self.min_instances == 0 {
            return Err(GateError::invalid_config("min_instances must be greater than 0"));
        }
        if self.max_instances < self.min_instances {
            return Err(GateError::invalid_config(format!(
                "max_instances ({}) must be >= min_instances ({})",
                self.max_instances, self.min_instances
            )));
        }
        if !(self.consensus_threshold > 0.0 && self.consensus_threshold <= 1.0) {
            return Err(GateError::invalid_config(format!(
                "consensus_threshold must be in (0, 1], got {}",
                self.consensus_threshold
            )));
        }
        if self.voting_timeout_ms == 0 {
            return Err(GateError::invalid_config("voting_timeout_ms must be greater than 0"));
        }
        Ok(())
    }
}

/// Feedback retention configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Pending and settled entries older than this are purged
    pub retention_secs: u64,

    /// How often the purge runs
    pub cleanup_interval_secs: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            retention_secs: 3600,
            cleanup_interval_secs: 60,
        }
    }
}

impl FeedbackConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_secs.min(i64::MAX as u64) as i64)
    }

    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Risk pre-gate configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RiskGateConfig {
    /// Highest risk level admitted to the swarm vote
    pub max_admissible_level: RiskLevel,

    /// Factors registered at startup
    pub factors: Vec<FactorDefinition>,

    /// Calibration log settings
    pub calibrator: CalibratorConfig,
}

impl Default for RiskGateConfig {
    fn default() -> Self {
        Self {
            max_admissible_level: RiskLevel::High,
            factors: vec![
                FactorDefinition::new("gas_volatility", FactorCategory::Execution, 1.0, Some(0.8)),
                FactorDefinition::new("mempool_congestion", FactorCategory::Market, 1.5, Some(0.7)),
                FactorDefinition::new("liquidity_depth", FactorCategory::Liquidity, 2.0, None),
                FactorDefinition::new("searcher_density", FactorCategory::Market, 1.0, None),
            ],
            calibrator: CalibratorConfig::default(),
        }
    }
}

/// A risk factor registered at startup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FactorDefinition {
    pub name: String,
    pub category: FactorCategory,
    pub weight: f64,
    pub threshold: Option<f64>,
}

impl FactorDefinition {
    pub fn new(name: &str, category: FactorCategory, weight: f64, threshold: Option<f64>) -> Self {
        Self {
            name: name.to_string(),
            category,
            weight,
            threshold,
        }
    }
}

/// Threshold monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub manager: ThresholdManagerConfig,

    /// Thresholds defined at startup
    pub rules: Vec<ThresholdRule>,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            manager: ThresholdManagerConfig::default(),
            rules: vec![
                ThresholdRule {
                    name: "execution_latency".to_string(),
                    metric: crate::feedback::METRIC_EXECUTION_LATENCY.to_string(),
                    value: 2000.0,
                    operator: ThresholdOperator::Gt,
                    upper_bound: None,
                    severity: Severity::Warning,
                    cooldown_secs: 60,
                    dynamic: true,
                },
                ThresholdRule {
                    name: "realized_loss".to_string(),
                    metric: crate::feedback::METRIC_REALIZED_PNL.to_string(),
                    value: 0.0,
                    operator: ThresholdOperator::Lt,
                    upper_bound: None,
                    severity: Severity::Critical,
                    cooldown_secs: 300,
                    dynamic: false,
                },
            ],
        }
    }
}

/// A threshold defined at startup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThresholdRule {
    pub name: String,
    pub metric: String,
    pub value: f64,
    #[serde(default = "default_operator")]
    pub operator: ThresholdOperator,
    #[serde(default)]
    pub upper_bound: Option<f64>,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Adapt the value to the metric's history
    #[serde(default)]
    pub dynamic: bool,
}

fn default_operator() -> ThresholdOperator {
    ThresholdOperator::Gt
}

fn default_severity() -> Severity {
    Severity::Warning
}

fn default_cooldown_secs() -> u64 {
    60
}

/// A warden in the startup roster
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WardenProfile {
    pub id: String,
    pub weight: f64,
    #[serde(default)]
    pub specialization: Option<String>,
    pub evaluator: EvaluatorKind,
}

/// Bundled evaluator kinds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluatorKind {
    RiskWeighted {
        max_risk: f64,
    },
    Profitability {
        min_expected_value: f64,
        target_expected_value: f64,
    },
    Ethics {
        denied_types: Vec<String>,
        denied_flags: Vec<String>,
    },
    Urgency {
        min_headroom_ms: u64,
    },
}

impl GateConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load layered configuration: `config/aegis`, `config/aegis-{ENVIRONMENT}`,
    /// `config/aegis-local`, then `AEGIS__*` environment variables
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/aegis").required(false))
            .add_source(
                File::with_name(&format!(
                    "config/aegis-{}",
                    std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into())
                ))
                .required(false),
            )
            .add_source(File::with_name("config/aegis-local").required(false))
            .add_source(Environment::with_prefix("AEGIS").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load from `AEGIS_CONFIG_PATH` if set, otherwise from the layered sources
    pub fn from_env_and_file() -> Result<Self> {
        if let Ok(config_path) = std::env::var("AEGIS_CONFIG_PATH") {
            tracing::info!("Loading gate config from: {}", config_path);
            return Self::from_file(config_path);
        }
        Self::load()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.swarm.validate()?;

        if self.risk.calibrator.min_data_points == 0 {
            return Err(GateError::invalid_config(
                "calibrator.min_data_points must be greater than 0",
            ));
        }

        for factor in &self.risk.factors {
            if !factor.weight.is_finite() || factor.weight < 0.0 {
                return Err(GateError::invalid_config(format!(
                    "factor {} has invalid weight {}",
                    factor.name, factor.weight
                )));
            }
        }

        for rule in &self.thresholds.rules {
            if rule.operator == ThresholdOperator::Between && rule.upper_bound.is_none() {
                return Err(GateError::invalid_config(format!(
                    "threshold {} uses BETWEEN without upper_bound",
                    rule.name
                )));
            }
        }

        if self.feedback.cleanup_interval_secs == 0 {
            return Err(GateError::invalid_config(
                "feedback.cleanup_interval_secs must be greater than 0",
            ));
        }

        if self.evaluators.len() > self.swarm.max_instances {
            return Err(GateError::invalid_config(format!(
                "{} evaluators configured but max_instances is {}",
                self.evaluators.len(),
                self.swarm.max_instances
            )));
        }

        for profile in &self.evaluators {
            if !profile.weight.is_finite() || profile.weight <= 0.0 {
                return Err(GateError::invalid_config(format!(
                    "evaluator {} has invalid weight {}",
                    profile.id, profile.weight
                )));
            }
        }

        Ok(())
    }

    /// Default roster: one warden of every bundled kind
    pub fn default_roster() -> Vec<WardenProfile> {
        vec![
            WardenProfile {
                id: "risk-warden".to_string(),
                weight: 2.0,
                specialization: Some("risk".to_string()),
                evaluator: EvaluatorKind::RiskWeighted { max_risk: 0.6 },
            },
            WardenProfile {
                id: "profit-warden".to_string(),
                weight: 1.5,
                specialization: Some("profitability".to_string()),
                evaluator: EvaluatorKind::Profitability {
                    min_expected_value: 50.0,
                    target_expected_value: 1000.0,
                },
            },
            WardenProfile {
                id: "ethics-warden".to_string(),
                weight: 1.0,
                specialization: Some(crate::types::ETHICS_SPECIALIZATION.to_string()),
                evaluator: EvaluatorKind::Ethics {
                    denied_types: vec!["sandwich".to_string(), "frontrun".to_string()],
                    denied_flags: vec![
                        "targets_retail".to_string(),
                        "sanctioned_counterparty".to_string(),
                    ],
                },
            },
            WardenProfile {
                id: "urgency-warden".to_string(),
                weight: 1.0,
                specialization: Some("timing".to_string()),
                evaluator: EvaluatorKind::Urgency {
                    min_headroom_ms: 2000,
                },
            },
        ]
    }

    /// Defaults with the default roster filled in
    pub fn with_default_roster() -> Self {
        Self {
            evaluators: Self::default_roster(),
            ..Self::default()
        }
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}

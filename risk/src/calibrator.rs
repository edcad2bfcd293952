//! Risk calibration against realized outcomes
//!
//! Closes the loop between predicted risk and what actually happened after
//! execution. Data points go into a bounded rolling log; calibration is
//! recomputed on demand from that log.
//!
//! Recording convention: `record_data_point(realized_outcome, predicted_risk, ..)`.
//! `bias = mean(predicted - realized)`, so a positive bias means risk is
//! systematically over-predicted.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, warn};

/// Outcome label reported by the execution engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeLabel {
    Success,
    Partial,
    Failure,
}

impl OutcomeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeLabel::Success => "SUCCESS",
            OutcomeLabel::Partial => "PARTIAL",
            OutcomeLabel::Failure => "FAILURE",
        }
    }
}

/// A single prediction/outcome pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationDataPoint {
    pub predicted_risk: f64,
    pub realized_outcome: f64,
    pub outcome_label: OutcomeLabel,
    pub context: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Calibration statistics over the retained log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// 1 - mean absolute error, in [0, 1]
    pub accuracy: f64,

    /// mean(predicted - realized)
    pub bias: f64,

    pub data_points: usize,
}

/// Outcome of [`RiskCalibrator::calibrate`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Calibration {
    /// Too few data points for the statistics to mean anything
    Insufficient { data_points: usize, required: usize },
    Calibrated(CalibrationResult),
}

impl Calibration {
    /// Check if the calibration is backed by enough data
    pub fn is_reliable(&self) -> bool {
        matches!(self, Calibration::Calibrated(_))
    }

    /// Get the result, if reliable
    pub fn result(&self) -> Option<&CalibrationResult> {
        match self {
            Calibration::Calibrated(result) => Some(result),
            Calibration::Insufficient { .. } => None,
        }
    }
}

/// Lightweight view of the log, available before calibration is reliable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationMetrics {
    pub data_points: usize,
    pub bias: f64,
    pub by_label: HashMap<OutcomeLabel, usize>,
}

/// Calibrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibratorConfig {
    /// Minimum data points before `calibrate` reports statistics
    pub min_data_points: usize,

    /// Rolling window size; oldest points are evicted first
    pub max_data_points: usize,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self {
            min_data_points: 10,
            max_data_points: 1000,
        }
    }
}

/// Risk calibrator owning the data point log
pub struct RiskCalibrator {
    config: CalibratorConfig,
    log: RwLock<VecDeque<CalibrationDataPoint>>,
}

impl RiskCalibrator {
    /// Create a calibrator with the given configuration
    pub fn new(config: CalibratorConfig) -> Self {
        Self {
            log: RwLock::new(VecDeque::with_capacity(config.max_data_points.min(4096))),
            config,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &CalibratorConfig {
        &self.config
    }

    /// Append a prediction/outcome pair.
    ///
    /// Values are clamped to [0, 1]; a pair with a non-finite value is
    /// dropped with a warning.
    pub fn record_data_point(
        &self,
        realized_outcome: f64,
        predicted_risk: f64,
        outcome_label: OutcomeLabel,
        context: HashMap<String, serde_json::Value>,
    ) {
        if !realized_outcome.is_finite() || !predicted_risk.is_finite() {
            warn!(
                realized_outcome,
                predicted_risk, "Dropping calibration data point with non-finite value"
            );
            return;
        }

        let point = CalibrationDataPoint {
            predicted_risk: predicted_risk.clamp(0.0, 1.0),
            realized_outcome: realized_outcome.clamp(0.0, 1.0),
            outcome_label,
            context,
            timestamp: Utc::now(),
        };

        let mut log = self.log.write();
        log.push_back(point);
        while log.len() > self.config.max_data_points.max(1) {
            log.pop_front();
        }
        let len = log.len();
        drop(log);

        debug!(
            label = outcome_label.as_str(),
            data_points = len,
            "Recorded calibration data point"
        );
        metrics::counter!("aegis_calibration_points_total", 1, "label" => outcome_label.as_str());
    }

    /// Compute accuracy and bias over the retained log
    pub fn calibrate(&self) -> Calibration {
        let log = self.log.read();
        let data_points = log.len();
        let required = self.config.min_data_points.max(1);

        if data_points < required {
            return Calibration::Insufficient {
                data_points,
                required,
            };
        }

        let errors: Vec<f64> = log
            .iter()
            .map(|p| p.predicted_risk - p.realized_outcome)
            .collect();
        drop(log);

        let bias = errors.iter().mean();
        let mean_abs_error = errors.iter().map(|e| e.abs()).mean();
        let accuracy = (1.0 - mean_abs_error).clamp(0.0, 1.0);

        metrics::gauge!("aegis_calibration_accuracy", accuracy);
        metrics::gauge!("aegis_calibration_bias", bias);

        Calibration::Calibrated(CalibrationResult {
            accuracy,
            bias,
            data_points,
        })
    }

    /// Data point count and bias, regardless of the minimum
    pub fn get_metrics(&self) -> CalibrationMetrics {
        let log = self.log.read();
        let bias = if log.is_empty() {
            0.0
        } else {
            log.iter()
                .map(|p| p.predicted_risk - p.realized_outcome)
                .mean()
        };

        let mut by_label = HashMap::new();
        for point in log.iter() {
            *by_label.entry(point.outcome_label).or_insert(0) += 1;
        }

        CalibrationMetrics {
            data_points: log.len(),
            bias,
            by_label,
        }
    }

    /// Bias-corrected risk, once calibration is reliable
    pub fn adjust(&self, predicted_risk: f64) -> f64 {
        match self.calibrate() {
            Calibration::Calibrated(result) => (predicted_risk - result.bias).clamp(0.0, 1.0),
            Calibration::Insufficient { .. } => predicted_risk,
        }
    }

    /// Most recent data points, newest first
    pub fn recent(&self, limit: usize) -> Vec<CalibrationDataPoint> {
        self.log.read().iter().rev().take(limit).cloned().collect()
    }

    /// Number of retained data points
    pub fn len(&self) -> usize {
        self.log.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.read().is_empty()
    }

    /// Drop every data point
    pub fn reset(&self) {
        self.log.write().clear();
    }
}

impl Default for RiskCalibrator {
    fn default() -> Self {
        Self::new(CalibratorConfig::default())
    }
}

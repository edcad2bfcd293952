//! Execution feedback
//!
//! Closes the loop after the execution engine acts on an admitted
//! opportunity. Each receipt is turned into a realized outcome for the risk
//! calibrator and into metric samples for the threshold manager.

use std::collections::HashMap;
use std::sync::Arc;

use aegis_risk::{CalibrationMetrics, OutcomeLabel, RiskCalibrator, ThresholdManager, ThresholdViolation};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{GateError, Result};
use crate::types::SwarmOpportunity;

/// Metric fed with the execution latency of every receipt
pub const METRIC_EXECUTION_LATENCY: &str = "execution_latency_ms";

/// Metric fed with the realized profit/loss of every receipt
pub const METRIC_REALIZED_PNL: &str = "realized_pnl";

/// Metric fed with |predicted risk - realized outcome|
pub const METRIC_PREDICTION_ERROR: &str = "prediction_error";

/// Execution receipt from the execution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    /// Opportunity that was executed
    pub opportunity_id: String,

    /// Whether execution landed
    pub success: bool,

    /// Realized profit/loss in USD
    pub realized_pnl_usd: f64,

    /// Time from admission to settlement
    pub execution_latency_ms: f64,

    pub completed_at: DateTime<Utc>,

    /// Error message if failed
    #[serde(default)]
    pub error_message: Option<String>,
}

/// An admitted opportunity awaiting its receipt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedDecision {
    pub opportunity_id: String,
    pub opportunity_type: String,
    pub expected_value: f64,

    /// Risk assessor score at admission, absent when no factor contributed
    pub assessed_risk: Option<f64>,

    /// The detector's own risk estimate carried on the opportunity
    pub detector_risk: f64,

    pub registered_at: DateTime<Utc>,
}

impl TrackedDecision {
    /// Risk predicted at admission: the assessor score when there was one
    pub fn predicted_risk(&self) -> f64 {
        self.assessed_risk.unwrap_or(self.detector_risk)
    }
}

/// A receipt matched to its decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettledExecution {
    pub decision: TrackedDecision,
    pub receipt: ExecutionReceipt,
    pub label: OutcomeLabel,

    /// 0.0 for a clean success, 1.0 for a failure
    pub realized_outcome: f64,
}

impl SettledExecution {
    pub fn prediction_error(&self) -> f64 {
        (self.decision.predicted_risk() - self.realized_outcome).abs()
    }
}

/// Result of processing one receipt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackOutcome {
    pub settled: SettledExecution,

    /// Violations raised by the receipt's metric samples
    pub violations: Vec<ThresholdViolation>,
}

/// Gate performance as seen through execution feedback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackPerformance {
    /// Admitted opportunities still awaiting a receipt
    pub pending: usize,

    pub settled: usize,
    pub successful: usize,
    pub partial: usize,
    pub failed: usize,

    /// Landed executions / settled executions
    pub hit_rate: f64,

    pub avg_prediction_error: f64,
    pub total_realized_pnl_usd: f64,

    /// Risk assessor calibration
    pub calibration: CalibrationMetrics,

    /// Detector risk calibration, when tracked
    pub detector_calibration: Option<CalibrationMetrics>,
}

/// Label a receipt and derive its realized outcome.
///
/// A failed execution is `Failure` (1.0). A landed execution short of the
/// expected value is `Partial`, scored by the shortfall ratio. Anything else
/// is `Success` (0.0).
pub fn classify_receipt(expected_value: f64, receipt: &ExecutionReceipt) -> (OutcomeLabel, f64) {
    if !receipt.success {
        return (OutcomeLabel::Failure, 1.0);
    }

    if expected_value > 0.0 && receipt.realized_pnl_usd < expected_value {
        let shortfall = (expected_value - receipt.realized_pnl_usd) / expected_value;
        return (OutcomeLabel::Partial, shortfall.clamp(0.0, 1.0));
    }

    (OutcomeLabel::Success, 0.0)
}

/// Feedback processor feeding receipts into calibration and thresholds
pub struct FeedbackProcessor {
    /// Calibrates the risk assessor's scores
    calibrator: Arc<RiskCalibrator>,

    /// Calibrates the detectors' `risk` estimates
    detector_calibrator: Option<Arc<RiskCalibrator>>,

    thresholds: Arc<ThresholdManager>,

    /// Admitted opportunities by id
    pending: RwLock<HashMap<String, TrackedDecision>>,

    /// Settled executions by opportunity id
    settled: RwLock<HashMap<String, SettledExecution>>,
}

impl FeedbackProcessor {
    pub fn new(calibrator: Arc<RiskCalibrator>, thresholds: Arc<ThresholdManager>) -> Self {
        Self {
            calibrator,
            detector_calibrator: None,
            thresholds,
            pending: RwLock::new(HashMap::new()),
            settled: RwLock::new(HashMap::new()),
        }
    }

    /// Also calibrate the detectors' own risk estimates, separately from
    /// the assessor's scores
    pub fn with_detector_calibrator(mut self, calibrator: Arc<RiskCalibrator>) -> Self {
        self.detector_calibrator = Some(calibrator);
        self
    }

    /// Track an admitted opportunity until its receipt arrives
    pub async fn register_decision(
        &self,
        opportunity: &SwarmOpportunity,
        assessed_risk: Option<f64>,
    ) {
        let decision = TrackedDecision {
            opportunity_id: opportunity.id.clone(),
            opportunity_type: opportunity.opportunity_type.clone(),
            expected_value: opportunity.expected_value,
            assessed_risk: assessed_risk.map(|r| r.clamp(0.0, 1.0)),
            detector_risk: opportunity.risk.clamp(0.0, 1.0),
            registered_at: Utc::now(),
        };

        self.pending
            .write()
            .await
            .insert(decision.opportunity_id.clone(), decision);
        debug!("Tracking opportunity {} for feedback", opportunity.id);
    }

    /// Match a receipt to its decision, record calibration data and feed
    /// the threshold manager. Fails for an opportunity that is not pending.
    pub async fn process_receipt(&self, receipt: ExecutionReceipt) -> Result<FeedbackOutcome> {
        let decision = self
            .pending
            .write()
            .await
            .remove(&receipt.opportunity_id)
            .ok_or_else(|| GateError::UnknownOpportunity(receipt.opportunity_id.clone()))?;

        let (label, realized_outcome) = classify_receipt(decision.expected_value, &receipt);

        let mut context = HashMap::new();
        context.insert(
            "opportunity_id".to_string(),
            serde_json::Value::String(decision.opportunity_id.clone()),
        );
        context.insert(
            "opportunity_type".to_string(),
            serde_json::Value::String(decision.opportunity_type.clone()),
        );
        context.insert(
            "realized_pnl_usd".to_string(),
            serde_json::json!(receipt.realized_pnl_usd),
        );
        if let Some(detector_calibrator) = &self.detector_calibrator {
            detector_calibrator.record_data_point(
                realized_outcome,
                decision.detector_risk,
                label,
                context.clone(),
            );
        }
        if let Some(assessed_risk) = decision.assessed_risk {
            self.calibrator
                .record_data_point(realized_outcome, assessed_risk, label, context);
        }

        let settled = SettledExecution {
            decision,
            receipt,
            label,
            realized_outcome,
        };

        let mut violations = self.thresholds.check_thresholds(
            METRIC_EXECUTION_LATENCY,
            settled.receipt.execution_latency_ms,
        );
        violations.extend(
            self.thresholds
                .check_thresholds(METRIC_REALIZED_PNL, settled.receipt.realized_pnl_usd),
        );
        violations.extend(
            self.thresholds
                .check_thresholds(METRIC_PREDICTION_ERROR, settled.prediction_error()),
        );

        match settled.label {
            OutcomeLabel::Failure => warn!(
                opportunity = %settled.decision.opportunity_id,
                error = settled.receipt.error_message.as_deref().unwrap_or("-"),
                "❌ Execution failed"
            ),
            _ => info!(
                opportunity = %settled.decision.opportunity_id,
                label = settled.label.as_str(),
                pnl = settled.receipt.realized_pnl_usd,
                predicted_risk = settled.decision.predicted_risk(),
                realized = settled.realized_outcome,
                "Processed execution receipt"
            ),
        }
        if !violations.is_empty() {
            warn!(
                "🚨 Receipt for {} raised {} threshold violation(s)",
                settled.decision.opportunity_id,
                violations.len()
            );
        }
        metrics::counter!("aegis_feedback_receipts_total", 1, "label" => settled.label.as_str());

        self.settled
            .write()
            .await
            .insert(settled.decision.opportunity_id.clone(), settled.clone());

        Ok(FeedbackOutcome {
            settled,
            violations,
        })
    }

    /// Check if an opportunity is awaiting its receipt
    pub async fn is_pending(&self, opportunity_id: &str) -> bool {
        self.pending.read().await.contains_key(opportunity_id)
    }

    pub async fn settled_execution(&self, opportunity_id: &str) -> Option<SettledExecution> {
        self.settled.read().await.get(opportunity_id).cloned()
    }

    /// Aggregate performance across settled executions
    pub async fn get_performance(&self) -> FeedbackPerformance {
        let pending = self.pending.read().await.len();
        let settled = self.settled.read().await;

        let count = |label: OutcomeLabel| settled.values().filter(|s| s.label == label).count();
        let successful = count(OutcomeLabel::Success);
        let partial = count(OutcomeLabel::Partial);
        let failed = count(OutcomeLabel::Failure);

        let total = settled.len();
        let (hit_rate, avg_prediction_error) = if total > 0 {
            (
                (successful + partial) as f64 / total as f64,
                settled.values().map(|s| s.prediction_error()).sum::<f64>() / total as f64,
            )
        } else {
            (0.0, 0.0)
        };
        let total_realized_pnl_usd = settled.values().map(|s| s.receipt.realized_pnl_usd).sum();

        FeedbackPerformance {
            pending,
            settled: total,
            successful,
            partial,
            failed,
            hit_rate,
            avg_prediction_error,
            total_realized_pnl_usd,
            calibration: self.calibrator.get_metrics(),
            detector_calibration: self.detector_calibrator.as_ref().map(|c| c.get_metrics()),
        }
    }

    /// Drop tracked and settled entries older than the retention period.
    /// Returns the number of entries removed.
    pub async fn cleanup(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - retention;

        let mut pending = self.pending.write().await;
        let mut settled = self.settled.write().await;
        let before = pending.len() + settled.len();

        pending.retain(|_, d| d.registered_at > cutoff);
        settled.retain(|_, s| s.receipt.completed_at > cutoff);

        let removed = before - pending.len() - settled.len();
        if removed > 0 {
            info!("Cleaned up {} feedback entries older than {}", removed, cutoff);
        }
        removed
    }

    /// Run [`cleanup`](Self::cleanup) every `interval` until the returned
    /// handle is aborted. The first purge happens one interval from now.
    pub fn spawn_cleanup(
        self: Arc<Self>,
        interval: std::time::Duration,
        retention: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                self.cleanup(retention).await;
            }
        })
    }
}

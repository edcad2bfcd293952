//! Risk-weighted evaluator

use std::sync::Arc;

use aegis_risk::RiskCalibrator;
use async_trait::async_trait;

use crate::error::Result;
use crate::evaluators::WardenEvaluator;
use crate::types::{SwarmOpportunity, VoteDecision};

/// Approves when the detector's risk estimate stays under a ceiling.
///
/// With a calibrator attached, the estimate is bias-corrected first so a
/// detector that systematically over- or under-predicts is judged on what
/// its estimates have actually meant. Confidence grows with the distance
/// from the ceiling.
pub struct RiskWeightedEvaluator {
    max_risk: f64,
    calibrator: Option<Arc<RiskCalibrator>>,
}

impl RiskWeightedEvaluator {
    pub fn new(max_risk: f64) -> Self {
        Self {
            max_risk: max_risk.clamp(0.0, 1.0),
            calibrator: None,
        }
    }

    /// Correct risk estimates with the calibrator's measured bias
    pub fn with_calibrator(mut self, calibrator: Arc<RiskCalibrator>) -> Self {
        self.calibrator = Some(calibrator);
        self
    }
}

#[async_trait]
impl WardenEvaluator for RiskWeightedEvaluator {
    fn name(&self) -> &str {
        "risk_weighted"
    }

    async fn evaluate(&self, opportunity: &SwarmOpportunity) -> Result<VoteDecision> {
        if !opportunity.risk.is_finite() {
            return Ok(VoteDecision::reject(1.0, "risk estimate is not a number"));
        }

        let risk = match &self.calibrator {
            Some(calibrator) => calibrator.adjust(opportunity.risk),
            None => opportunity.risk.clamp(0.0, 1.0),
        };

        if risk <= self.max_risk {
            let margin = if self.max_risk > 0.0 {
                (self.max_risk - risk) / self.max_risk
            } else {
                1.0
            };
            Ok(VoteDecision::approve(
                (0.5 + margin / 2.0).clamp(0.0, 1.0),
                format!("risk {:.2} within ceiling {:.2}", risk, self.max_risk),
            ))
        } else {
            let excess = (risk - self.max_risk) / (1.0 - self.max_risk).max(f64::EPSILON);
            Ok(VoteDecision::reject(
                (0.5 + excess / 2.0).clamp(0.0, 1.0),
                format!("risk {:.2} above ceiling {:.2}", risk, self.max_risk),
            ))
        }
    }
}

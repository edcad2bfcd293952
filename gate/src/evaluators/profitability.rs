//! Profitability evaluator

use async_trait::async_trait;

use crate::error::{GateError, Result};
use crate::evaluators::WardenEvaluator;
use crate::types::{SwarmOpportunity, VoteDecision};

/// Approves opportunities whose expected value clears a floor.
///
/// Confidence scales linearly from 0.5 at the floor to 1.0 at the target.
pub struct ProfitabilityEvaluator {
    min_expected_value: f64,
    target_expected_value: f64,
}

impl ProfitabilityEvaluator {
    pub fn new(min_expected_value: f64, target_expected_value: f64) -> Self {
        Self {
            min_expected_value,
            target_expected_value: target_expected_value.max(min_expected_value),
        }
    }
}

#[async_trait]
impl WardenEvaluator for ProfitabilityEvaluator {
    fn name(&self) -> &str {
        "profitability"
    }

    async fn evaluate(&self, opportunity: &SwarmOpportunity) -> Result<VoteDecision> {
        let value = opportunity.expected_value;
        if !value.is_finite() {
            return Err(GateError::evaluation(format!(
                "expected value of {} is not finite",
                opportunity.id
            )));
        }

        if value < self.min_expected_value {
            return Ok(VoteDecision::reject(
                0.9,
                format!(
                    "expected value ${:.2} below floor ${:.2}",
                    value, self.min_expected_value
                ),
            ));
        }

        let span = self.target_expected_value - self.min_expected_value;
        let progress = if span > 0.0 {
            ((value - self.min_expected_value) / span).clamp(0.0, 1.0)
        } else {
            1.0
        };

        Ok(VoteDecision::approve(
            0.5 + progress / 2.0,
            format!("expected value ${:.2}", value),
        ))
    }
}

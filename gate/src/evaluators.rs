//! Warden evaluators
//!
//! A warden is any async scorer that turns an opportunity into an
//! approve/reject/abstain vote. The coordinator only sees the trait; the
//! bundled evaluators below cover the default roster.

pub mod ethics;
pub mod profitability;
pub mod risk_weighted;
pub mod urgency;

use std::sync::Arc;

use aegis_risk::RiskCalibrator;
use async_trait::async_trait;

use crate::config::{EvaluatorKind, WardenProfile};
use crate::error::Result;
use crate::types::{SwarmOpportunity, VoteDecision, WardenConfig};

pub use ethics::EthicsEvaluator;
pub use profitability::ProfitabilityEvaluator;
pub use risk_weighted::RiskWeightedEvaluator;
pub use urgency::UrgencyEvaluator;

/// Trait for warden evaluators
#[async_trait]
pub trait WardenEvaluator: Send + Sync {
    /// Get the name of this evaluator
    fn name(&self) -> &str;

    /// Vote on an opportunity. An error is recorded as an abstention.
    async fn evaluate(&self, opportunity: &SwarmOpportunity) -> Result<VoteDecision>;
}

/// Build the evaluator for a configured kind. Risk-weighted evaluators are
/// bias-corrected through `calibrator` when one is given.
pub fn build_evaluator(
    kind: &EvaluatorKind,
    calibrator: Option<Arc<RiskCalibrator>>,
) -> Arc<dyn WardenEvaluator> {
    match kind {
        EvaluatorKind::RiskWeighted { max_risk } => {
            let evaluator = RiskWeightedEvaluator::new(*max_risk);
            match calibrator {
                Some(calibrator) => Arc::new(evaluator.with_calibrator(calibrator)),
                None => Arc::new(evaluator),
            }
        }
        EvaluatorKind::Profitability {
            min_expected_value,
            target_expected_value,
        } => Arc::new(ProfitabilityEvaluator::new(
            *min_expected_value,
            *target_expected_value,
        )),
        EvaluatorKind::Ethics {
            denied_types,
            denied_flags,
        } => Arc::new(EthicsEvaluator::new(
            denied_types.clone(),
            denied_flags.clone(),
        )),
        EvaluatorKind::Urgency { min_headroom_ms } => {
            Arc::new(UrgencyEvaluator::new(*min_headroom_ms))
        }
    }
}

/// Build a warden registration and its evaluator from a profile
pub fn build_warden(
    profile: &WardenProfile,
    calibrator: Option<Arc<RiskCalibrator>>,
) -> (WardenConfig, Arc<dyn WardenEvaluator>) {
    let mut config = WardenConfig::new(profile.id.clone(), profile.weight);
    config.specialization = profile.specialization.clone();
    (config, build_evaluator(&profile.evaluator, calibrator))
}

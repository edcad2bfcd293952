//! Urgency evaluator

use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;
use crate::evaluators::WardenEvaluator;
use crate::types::{SwarmOpportunity, VoteDecision};

/// Rejects opportunities that leave too little time to land on-chain.
pub struct UrgencyEvaluator {
    min_headroom_ms: u64,
}

impl UrgencyEvaluator {
    pub fn new(min_headroom_ms: u64) -> Self {
        Self { min_headroom_ms }
    }
}

#[async_trait]
impl WardenEvaluator for UrgencyEvaluator {
    fn name(&self) -> &str {
        "urgency"
    }

    async fn evaluate(&self, opportunity: &SwarmOpportunity) -> Result<VoteDecision> {
        let remaining_ms = opportunity.time_remaining(Utc::now()).num_milliseconds();

        let headroom_ms = i64::try_from(self.min_headroom_ms).unwrap_or(i64::MAX);

        if remaining_ms < headroom_ms {
            return Ok(VoteDecision::reject(
                0.9,
                format!(
                    "{}ms left, need {}ms of headroom",
                    remaining_ms.max(0),
                    self.min_headroom_ms
                ),
            ));
        }

        // Urgent opportunities with enough headroom are worth acting on now
        let urgency = opportunity.urgency.clamp(0.0, 1.0);
        Ok(VoteDecision::approve(
            0.5 + urgency / 2.0,
            format!("{}ms of headroom, urgency {:.2}", remaining_ms, urgency),
        ))
    }
}

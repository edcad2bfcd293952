//! Ethics evaluator
//!
//! Registered with the `ethics` specialization, its reject vote vetoes the
//! round regardless of the quorum.

use async_trait::async_trait;

use crate::error::Result;
use crate::evaluators::WardenEvaluator;
use crate::types::{SwarmOpportunity, VoteDecision};

/// Rejects denied opportunity types and payloads carrying a denied flag
pub struct EthicsEvaluator {
    denied_types: Vec<String>,
    denied_flags: Vec<String>,
}

impl EthicsEvaluator {
    pub fn new(denied_types: Vec<String>, denied_flags: Vec<String>) -> Self {
        Self {
            denied_types: denied_types
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect(),
            denied_flags,
        }
    }
}

#[async_trait]
impl WardenEvaluator for EthicsEvaluator {
    fn name(&self) -> &str {
        "ethics"
    }

    async fn evaluate(&self, opportunity: &SwarmOpportunity) -> Result<VoteDecision> {
        let opportunity_type = opportunity.opportunity_type.to_lowercase();
        if self.denied_types.contains(&opportunity_type) {
            return Ok(VoteDecision::reject(
                1.0,
                format!("opportunity type '{}' is denied", opportunity.opportunity_type),
            ));
        }

        if let Some(flag) = self.denied_flags.iter().find(|f| opportunity.flag(f)) {
            return Ok(VoteDecision::reject(1.0, format!("payload flagged '{}'", flag)));
        }

        Ok(VoteDecision::approve(0.8, "no ethical concerns"))
    }
}

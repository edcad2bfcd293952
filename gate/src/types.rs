//! Core types for the admission gate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Specialization that carries the ethics veto
pub const ETHICS_SPECIALIZATION: &str = "ethics";

/// Opportunity awaiting an admit/reject decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmOpportunity {
    /// Caller-assigned identifier
    pub id: String,

    /// Opportunity kind (e.g. "dex_arb", "triangle_arb")
    #[serde(rename = "type")]
    pub opportunity_type: String,

    /// Opaque detector payload
    #[serde(default)]
    pub data: serde_json::Value,

    /// Expected value in USD
    pub expected_value: f64,

    /// Detector's own risk estimate (0.0 to 1.0)
    pub risk: f64,

    /// Urgency (0.0 to 1.0)
    pub urgency: f64,

    /// Absolute deadline after which the opportunity is worthless
    pub deadline: DateTime<Utc>,
}

impl SwarmOpportunity {
    /// Check if the deadline has passed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.deadline <= now
    }

    /// Time left before the deadline, negative once expired
    pub fn time_remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.deadline - now
    }

    /// Read a boolean flag from the payload
    pub fn flag(&self, key: &str) -> bool {
        self.data
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// A warden's vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Approve,
    Reject,
    /// No usable answer (timeout, error, deadline); contributes no approval
    Abstain,
}

impl VoteChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteChoice::Approve => "approve",
            VoteChoice::Reject => "reject",
            VoteChoice::Abstain => "abstain",
        }
    }
}

/// What an evaluator returns for one opportunity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteDecision {
    pub vote: VoteChoice,

    /// Confidence in the vote (0.0 to 1.0)
    pub confidence: f64,

    pub reasoning: String,
}

impl VoteDecision {
    pub fn approve<S: Into<String>>(confidence: f64, reasoning: S) -> Self {
        Self {
            vote: VoteChoice::Approve,
            confidence,
            reasoning: reasoning.into(),
        }
    }

    pub fn reject<S: Into<String>>(confidence: f64, reasoning: S) -> Self {
        Self {
            vote: VoteChoice::Reject,
            confidence,
            reasoning: reasoning.into(),
        }
    }

    pub fn abstain<S: Into<String>>(reasoning: S) -> Self {
        Self {
            vote: VoteChoice::Abstain,
            confidence: 0.0,
            reasoning: reasoning.into(),
        }
    }
}

/// Registration parameters of a warden instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    pub id: String,

    /// Voting weight, strictly positive
    pub weight: f64,

    pub specialization: Option<String>,
}

impl WardenConfig {
    pub fn new<S: Into<String>>(id: S, weight: f64) -> Self {
        Self {
            id: id.into(),
            weight,
            specialization: None,
        }
    }

    pub fn with_specialization<S: Into<String>>(mut self, specialization: S) -> Self {
        self.specialization = Some(specialization.into());
        self
    }

    /// Check if this warden holds the ethics veto
    pub fn is_ethics(&self) -> bool {
        self.specialization.as_deref() == Some(ETHICS_SPECIALIZATION)
    }
}

/// A recorded vote within a round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenVote {
    pub instance_id: String,
    pub vote: VoteChoice,
    pub confidence: f64,
    pub reasoning: String,
    pub processing_time_ms: u64,

    /// Weight of the instance at round start
    pub weight: f64,

    pub specialization: Option<String>,
}

impl WardenVote {
    /// Check if this is an ethics rejection
    pub fn is_ethics_rejection(&self) -> bool {
        self.vote == VoteChoice::Reject
            && self.specialization.as_deref() == Some(ETHICS_SPECIALIZATION)
    }
}

/// Final swarm decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmDecision {
    Execute,
    Reject,
}

impl SwarmDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwarmDecision::Execute => "execute",
            SwarmDecision::Reject => "reject",
        }
    }
}

/// Why a round ended in rejection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Weighted approval fell short of the consensus threshold
    NoConsensus,

    /// An ethics-specialized warden voted reject
    EthicsVeto { instance_id: String },

    /// The deadline had passed before fan-out
    DeadlineExpired,
}

/// Outcome of one evaluation round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmDecisionResult {
    pub round_id: Uuid,
    pub opportunity_id: String,
    pub decision: SwarmDecision,
    pub consensus_reached: bool,

    /// approval_weight / total_weight, in [0, 1]
    pub approval_rate: f64,

    pub approval_weight: f64,
    pub total_weight: f64,

    /// One vote per instance registered at round start, in registration order
    pub votes: Vec<WardenVote>,

    pub reject_reason: Option<RejectReason>,
    pub total_processing_time_ms: u64,
    pub decided_at: DateTime<Utc>,
}

impl SwarmDecisionResult {
    /// Check if the opportunity may proceed to execution
    pub fn should_execute(&self) -> bool {
        self.decision == SwarmDecision::Execute
    }

    /// Number of abstentions in the round
    pub fn abstentions(&self) -> usize {
        self.votes
            .iter()
            .filter(|v| v.vote == VoteChoice::Abstain)
            .count()
    }

    /// Find the vote of an instance
    pub fn vote_of(&self, instance_id: &str) -> Option<&WardenVote> {
        self.votes.iter().find(|v| v.instance_id == instance_id)
    }
}

//! Swarm consensus coordinator
//!
//! Fans an opportunity out to every registered warden concurrently, waits at
//! most `voting_timeout_ms` for each, and folds the weighted votes into one
//! execute/reject decision. A warden that times out, errors or panics is
//! recorded as an abstention: zero approval, full weight in the denominator.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SwarmConfig;
use crate::error::{GateError, Result};
use crate::evaluators::WardenEvaluator;
use crate::types::{
    RejectReason, SwarmDecision, SwarmDecisionResult, SwarmOpportunity, VoteChoice, VoteDecision,
    WardenConfig, WardenVote,
};

/// Readiness of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmState {
    /// Fewer than `min_instances` registered; evaluation is refused
    Unready,
    Ready,
}

/// Running statistics across rounds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmStats {
    pub total_evaluations: u64,
    pub executed: u64,
    pub rejected: u64,
    pub consensus_reached: u64,
    pub vetoes: u64,
    pub abstentions: u64,
    pub deadline_rejections: u64,

    /// Instances snapshotted by the most recent round
    pub instance_count: usize,

    pub avg_processing_time_ms: f64,
}

/// Weighted vote totals for one round
#[derive(Debug, Clone, PartialEq)]
pub struct Tally {
    pub approval_weight: f64,
    pub total_weight: f64,
    pub approval_rate: f64,
    pub consensus_reached: bool,

    /// Ethics warden whose reject vetoed the round
    pub veto: Option<String>,
}

impl Tally {
    pub fn decision(&self) -> SwarmDecision {
        if self.consensus_reached && self.veto.is_none() {
            SwarmDecision::Execute
        } else {
            SwarmDecision::Reject
        }
    }
}

/// Fold votes into weighted totals.
///
/// Only approvals contribute `weight * confidence`; every vote contributes
/// its weight to the total. The rate is computed on weights scaled by the
/// largest one, and is 0 when the total weight is 0.
pub fn tally_votes(votes: &[WardenVote], consensus_threshold: f64, enable_ethics_veto: bool) -> Tally {
    let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
    let approval_weight: f64 = votes
        .iter()
        .filter(|v| v.vote == VoteChoice::Approve)
        .map(|v| v.weight * v.confidence)
        .sum();

    let max_weight = votes.iter().map(|v| v.weight).fold(0.0, f64::max);
    let approval_rate = if max_weight > 0.0 {
        let scaled_total: f64 = votes.iter().map(|v| v.weight / max_weight).sum();
        let scaled_approval: f64 = votes
            .iter()
            .filter(|v| v.vote == VoteChoice::Approve)
            .map(|v| v.weight / max_weight * v.confidence)
            .sum();
        let rate = scaled_approval / scaled_total;
        if rate.is_finite() {
            rate.clamp(0.0, 1.0)
        } else {
            0.0
        }
    } else {
        0.0
    };

    let veto = if enable_ethics_veto {
        votes
            .iter()
            .find(|v| v.is_ethics_rejection())
            .map(|v| v.instance_id.clone())
    } else {
        None
    };

    Tally {
        approval_weight,
        total_weight,
        approval_rate,
        consensus_reached: approval_rate >= consensus_threshold,
        veto,
    }
}

#[derive(Clone)]
struct WardenInstance {
    config: WardenConfig,
    evaluator: Arc<dyn WardenEvaluator>,
}

impl WardenInstance {
    fn abstention(&self, reasoning: &str, processing_time_ms: u64) -> WardenVote {
        self.vote(VoteDecision::abstain(reasoning), processing_time_ms)
    }

    fn vote(&self, decision: VoteDecision, processing_time_ms: u64) -> WardenVote {
        let confidence = match decision.vote {
            VoteChoice::Abstain => 0.0,
            _ if decision.confidence.is_nan() => 0.0,
            _ => decision.confidence.clamp(0.0, 1.0),
        };

        WardenVote {
            instance_id: self.config.id.clone(),
            vote: decision.vote,
            confidence,
            reasoning: decision.reasoning,
            processing_time_ms,
            weight: self.config.weight,
            specialization: self.config.specialization.clone(),
        }
    }
}

#[derive(Default)]
struct StatsAccumulator {
    stats: SwarmStats,
    total_processing_time_ms: u64,
}

/// Swarm consensus coordinator
pub struct SwarmCoordinator {
    config: SwarmConfig,

    /// Registered wardens in registration order
    instances: RwLock<Vec<WardenInstance>>,

    stats: RwLock<StatsAccumulator>,
    history: RwLock<VecDeque<SwarmDecisionResult>>,
}

impl SwarmCoordinator {
    /// Create a coordinator with no registered instances
    pub fn new(config: SwarmConfig) -> Result<Self> {
        config.validate()?;

        info!(
            "Creating swarm coordinator (min {}, max {}, threshold {:.2}, timeout {}ms)",
            config.min_instances,
            config.max_instances,
            config.consensus_threshold,
            config.voting_timeout_ms
        );

        Ok(Self {
            instances: RwLock::new(Vec::with_capacity(config.max_instances)),
            history: RwLock::new(VecDeque::with_capacity(config.decision_history_size.min(1024))),
            stats: RwLock::new(StatsAccumulator::default()),
            config,
        })
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// Register a warden. A known id is replaced in place and keeps its
    /// position in the vote order.
    pub fn register_instance(
        &self,
        config: WardenConfig,
        evaluator: Arc<dyn WardenEvaluator>,
    ) -> Result<()> {
        if !config.weight.is_finite() || config.weight <= 0.0 {
            return Err(GateError::InvalidWeight {
                instance: config.id,
                weight: config.weight,
            });
        }

        let mut instances = self.instances.write();

        if let Some(existing) = instances.iter_mut().find(|i| i.config.id == config.id) {
            debug!("Replacing warden instance {}", config.id);
            *existing = WardenInstance { config, evaluator };
            return Ok(());
        }

        if instances.len() >= self.config.max_instances {
            warn!(
                "Refusing warden {}: swarm at capacity ({})",
                config.id, self.config.max_instances
            );
            return Err(GateError::CapacityExceeded {
                max: self.config.max_instances,
            });
        }

        info!(
            instance = %config.id,
            weight = config.weight,
            specialization = config.specialization.as_deref().unwrap_or("-"),
            evaluator = evaluator.name(),
            "Registered warden instance"
        );
        instances.push(WardenInstance { config, evaluator });
        let count = instances.len();
        drop(instances);

        metrics::gauge!("aegis_swarm_instances", count as f64);
        if count == self.config.min_instances {
            info!("✅ Swarm ready with {} instances", count);
        }
        Ok(())
    }

    /// Remove a warden. Returns false if the id is unknown.
    pub fn unregister_instance(&self, id: &str) -> bool {
        let mut instances = self.instances.write();
        let Some(index) = instances.iter().position(|i| i.config.id == id) else {
            return false;
        };
        instances.remove(index);
        let count = instances.len();
        drop(instances);

        metrics::gauge!("aegis_swarm_instances", count as f64);
        if count + 1 == self.config.min_instances {
            warn!(
                "Swarm no longer ready: {} instances, {} required",
                count, self.config.min_instances
            );
        } else {
            info!("Unregistered warden instance {}", id);
        }
        true
    }

    pub fn is_ready(&self) -> bool {
        self.instance_count() >= self.config.min_instances
    }

    pub fn state(&self) -> SwarmState {
        if self.is_ready() {
            SwarmState::Ready
        } else {
            SwarmState::Unready
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    /// Registered ids in vote order
    pub fn instance_ids(&self) -> Vec<String> {
        self.instances
            .read()
            .iter()
            .map(|i| i.config.id.clone())
            .collect()
    }

    /// Run one consensus round.
    ///
    /// Fails with [`GateError::NotReady`] before invoking any evaluator when
    /// fewer than `min_instances` are registered. An opportunity already past
    /// its deadline is rejected without fan-out.
    pub async fn evaluate_opportunity(
        &self,
        opportunity: &SwarmOpportunity,
    ) -> Result<SwarmDecisionResult> {
        let started = Instant::now();
        let snapshot: Vec<WardenInstance> = self.instances.read().clone();

        if snapshot.len() < self.config.min_instances {
            metrics::counter!("aegis_swarm_refused_total", 1);
            return Err(GateError::NotReady {
                registered: snapshot.len(),
                required: self.config.min_instances,
            });
        }

        let round_id = Uuid::new_v4();

        if opportunity.is_expired_at(Utc::now()) {
            warn!(
                round = %round_id,
                opportunity = %opportunity.id,
                "Opportunity deadline already passed, rejecting without fan-out"
            );
            let votes = snapshot
                .iter()
                .map(|i| i.abstention("deadline expired", 0))
                .collect();
            let result = self.finish_round(round_id, opportunity, votes, started, true);
            return Ok(result);
        }

        debug!(
            round = %round_id,
            opportunity = %opportunity.id,
            instances = snapshot.len(),
            "Starting consensus round"
        );

        let votes = self.collect_votes(&snapshot, opportunity).await;
        Ok(self.finish_round(round_id, opportunity, votes, started, false))
    }

    /// Invoke every evaluator concurrently, each raced against the voting
    /// timeout. Votes come back in snapshot order.
    async fn collect_votes(
        &self,
        snapshot: &[WardenInstance],
        opportunity: &SwarmOpportunity,
    ) -> Vec<WardenVote> {
        let opportunity = Arc::new(opportunity.clone());
        let timeout = Duration::from_millis(self.config.voting_timeout_ms);

        let handles: Vec<_> = snapshot
            .iter()
            .map(|instance| {
                let evaluator = Arc::clone(&instance.evaluator);
                let opportunity = Arc::clone(&opportunity);
                tokio::spawn(async move {
                    let started = Instant::now();
                    let outcome = tokio::select! {
                        result = evaluator.evaluate(&opportunity) => Some(result),
                        _ = tokio::time::sleep(timeout) => None,
                    };
                    (outcome, started.elapsed().as_millis() as u64)
                })
            })
            .collect();

        let outcomes = join_all(handles).await;

        snapshot
            .iter()
            .zip(outcomes)
            .map(|(instance, joined)| match joined {
                Ok((Some(Ok(decision)), elapsed_ms)) => instance.vote(decision, elapsed_ms),
                Ok((Some(Err(e)), elapsed_ms)) => {
                    warn!("Warden {} failed to evaluate: {}", instance.config.id, e);
                    metrics::counter!("aegis_swarm_evaluator_errors_total", 1, "category" => e.category());
                    instance.abstention(&e.to_string(), elapsed_ms)
                }
                Ok((None, elapsed_ms)) => {
                    warn!(
                        "Warden {} timed out after {}ms",
                        instance.config.id, self.config.voting_timeout_ms
                    );
                    metrics::counter!("aegis_swarm_timeouts_total", 1);
                    instance.abstention("timeout", elapsed_ms)
                }
                Err(e) => {
                    warn!("Warden {} task failed: {}", instance.config.id, e);
                    instance.abstention("evaluator panicked", self.config.voting_timeout_ms)
                }
            })
            .collect()
    }

    fn finish_round(
        &self,
        round_id: Uuid,
        opportunity: &SwarmOpportunity,
        votes: Vec<WardenVote>,
        started: Instant,
        deadline_expired: bool,
    ) -> SwarmDecisionResult {
        let tally = tally_votes(
            &votes,
            self.config.consensus_threshold,
            self.config.enable_ethics_veto,
        );

        let (decision, consensus_reached, reject_reason) = if deadline_expired {
            (SwarmDecision::Reject, false, Some(RejectReason::DeadlineExpired))
        } else {
            let reason = match (&tally.veto, tally.consensus_reached) {
                (Some(instance_id), _) => Some(RejectReason::EthicsVeto {
                    instance_id: instance_id.clone(),
                }),
                (None, false) => Some(RejectReason::NoConsensus),
                (None, true) => None,
            };
            (tally.decision(), tally.consensus_reached, reason)
        };

        let result = SwarmDecisionResult {
            round_id,
            opportunity_id: opportunity.id.clone(),
            decision,
            consensus_reached,
            approval_rate: if deadline_expired { 0.0 } else { tally.approval_rate },
            approval_weight: if deadline_expired { 0.0 } else { tally.approval_weight },
            total_weight: tally.total_weight,
            votes,
            reject_reason,
            total_processing_time_ms: started.elapsed().as_millis() as u64,
            decided_at: Utc::now(),
        };

        self.record(&result);
        self.log_decision(&result);
        result
    }

    fn record(&self, result: &SwarmDecisionResult) {
        let abstentions = result.abstentions() as u64;

        {
            let mut acc = self.stats.write();
            let stats = &mut acc.stats;
            stats.total_evaluations += 1;
            stats.instance_count = result.votes.len();
            stats.abstentions += abstentions;
            if result.consensus_reached {
                stats.consensus_reached += 1;
            }
            match result.decision {
                SwarmDecision::Execute => stats.executed += 1,
                SwarmDecision::Reject => stats.rejected += 1,
            }
            match result.reject_reason {
                Some(RejectReason::EthicsVeto { .. }) => stats.vetoes += 1,
                Some(RejectReason::DeadlineExpired) => stats.deadline_rejections += 1,
                _ => {}
            }
            acc.total_processing_time_ms += result.total_processing_time_ms;
            acc.stats.avg_processing_time_ms =
                acc.total_processing_time_ms as f64 / acc.stats.total_evaluations as f64;
        }

        let mut history = self.history.write();
        history.push_back(result.clone());
        while history.len() > self.config.decision_history_size {
            history.pop_front();
        }
        drop(history);

        metrics::counter!("aegis_swarm_rounds_total", 1, "decision" => result.decision.as_str());
        metrics::counter!("aegis_swarm_abstentions_total", abstentions);
        metrics::histogram!("aegis_swarm_round_duration_ms", result.total_processing_time_ms as f64);
        metrics::histogram!("aegis_swarm_approval_rate", result.approval_rate);
    }

    fn log_decision(&self, result: &SwarmDecisionResult) {
        match (&result.decision, &result.reject_reason) {
            (SwarmDecision::Execute, _) => info!(
                round = %result.round_id,
                opportunity = %result.opportunity_id,
                approval_rate = result.approval_rate,
                "✅ Swarm approved opportunity"
            ),
            (_, Some(RejectReason::EthicsVeto { instance_id })) => {
                metrics::counter!("aegis_swarm_vetoes_total", 1);
                warn!(
                    round = %result.round_id,
                    opportunity = %result.opportunity_id,
                    approval_rate = result.approval_rate,
                    "🚨 Ethics veto by {}",
                    instance_id
                )
            }
            _ => info!(
                round = %result.round_id,
                opportunity = %result.opportunity_id,
                approval_rate = result.approval_rate,
                abstentions = result.abstentions(),
                "Swarm rejected opportunity"
            ),
        }
    }

    /// Running statistics
    pub fn stats(&self) -> SwarmStats {
        self.stats.read().stats.clone()
    }

    /// Most recent decisions, newest first
    pub fn recent_decisions(&self, limit: usize) -> Vec<SwarmDecisionResult> {
        self.history.read().iter().rev().take(limit).cloned().collect()
    }

    /// Look up a retained decision by opportunity id, newest first
    pub fn decision_for(&self, opportunity_id: &str) -> Option<SwarmDecisionResult> {
        self.history
            .read()
            .iter()
            .rev()
            .find(|d| d.opportunity_id == opportunity_id)
            .cloned()
    }
}

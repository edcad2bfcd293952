//! Swarm consensus integration tests
//!
//! Covers readiness, capacity, timeouts as abstentions, the ethics veto,
//! deadline expiry and round snapshot isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aegis_gate::*;
use async_trait::async_trait;
use chrono::Utc;
use proptest::prelude::*;
use tokio::sync::Notify;

/// Evaluator returning a fixed decision, optionally after a delay
struct ScriptedEvaluator {
    decision: VoteDecision,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl WardenEvaluator for ScriptedEvaluator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn evaluate(&self, _opportunity: &SwarmOpportunity) -> Result<VoteDecision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.decision.clone())
    }
}

/// Evaluator that never answers
struct HangingEvaluator;

#[async_trait]
impl WardenEvaluator for HangingEvaluator {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn evaluate(&self, _opportunity: &SwarmOpportunity) -> Result<VoteDecision> {
        Ok(std::future::pending::<VoteDecision>().await)
    }
}

struct FailingEvaluator;

#[async_trait]
impl WardenEvaluator for FailingEvaluator {
    fn name(&self) -> &str {
        "failing"
    }

    async fn evaluate(&self, _opportunity: &SwarmOpportunity) -> Result<VoteDecision> {
        Err(GateError::evaluation("model unavailable"))
    }
}

struct PanickingEvaluator;

#[async_trait]
impl WardenEvaluator for PanickingEvaluator {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn evaluate(&self, _opportunity: &SwarmOpportunity) -> Result<VoteDecision> {
        panic!("evaluator bug");
    }
}

/// Evaluator that signals when it starts and waits to be released
struct GatedEvaluator {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl WardenEvaluator for GatedEvaluator {
    fn name(&self) -> &str {
        "gated"
    }

    async fn evaluate(&self, _opportunity: &SwarmOpportunity) -> Result<VoteDecision> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(VoteDecision::approve(1.0, "released"))
    }
}

fn swarm_config() -> SwarmConfig {
    SwarmConfig {
        min_instances: 3,
        max_instances: 5,
        consensus_threshold: 0.7,
        voting_timeout_ms: 100,
        enable_ethics_veto: true,
        decision_history_size: 100,
    }
}

fn opportunity(id: &str) -> SwarmOpportunity {
    SwarmOpportunity {
        id: id.to_string(),
        opportunity_type: "dex_arb".to_string(),
        data: serde_json::json!({"pool": "USDC/WETH"}),
        expected_value: 600.0,
        risk: 0.2,
        urgency: 0.7,
        deadline: Utc::now() + chrono::Duration::seconds(60),
    }
}

fn scripted(decision: VoteDecision) -> (Arc<dyn WardenEvaluator>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let evaluator = Arc::new(ScriptedEvaluator {
        decision,
        delay: None,
        calls: calls.clone(),
    });
    (evaluator, calls)
}

fn register_approvers(swarm: &SwarmCoordinator, ids: &[&str]) -> Vec<Arc<AtomicUsize>> {
    ids.iter()
        .map(|id| {
            let (evaluator, calls) = scripted(VoteDecision::approve(1.0, "looks good"));
            swarm
                .register_instance(WardenConfig::new(*id, 1.0), evaluator)
                .unwrap();
            calls
        })
        .collect()
}

#[tokio::test]
async fn test_readiness_gate() {
    let swarm = SwarmCoordinator::new(swarm_config()).unwrap();
    let calls = register_approvers(&swarm, &["w1", "w2"]);

    assert_eq!(swarm.state(), SwarmState::Unready);
    let result = swarm.evaluate_opportunity(&opportunity("opp-1")).await;

    match result {
        Err(GateError::NotReady {
            registered,
            required,
        }) => {
            assert_eq!(registered, 2);
            assert_eq!(required, 3);
        }
        other => panic!("expected NotReady, got {:?}", other.map(|r| r.decision)),
    }
    assert!(calls.iter().all(|c| c.load(Ordering::SeqCst) == 0));
    assert_eq!(swarm.stats().total_evaluations, 0);

    register_approvers(&swarm, &["w3"]);
    assert_eq!(swarm.state(), SwarmState::Ready);
    assert!(swarm.evaluate_opportunity(&opportunity("opp-1")).await.is_ok());

    assert!(swarm.unregister_instance("w3"));
    assert!(!swarm.unregister_instance("w3"));
    assert!(!swarm.is_ready());
}

#[tokio::test]
async fn test_capacity_and_overwrite() {
    let swarm = SwarmCoordinator::new(swarm_config()).unwrap();
    register_approvers(&swarm, &["w1", "w2", "w3", "w4", "w5"]);

    let (evaluator, _) = scripted(VoteDecision::approve(1.0, "extra"));
    let result = swarm.register_instance(WardenConfig::new("w6", 1.0), evaluator);
    assert!(matches!(result, Err(GateError::CapacityExceeded { max: 5 })));

    // Overwriting a known id is allowed at capacity and keeps its position
    let (evaluator, _) = scripted(VoteDecision::reject(1.0, "changed my mind"));
    swarm
        .register_instance(WardenConfig::new("w2", 3.0), evaluator)
        .unwrap();
    assert_eq!(swarm.instance_count(), 5);
    assert_eq!(swarm.instance_ids(), vec!["w1", "w2", "w3", "w4", "w5"]);

    let result = swarm.evaluate_opportunity(&opportunity("opp-1")).await.unwrap();
    let w2 = result.vote_of("w2").unwrap();
    assert_eq!(w2.vote, VoteChoice::Reject);
    assert_eq!(w2.weight, 3.0);
    assert_eq!(result.total_weight, 7.0);
}

#[tokio::test]
async fn test_invalid_weight_rejected() {
    let swarm = SwarmCoordinator::new(swarm_config()).unwrap();
    for weight in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        let (evaluator, _) = scripted(VoteDecision::approve(1.0, "ok"));
        let result = swarm.register_instance(WardenConfig::new("bad", weight), evaluator);
        assert!(matches!(result, Err(GateError::InvalidWeight { .. })));
    }
    assert_eq!(swarm.instance_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_recorded_as_abstention() {
    let swarm = SwarmCoordinator::new(swarm_config()).unwrap();
    register_approvers(&swarm, &["w1", "w2"]);
    swarm
        .register_instance(WardenConfig::new("stuck", 2.0), Arc::new(HangingEvaluator))
        .unwrap();

    let started = tokio::time::Instant::now();
    let result = swarm.evaluate_opportunity(&opportunity("opp-1")).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(150), "round took {:?}", elapsed);

    assert_eq!(result.votes.len(), 3);
    let stuck = result.vote_of("stuck").unwrap();
    assert_eq!(stuck.vote, VoteChoice::Abstain);
    assert_eq!(stuck.confidence, 0.0);
    assert_eq!(stuck.reasoning, "timeout");

    // The abstainer's weight stays in the denominator
    assert_eq!(result.total_weight, 4.0);
    assert_eq!(result.approval_weight, 2.0);
    assert_eq!(result.approval_rate, 0.5);
    assert_eq!(result.decision, SwarmDecision::Reject);
    assert_eq!(result.reject_reason, Some(RejectReason::NoConsensus));
    assert_eq!(result.abstentions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_vote_within_window_counts() {
    let swarm = SwarmCoordinator::new(swarm_config()).unwrap();
    register_approvers(&swarm, &["w1", "w2"]);
    let calls = Arc::new(AtomicUsize::new(0));
    swarm
        .register_instance(
            WardenConfig::new("slow", 1.0),
            Arc::new(ScriptedEvaluator {
                decision: VoteDecision::approve(0.9, "took a while"),
                delay: Some(Duration::from_millis(60)),
                calls,
            }),
        )
        .unwrap();

    let result = swarm.evaluate_opportunity(&opportunity("opp-1")).await.unwrap();
    let slow = result.vote_of("slow").unwrap();
    assert_eq!(slow.vote, VoteChoice::Approve);
    assert!(slow.processing_time_ms >= 60);
    assert_eq!(result.decision, SwarmDecision::Execute);
}

#[tokio::test(start_paused = true)]
async fn test_votes_in_registration_order() {
    let swarm = SwarmCoordinator::new(swarm_config()).unwrap();
    for (i, id) in ["first", "second", "third"].iter().enumerate() {
        // Earlier registrations answer later
        swarm
            .register_instance(
                WardenConfig::new(*id, 1.0),
                Arc::new(ScriptedEvaluator {
                    decision: VoteDecision::approve(1.0, *id),
                    delay: Some(Duration::from_millis(50 - 20 * i as u64)),
                    calls: Arc::new(AtomicUsize::new(0)),
                }),
            )
            .unwrap();
    }

    let result = swarm.evaluate_opportunity(&opportunity("opp-1")).await.unwrap();
    let order: Vec<&str> = result.votes.iter().map(|v| v.instance_id.as_str()).collect();
    assert_eq!(order, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_ethics_veto_is_absolute() {
    let swarm = SwarmCoordinator::new(swarm_config()).unwrap();
    for id in ["w1", "w2", "w3"] {
        let (evaluator, _) = scripted(VoteDecision::approve(1.0, "profitable"));
        swarm
            .register_instance(WardenConfig::new(id, 10.0), evaluator)
            .unwrap();
    }
    let (ethics, _) = scripted(VoteDecision::reject(0.2, "targets retail flow"));
    swarm
        .register_instance(
            WardenConfig::new("ethics", 0.1).with_specialization("ethics"),
            ethics,
        )
        .unwrap();

    let result = swarm.evaluate_opportunity(&opportunity("opp-1")).await.unwrap();

    assert!(result.approval_rate > 0.99);
    assert!(result.consensus_reached);
    assert_eq!(result.decision, SwarmDecision::Reject);
    assert_eq!(
        result.reject_reason,
        Some(RejectReason::EthicsVeto {
            instance_id: "ethics".to_string()
        })
    );
    assert_eq!(swarm.stats().vetoes, 1);
}

#[tokio::test]
async fn test_veto_disabled() {
    let mut config = swarm_config();
    config.enable_ethics_veto = false;
    let swarm = SwarmCoordinator::new(config).unwrap();
    register_approvers(&swarm, &["w1", "w2", "w3", "w4"]);
    let (ethics, _) = scripted(VoteDecision::reject(1.0, "objection"));
    swarm
        .register_instance(
            WardenConfig::new("ethics", 1.0).with_specialization("ethics"),
            ethics,
        )
        .unwrap();

    let result = swarm.evaluate_opportunity(&opportunity("opp-1")).await.unwrap();
    assert_eq!(result.approval_rate, 0.8);
    assert_eq!(result.decision, SwarmDecision::Execute);
}

#[tokio::test(start_paused = true)]
async fn test_ethics_timeout_does_not_veto() {
    let swarm = SwarmCoordinator::new(swarm_config()).unwrap();
    register_approvers(&swarm, &["w1", "w2", "w3", "w4"]);
    swarm
        .register_instance(
            WardenConfig::new("ethics", 1.0).with_specialization("ethics"),
            Arc::new(HangingEvaluator),
        )
        .unwrap();

    let result = swarm.evaluate_opportunity(&opportunity("opp-1")).await.unwrap();
    assert_eq!(result.vote_of("ethics").unwrap().vote, VoteChoice::Abstain);
    assert_eq!(result.approval_rate, 0.8);
    assert_eq!(result.decision, SwarmDecision::Execute);
}

#[tokio::test]
async fn test_five_warden_scenario() {
    let mut config = swarm_config();
    config.max_instances = 10;
    let swarm = SwarmCoordinator::new(config).unwrap();

    for i in 0..4 {
        let (evaluator, _) = scripted(VoteDecision::approve(0.9, "spread holds"));
        swarm
            .register_instance(WardenConfig::new(format!("approver-{}", i), 1.0), evaluator)
            .unwrap();
    }
    let (dissent, _) = scripted(VoteDecision::reject(0.8, "gas too volatile"));
    swarm
        .register_instance(WardenConfig::new("dissent", 1.0), dissent)
        .unwrap();

    let result = swarm.evaluate_opportunity(&opportunity("opp-1")).await.unwrap();

    println!(
        "📊 approval {:.3} ({:.2}/{:.2})",
        result.approval_rate, result.approval_weight, result.total_weight
    );
    assert!((result.approval_weight - 3.6).abs() < 1e-9);
    assert_eq!(result.total_weight, 5.0);
    assert!((result.approval_rate - 0.72).abs() < 1e-9);
    assert!(result.consensus_reached);
    assert_eq!(result.decision, SwarmDecision::Execute);
    assert!(result.should_execute());
    assert!(result.reject_reason.is_none());
}

#[tokio::test]
async fn test_expired_deadline_rejected_without_fan_out() {
    let swarm = SwarmCoordinator::new(swarm_config()).unwrap();
    let calls = register_approvers(&swarm, &["w1", "w2", "w3"]);

    let mut opp = opportunity("late");
    opp.deadline = Utc::now() - chrono::Duration::seconds(1);

    let result = swarm.evaluate_opportunity(&opp).await.unwrap();

    assert_eq!(result.decision, SwarmDecision::Reject);
    assert_eq!(result.reject_reason, Some(RejectReason::DeadlineExpired));
    assert_eq!(result.votes.len(), 3);
    assert!(result.votes.iter().all(|v| v.vote == VoteChoice::Abstain));
    assert_eq!(result.approval_rate, 0.0);
    assert!(calls.iter().all(|c| c.load(Ordering::SeqCst) == 0));
    assert_eq!(swarm.stats().deadline_rejections, 1);
}

#[tokio::test]
async fn test_errors_and_panics_become_abstentions() {
    let swarm = SwarmCoordinator::new(swarm_config()).unwrap();
    register_approvers(&swarm, &["w1"]);
    swarm
        .register_instance(WardenConfig::new("failing", 1.0), Arc::new(FailingEvaluator))
        .unwrap();
    swarm
        .register_instance(WardenConfig::new("panicking", 1.0), Arc::new(PanickingEvaluator))
        .unwrap();

    let result = swarm.evaluate_opportunity(&opportunity("opp-1")).await.unwrap();

    let failing = result.vote_of("failing").unwrap();
    assert_eq!(failing.vote, VoteChoice::Abstain);
    assert!(failing.reasoning.contains("model unavailable"));

    let panicking = result.vote_of("panicking").unwrap();
    assert_eq!(panicking.vote, VoteChoice::Abstain);
    assert_eq!(result.abstentions(), 2);
    assert!((result.approval_rate - 1.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_round_uses_registration_snapshot() {
    let swarm = Arc::new(SwarmCoordinator::new(swarm_config()).unwrap());
    register_approvers(&swarm, &["w1", "w2"]);

    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    swarm
        .register_instance(
            WardenConfig::new("gated", 1.0),
            Arc::new(GatedEvaluator {
                started: started.clone(),
                release: release.clone(),
            }),
        )
        .unwrap();

    let round = {
        let swarm = swarm.clone();
        tokio::spawn(async move { swarm.evaluate_opportunity(&opportunity("opp-1")).await })
    };

    // Mutate the registry while the round is in flight
    started.notified().await;
    assert!(swarm.unregister_instance("w1"));
    register_approvers(&swarm, &["late-joiner"]);
    release.notify_one();

    let result = round.await.unwrap().unwrap();
    let ids: Vec<&str> = result.votes.iter().map(|v| v.instance_id.as_str()).collect();
    assert_eq!(ids, vec!["w1", "w2", "gated"]);
    assert_eq!(swarm.instance_ids(), vec!["w2", "gated", "late-joiner"]);
}

#[tokio::test]
async fn test_stats_and_history() {
    let mut config = swarm_config();
    config.decision_history_size = 2;
    let swarm = SwarmCoordinator::new(config).unwrap();
    register_approvers(&swarm, &["w1", "w2", "w3"]);

    for i in 0..3 {
        swarm
            .evaluate_opportunity(&opportunity(&format!("opp-{}", i)))
            .await
            .unwrap();
    }

    let stats = swarm.stats();
    assert_eq!(stats.total_evaluations, 3);
    assert_eq!(stats.executed, 3);
    assert_eq!(stats.consensus_reached, 3);
    assert_eq!(stats.instance_count, 3);

    let recent = swarm.recent_decisions(10);
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].opportunity_id, "opp-2");
    assert!(swarm.decision_for("opp-0").is_none());
    assert!(swarm.decision_for("opp-1").is_some());
}

#[test]
fn test_tally_with_overflowing_weights() {
    let vote = |choice: VoteChoice, confidence: f64| WardenVote {
        instance_id: String::new(),
        vote: choice,
        confidence,
        reasoning: String::new(),
        processing_time_ms: 0,
        weight: f64::MAX,
        specialization: None,
    };

    let tally = tally_votes(
        &[vote(VoteChoice::Approve, 1.0), vote(VoteChoice::Approve, 1.0)],
        0.7,
        true,
    );
    assert_eq!(tally.approval_rate, 1.0);
    assert_eq!(tally.decision(), SwarmDecision::Execute);

    let tally = tally_votes(
        &[vote(VoteChoice::Approve, 0.9), vote(VoteChoice::Reject, 0.8)],
        0.7,
        true,
    );
    assert!((tally.approval_rate - 0.45).abs() < 1e-9);
    assert_eq!(tally.decision(), SwarmDecision::Reject);
}

fn arb_vote() -> impl Strategy<Value = WardenVote> {
    (
        prop_oneof![
            Just(VoteChoice::Approve),
            Just(VoteChoice::Reject),
            Just(VoteChoice::Abstain)
        ],
        0.0f64..=1.0,
        prop_oneof![
            9 => 0.1f64..10.0,
            1 => Just(f64::MAX),
        ],
    )
        .prop_map(|(vote, confidence, weight)| WardenVote {
            instance_id: String::new(),
            vote,
            confidence: if vote == VoteChoice::Abstain { 0.0 } else { confidence },
            reasoning: String::new(),
            processing_time_ms: 0,
            weight,
            specialization: None,
        })
}

proptest! {
    #[test]
    fn prop_approval_rate_in_unit_interval(votes in prop::collection::vec(arb_vote(), 0..12)) {
        let tally = tally_votes(&votes, 0.7, true);
        prop_assert!(tally.approval_rate >= 0.0 && tally.approval_rate <= 1.0);
    }

    #[test]
    fn prop_raising_confidence_never_lowers_rate(
        votes in prop::collection::vec(arb_vote(), 1..12),
        index in any::<prop::sample::Index>(),
        boost in 0.0f64..1.0,
    ) {
        let mut votes = votes;
        let i = index.index(votes.len());
        votes[i].vote = VoteChoice::Approve;

        let before = tally_votes(&votes, 0.7, true).approval_rate;
        let mut raised = votes.clone();
        raised[i].confidence = (raised[i].confidence + boost).min(1.0);
        let after = tally_votes(&raised, 0.7, true).approval_rate;

        prop_assert!(after + 1e-12 >= before);
    }

    #[test]
    fn prop_raising_weight_never_lowers_rate(
        votes in prop::collection::vec(arb_vote(), 1..12),
        index in any::<prop::sample::Index>(),
        extra in 0.0f64..10.0,
    ) {
        let mut votes = votes;
        let i = index.index(votes.len());
        votes[i].vote = VoteChoice::Approve;

        // Extra weight on a vote less confident than the current rate dilutes it
        let mut before = tally_votes(&votes, 0.7, true).approval_rate;
        if votes[i].confidence < before {
            votes[i].confidence = 1.0;
            before = tally_votes(&votes, 0.7, true).approval_rate;
        }

        let mut heavier = votes.clone();
        heavier[i].weight += extra;
        let after = tally_votes(&heavier, 0.7, true).approval_rate;

        prop_assert!(after + 1e-12 >= before);
    }
}

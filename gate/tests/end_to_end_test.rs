//! End-to-end integration tests for the admission gate
//!
//! Tests the complete pipeline:
//! Risk factors → Pre-gate → Swarm vote → Receipt → Calibration/Thresholds

use std::collections::HashMap;

use aegis_gate::*;
use aegis_risk::{OutcomeLabel, RiskLevel, Severity, ThresholdManager};
use chrono::Utc;

fn test_config() -> GateConfig {
    let mut config = GateConfig::with_default_roster();
    config.risk.calibrator.min_data_points = 5;
    config
}

fn create_opportunity(id: &str, opportunity_type: &str, expected_value: f64) -> SwarmOpportunity {
    SwarmOpportunity {
        id: id.to_string(),
        opportunity_type: opportunity_type.to_string(),
        data: serde_json::json!({"route": ["uniswap_v3", "curve"], "asset": "USDC"}),
        expected_value,
        risk: 0.2,
        urgency: 0.6,
        deadline: Utc::now() + chrono::Duration::seconds(60),
    }
}

fn create_receipt(id: &str, pnl: f64, latency_ms: f64) -> ExecutionReceipt {
    ExecutionReceipt {
        opportunity_id: id.to_string(),
        success: true,
        realized_pnl_usd: pnl,
        execution_latency_ms: latency_ms,
        completed_at: Utc::now(),
        error_message: None,
    }
}

fn set_all_factors(gate: &AdmissionGate, value: f64) {
    for factor in gate.assessor().list_factors() {
        assert!(gate.assessor().update_factor(factor.id, value));
    }
}

#[tokio::test]
async fn test_full_pipeline() {
    println!("\n🧪 Testing full admission pipeline\n");

    let gate = AdmissionGate::from_config(&test_config()).unwrap();
    set_all_factors(&gate, 0.3);

    // Step 1: admit a batch of clean opportunities
    for i in 0..6 {
        let opp = create_opportunity(&format!("arb-{}", i), "dex_arb", 600.0);
        let decision = gate.admit(&opp, &[]).await.unwrap();

        assert!(decision.admitted, "opportunity {} rejected: {:?}", i, decision.reason);
        let assessment = decision.assessment.as_ref().unwrap();
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert!((assessment.overall_risk_score - 0.3).abs() < 1e-9);
        assert_eq!(decision.swarm.as_ref().unwrap().votes.len(), 4);
    }
    println!("✅ Admitted 6 opportunities");

    // Step 2: feed execution receipts back
    for i in 0..5 {
        let outcome = gate
            .feedback()
            .process_receipt(create_receipt(&format!("arb-{}", i), 650.0, 400.0))
            .await
            .unwrap();
        assert_eq!(outcome.settled.label, OutcomeLabel::Success);
        assert!(outcome.violations.is_empty());
    }

    // A landed but loss-making execution trips the realized loss threshold
    let outcome = gate
        .feedback()
        .process_receipt(create_receipt("arb-5", -20.0, 400.0))
        .await
        .unwrap();
    assert_eq!(outcome.settled.label, OutcomeLabel::Partial);
    assert_eq!(outcome.settled.realized_outcome, 1.0);
    assert_eq!(outcome.violations.len(), 1);
    assert_eq!(outcome.violations[0].severity, Severity::Critical);
    println!("✅ Loss flagged: {}", outcome.violations[0].message);

    // Step 3: calibration is reliable and reflects the over-prediction
    let calibration = gate.calibrator().calibrate();
    let result = calibration.result().unwrap();
    assert_eq!(result.data_points, 6);
    let expected_bias = (5.0 * 0.3 + (0.3 - 1.0)) / 6.0;
    assert!((result.bias - expected_bias).abs() < 1e-9);

    // The detectors' own estimate (0.2) is calibrated on its own
    let detector = gate.detector_calibrator().calibrate();
    let detector_bias = (5.0 * 0.2 + (0.2 - 1.0)) / 6.0;
    assert!((detector.result().unwrap().bias - detector_bias).abs() < 1e-9);

    let performance = gate.feedback().get_performance().await;
    assert_eq!(performance.settled, 6);
    assert_eq!(performance.pending, 0);
    assert_eq!(performance.successful, 5);
    assert_eq!(performance.partial, 1);
    assert_eq!(performance.hit_rate, 1.0);

    // Step 4: a risk spike is refused before the vote
    set_all_factors(&gate, 0.95);
    let decision = gate
        .admit(&create_opportunity("arb-risky", "dex_arb", 600.0), &[])
        .await
        .unwrap();
    assert!(!decision.admitted);
    assert!(decision.swarm.is_none());
    assert!(matches!(
        decision.reason,
        AdmissionReason::RiskTooHigh {
            level: RiskLevel::Critical,
            ..
        }
    ));

    let stats = gate.swarm().stats();
    assert_eq!(stats.total_evaluations, 6);
    assert_eq!(stats.executed, 6);
    println!("✅ Pipeline complete: {:?}", stats);
}

#[tokio::test]
async fn test_named_factor_values_override_current() {
    let gate = AdmissionGate::from_config(&test_config()).unwrap();
    set_all_factors(&gate, 0.9);

    let mut values = HashMap::new();
    values.insert("gas_volatility".to_string(), 0.1);
    values.insert("liquidity_depth".to_string(), 0.1);
    let factor_values = gate.resolve_factors(&values);

    let decision = gate
        .admit(&create_opportunity("arb-1", "dex_arb", 600.0), &factor_values)
        .await
        .unwrap();

    assert!(decision.admitted);
    let assessment = decision.assessment.unwrap();
    assert_eq!(assessment.factors.len(), 2);
    assert_eq!(assessment.risk_level, RiskLevel::Minimal);
}

#[tokio::test]
async fn test_risk_warden_corrects_detector_bias_not_assessor_bias() {
    let gate = AdmissionGate::from_config(&test_config()).unwrap();

    // The assessor over-predicts (0.75 vs 0.5 realized) while the detector
    // under-predicts (0.3 vs 0.5 realized)
    set_all_factors(&gate, 0.75);
    for i in 0..5 {
        let mut opp = create_opportunity(&format!("arb-{}", i), "dex_arb", 600.0);
        opp.risk = 0.3;
        let decision = gate.admit(&opp, &[]).await.unwrap();
        assert!(decision.admitted, "opportunity {} rejected: {:?}", i, decision.reason);
        assert_eq!(decision.assessment.unwrap().risk_level, RiskLevel::High);
    }
    for i in 0..5 {
        let outcome = gate
            .feedback()
            .process_receipt(create_receipt(&format!("arb-{}", i), 300.0, 100.0))
            .await
            .unwrap();
        assert_eq!(outcome.settled.realized_outcome, 0.5);
    }

    let assessor_bias = gate.calibrator().calibrate().result().unwrap().bias;
    let detector_bias = gate.detector_calibrator().calibrate().result().unwrap().bias;
    assert!((assessor_bias - 0.25).abs() < 1e-9);
    assert!((detector_bias + 0.2).abs() < 1e-9);

    // 0.45 from the detector corrects up to 0.65, above the 0.6 ceiling
    let mut opp = create_opportunity("arb-next", "dex_arb", 600.0);
    opp.risk = 0.45;
    let decision = gate.admit(&opp, &[]).await.unwrap();

    let swarm = decision.swarm.unwrap();
    let risk_vote = swarm.vote_of("risk-warden").unwrap();
    assert_eq!(risk_vote.vote, VoteChoice::Reject);
    assert!(!decision.admitted);
    println!("✅ Risk warden vote: {}", risk_vote.reasoning);
}

#[tokio::test]
async fn test_ethics_veto_end_to_end() {
    let gate = AdmissionGate::from_config(&test_config()).unwrap();

    let mut opp = create_opportunity("sw-1", "dex_arb", 5000.0);
    opp.data = serde_json::json!({"targets_retail": true});

    let decision = gate.admit(&opp, &[]).await.unwrap();
    let swarm = decision.swarm.unwrap();

    assert!(!decision.admitted);
    assert!(swarm.consensus_reached);
    assert_eq!(
        swarm.reject_reason,
        Some(RejectReason::EthicsVeto {
            instance_id: "ethics-warden".to_string()
        })
    );

    // Rejected opportunities are not tracked for feedback
    let receipt = create_receipt("sw-1", 100.0, 100.0);
    assert!(matches!(
        gate.feedback().process_receipt(receipt).await,
        Err(GateError::UnknownOpportunity(_))
    ));
}

#[tokio::test]
async fn test_gate_without_roster_refuses() {
    let gate = AdmissionGate::from_config(&GateConfig::default()).unwrap();
    assert!(!gate.swarm().is_ready());

    let result = gate
        .admit(&create_opportunity("arb-1", "dex_arb", 600.0), &[])
        .await;
    assert!(matches!(result, Err(GateError::NotReady { registered: 0, .. })));
}

#[tokio::test]
async fn test_threshold_state_survives_export() {
    let gate = AdmissionGate::from_config(&test_config()).unwrap();
    let opp = create_opportunity("arb-1", "dex_arb", 600.0);
    gate.admit(&opp, &[]).await.unwrap();
    gate.feedback()
        .process_receipt(create_receipt("arb-1", 600.0, 5000.0))
        .await
        .unwrap();

    let json = gate.thresholds().export_json().unwrap();

    let restored = ThresholdManager::default();
    restored.import_json(&json).unwrap();

    assert_eq!(restored.list_thresholds().len(), 2);
    assert_eq!(restored.violations(false).len(), 1);
    assert!(restored.dynamic_config("execution_latency_ms").is_some());
}

//! Property tests for risk scoring, calibration and threshold cooldowns

use std::collections::HashMap;
use std::time::Duration;

use aegis_risk::*;
use chrono::Utc;
use proptest::prelude::*;

fn factor_weight() -> impl Strategy<Value = f64> {
    prop_oneof![
        8 => 0.0f64..5.0,
        1 => Just(f64::MAX),
        1 => 1e300f64..f64::MAX,
    ]
}

fn finite_or_nan() -> impl Strategy<Value = f64> {
    prop_oneof![
        8 => -2.0f64..3.0,
        1 => Just(f64::NAN),
        1 => Just(f64::INFINITY),
    ]
}

proptest! {
    #[test]
    fn prop_score_stays_in_unit_interval(
        factors in prop::collection::vec((factor_weight(), finite_or_nan()), 0..8)
    ) {
        let assessor = RiskAssessor::new();
        let values: Vec<_> = factors
            .iter()
            .enumerate()
            .map(|(i, (weight, value))| {
                let factor = assessor
                    .register_factor(format!("f{}", i), FactorCategory::Market, *weight, None)
                    .unwrap();
                (factor.id, *value)
            })
            .collect();

        let assessment = assessor.assess("target", "opportunity", &values);

        prop_assert!(assessment.overall_risk_score >= 0.0);
        prop_assert!(assessment.overall_risk_score <= 1.0);
        prop_assert_eq!(
            assessment.risk_level,
            RiskLevel::from_score(assessment.overall_risk_score)
        );
    }

    #[test]
    fn prop_calibration_accuracy_bounded(
        points in prop::collection::vec((-1.0f64..2.0, -1.0f64..2.0), 10..50)
    ) {
        let calibrator = RiskCalibrator::default();
        for (realized, predicted) in &points {
            calibrator.record_data_point(*realized, *predicted, OutcomeLabel::Success, HashMap::new());
        }

        let calibration = calibrator.calibrate();
        let result = calibration.result().unwrap();
        prop_assert!(result.accuracy >= 0.0 && result.accuracy <= 1.0);
        prop_assert!(result.bias >= -1.0 && result.bias <= 1.0);
    }

    #[test]
    fn prop_cooldown_spaces_unordered_violations(
        offsets_ms in prop::collection::vec(-20_000i64..20_000, 1..40)
    ) {
        let manager = ThresholdManager::default();
        manager.define_threshold(
            ThresholdSpec::new("gas spike", "gas_gwei", 100.0).cooldown(Duration::from_secs(5)),
        );
        let start = Utc::now();

        let mut triggered = Vec::new();
        for offset in offsets_ms {
            let at = start + chrono::Duration::milliseconds(offset);
            if !manager.check_thresholds_at("gas_gwei", 150.0, at).is_empty() {
                triggered.push(offset);
            }
        }

        prop_assert!(!triggered.is_empty());
        triggered.sort_unstable();
        for pair in triggered.windows(2) {
            prop_assert!(pair[1] - pair[0] >= 5000);
        }
    }

    #[test]
    fn prop_cooldown_spaces_violations(
        offsets_ms in prop::collection::vec(0i64..20_000, 1..40)
    ) {
        let manager = ThresholdManager::default();
        manager.define_threshold(
            ThresholdSpec::new("gas spike", "gas_gwei", 100.0).cooldown(Duration::from_secs(5)),
        );

        let mut offsets = offsets_ms;
        offsets.sort_unstable();
        let start = Utc::now();

        let mut triggered = Vec::new();
        for offset in offsets {
            let at = start + chrono::Duration::milliseconds(offset);
            if !manager.check_thresholds_at("gas_gwei", 150.0, at).is_empty() {
                triggered.push(offset);
            }
        }

        prop_assert!(!triggered.is_empty());
        for pair in triggered.windows(2) {
            prop_assert!(pair[1] - pair[0] >= 5000);
        }
    }
}

#[test]
fn test_cooldown_scenario() {
    let manager = ThresholdManager::default();
    manager.define_threshold(
        ThresholdSpec::new("gas spike", "gas_gwei", 100.0).cooldown(Duration::from_millis(5000)),
    );
    let start = Utc::now();

    let first = manager.check_thresholds_at("gas_gwei", 150.0, start);
    let second = manager.check_thresholds_at(
        "gas_gwei",
        150.0,
        start + chrono::Duration::milliseconds(50),
    );
    let third = manager.check_thresholds_at(
        "gas_gwei",
        150.0,
        start + chrono::Duration::milliseconds(5050),
    );

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
    assert_eq!(third.len(), 1);
}

#[test]
fn test_replayed_sample_does_not_reopen_cooldown() {
    let manager = ThresholdManager::default();
    manager.define_threshold(
        ThresholdSpec::new("gas spike", "gas_gwei", 100.0).cooldown(Duration::from_secs(5)),
    );
    let start = Utc::now();
    let fire = |offset_ms: i64| {
        !manager
            .check_thresholds_at("gas_gwei", 150.0, start + chrono::Duration::milliseconds(offset_ms))
            .is_empty()
    };

    assert!(fire(0));
    // an older replayed sample outside the cooldown still fires
    assert!(fire(-6000));
    // but it must not pull the reference point back before the first one
    assert!(!fire(4000));
    assert!(fire(5000));
}

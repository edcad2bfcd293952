//! Admission pipeline
//!
//! Opportunity → risk pre-gate → swarm vote → decision. Admitted
//! opportunities are tracked so execution receipts can be fed back into
//! calibration and threshold history.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aegis_risk::{
    RiskAssessment, RiskAssessor, RiskCalibrator, RiskLevel, ThresholdManager, ThresholdSpec,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::GateConfig;
use crate::error::Result;
use crate::evaluators::build_warden;
use crate::feedback::FeedbackProcessor;
use crate::swarm::SwarmCoordinator;
use crate::types::{RejectReason, SwarmDecisionResult, SwarmOpportunity};

/// Why an opportunity was admitted or not
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionReason {
    /// The swarm voted to execute
    Admitted,

    /// Risk assessment exceeded the admissible level; the swarm was not asked
    RiskTooHigh {
        level: RiskLevel,
        max_admissible: RiskLevel,
    },

    /// The swarm rejected the opportunity
    SwarmRejected(Option<RejectReason>),
}

/// Outcome of one admission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub opportunity_id: String,
    pub admitted: bool,

    /// Absent when no risk factor contributed
    pub assessment: Option<RiskAssessment>,

    /// Absent when the risk pre-gate rejected
    pub swarm: Option<SwarmDecisionResult>,

    pub reason: AdmissionReason,
    pub decided_at: DateTime<Utc>,
}

/// Admission gate combining risk scoring and swarm consensus
pub struct AdmissionGate {
    assessor: Arc<RiskAssessor>,

    /// Calibrates assessor scores
    calibrator: Arc<RiskCalibrator>,

    /// Calibrates the detectors' `risk` estimates used by the risk warden
    detector_calibrator: Arc<RiskCalibrator>,

    thresholds: Arc<ThresholdManager>,
    swarm: Arc<SwarmCoordinator>,
    feedback: Arc<FeedbackProcessor>,
    max_admissible_level: RiskLevel,
}

impl AdmissionGate {
    /// Assemble a gate from existing components
    pub fn new(
        assessor: Arc<RiskAssessor>,
        calibrator: Arc<RiskCalibrator>,
        detector_calibrator: Arc<RiskCalibrator>,
        thresholds: Arc<ThresholdManager>,
        swarm: Arc<SwarmCoordinator>,
        max_admissible_level: RiskLevel,
    ) -> Self {
        let feedback = Arc::new(
            FeedbackProcessor::new(Arc::clone(&calibrator), Arc::clone(&thresholds))
                .with_detector_calibrator(Arc::clone(&detector_calibrator)),
        );

        Self {
            assessor,
            calibrator,
            detector_calibrator,
            thresholds,
            swarm,
            feedback,
            max_admissible_level,
        }
    }

    /// Build every component from configuration: factors, threshold rules
    /// and the warden roster
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        config.validate()?;

        let assessor = Arc::new(RiskAssessor::new());
        for factor in &config.risk.factors {
            assessor.register_factor(
                factor.name.clone(),
                factor.category.clone(),
                factor.weight,
                factor.threshold,
            )?;
        }

        let calibrator = Arc::new(RiskCalibrator::new(config.risk.calibrator.clone()));
        let detector_calibrator = Arc::new(RiskCalibrator::new(config.risk.calibrator.clone()));

        let thresholds = Arc::new(ThresholdManager::new(config.thresholds.manager.clone()));
        for rule in &config.thresholds.rules {
            let mut spec = ThresholdSpec::new(rule.name.clone(), rule.metric.clone(), rule.value)
                .operator(rule.operator)
                .severity(rule.severity)
                .cooldown(Duration::from_secs(rule.cooldown_secs));
            if let Some(upper) = rule.upper_bound {
                spec = spec.upper_bound(upper);
            }

            if rule.dynamic {
                thresholds.define_adaptive_threshold(spec, None);
            } else {
                thresholds.define_threshold(spec);
            }
        }

        let swarm = Arc::new(SwarmCoordinator::new(config.swarm.clone())?);
        for profile in &config.evaluators {
            let (warden, evaluator) = build_warden(profile, Some(Arc::clone(&detector_calibrator)));
            swarm.register_instance(warden, evaluator)?;
        }

        info!(
            "Admission gate built: {} factors, {} thresholds, {} wardens ({})",
            assessor.factor_count(),
            thresholds.list_thresholds().len(),
            swarm.instance_count(),
            if swarm.is_ready() { "ready" } else { "not ready" }
        );

        Ok(Self::new(
            assessor,
            calibrator,
            detector_calibrator,
            thresholds,
            swarm,
            config.risk.max_admissible_level,
        ))
    }

    /// Decide whether an opportunity may proceed to execution.
    ///
    /// `factor_values` are scored by the risk assessor; when empty, the
    /// factors' current values are used. An assessment above the admissible
    /// level rejects without fan-out. Fails if the swarm is not ready.
    pub async fn admit(
        &self,
        opportunity: &SwarmOpportunity,
        factor_values: &[(Uuid, f64)],
    ) -> Result<AdmissionDecision> {
        let assessment = self.assess(opportunity, factor_values);

        if let Some(assessment) = &assessment {
            if assessment.risk_level > self.max_admissible_level {
                info!(
                    opportunity = %opportunity.id,
                    score = assessment.overall_risk_score,
                    "Risk {} above admissible {}, skipping swarm vote",
                    assessment.risk_level,
                    self.max_admissible_level
                );
                metrics::counter!("aegis_admissions_total", 1, "outcome" => "risk_rejected");

                return Ok(AdmissionDecision {
                    opportunity_id: opportunity.id.clone(),
                    admitted: false,
                    reason: AdmissionReason::RiskTooHigh {
                        level: assessment.risk_level,
                        max_admissible: self.max_admissible_level,
                    },
                    assessment: Some(assessment.clone()),
                    swarm: None,
                    decided_at: Utc::now(),
                });
            }
        }

        let swarm = self.swarm.evaluate_opportunity(opportunity).await?;
        let admitted = swarm.should_execute();

        let reason = if admitted {
            let assessed_risk = assessment.as_ref().map(|a| a.overall_risk_score);
            self.feedback
                .register_decision(opportunity, assessed_risk)
                .await;
            AdmissionReason::Admitted
        } else {
            AdmissionReason::SwarmRejected(swarm.reject_reason.clone())
        };

        metrics::counter!(
            "aegis_admissions_total",
            1,
            "outcome" => if admitted { "admitted" } else { "swarm_rejected" }
        );

        Ok(AdmissionDecision {
            opportunity_id: opportunity.id.clone(),
            admitted,
            assessment,
            swarm: Some(swarm),
            reason,
            decided_at: Utc::now(),
        })
    }

    fn assess(
        &self,
        opportunity: &SwarmOpportunity,
        factor_values: &[(Uuid, f64)],
    ) -> Option<RiskAssessment> {
        let assessment = if factor_values.is_empty() {
            self.assessor
                .assess_current(opportunity.id.clone(), opportunity.opportunity_type.clone())
        } else {
            self.assessor.assess(
                opportunity.id.clone(),
                opportunity.opportunity_type.clone(),
                factor_values,
            )
        };

        if assessment.factors.is_empty() {
            debug!("No risk factor values for {}, skipping pre-gate", opportunity.id);
            return None;
        }
        Some(assessment)
    }

    /// Map factor names to registered ids. Unknown names are skipped.
    pub fn resolve_factors(&self, values: &HashMap<String, f64>) -> Vec<(Uuid, f64)> {
        let mut resolved: Vec<(Uuid, f64)> = values
            .iter()
            .filter_map(|(name, value)| match self.assessor.get_factor_by_name(name) {
                Some(factor) => Some((factor.id, *value)),
                None => {
                    debug!("Ignoring value for unknown risk factor {}", name);
                    None
                }
            })
            .collect();
        resolved.sort_by_key(|(id, _)| *id);
        resolved
    }

    pub fn assessor(&self) -> &Arc<RiskAssessor> {
        &self.assessor
    }

    pub fn calibrator(&self) -> &Arc<RiskCalibrator> {
        &self.calibrator
    }

    pub fn detector_calibrator(&self) -> &Arc<RiskCalibrator> {
        &self.detector_calibrator
    }

    pub fn thresholds(&self) -> &Arc<ThresholdManager> {
        &self.thresholds
    }

    pub fn swarm(&self) -> &Arc<SwarmCoordinator> {
        &self.swarm
    }

    pub fn feedback(&self) -> &Arc<FeedbackProcessor> {
        &self.feedback
    }

    pub fn max_admissible_level(&self) -> RiskLevel {
        self.max_admissible_level
    }
}

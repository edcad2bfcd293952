//! Weighted multi-factor risk assessor
//!
//! Factors are registered once with a weight and category. Sensors push live
//! values through [`RiskAssessor::update_factor`]; callers score a target by
//! supplying the values they have. Factors that are not supplied take no part
//! in either sum, so a partial assessment is still a meaningful average.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, RiskError};
use crate::types::{FactorCategory, FactorContribution, RiskAssessment, RiskFactor};
use crate::RiskLevel;

#[derive(Default)]
struct FactorRegistry {
    factors: HashMap<Uuid, RiskFactor>,
    by_name: HashMap<String, Uuid>,
}

/// Risk assessor owning the factor registry
pub struct RiskAssessor {
    registry: RwLock<FactorRegistry>,
}

impl RiskAssessor {
    /// Create an assessor with no factors
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(FactorRegistry::default()),
        }
    }

    /// Register a factor. A factor with the same name is replaced and its old
    /// id stops resolving.
    pub fn register_factor(
        &self,
        name: impl Into<String>,
        category: FactorCategory,
        weight: f64,
        threshold: Option<f64>,
    ) -> Result<RiskFactor> {
        let name = name.into();
        if !weight.is_finite() || weight < 0.0 {
            return Err(RiskError::invalid_weight(name, weight));
        }

        let factor = RiskFactor {
            id: Uuid::new_v4(),
            name: name.clone(),
            category,
            weight,
            threshold,
            current_value: None,
            registered_at: Utc::now(),
            updated_at: None,
        };

        let mut registry = self.registry.write();
        if let Some(previous) = registry.by_name.insert(name.clone(), factor.id) {
            registry.factors.remove(&previous);
            debug!("Replaced risk factor {} ({} -> {})", name, previous, factor.id);
        }
        registry.factors.insert(factor.id, factor.clone());

        info!(
            factor = %factor.name,
            category = %factor.category,
            weight = factor.weight,
            "Registered risk factor"
        );
        Ok(factor)
    }

    /// Store the current value of a factor. Returns false for an unknown id.
    pub fn update_factor(&self, id: Uuid, value: f64) -> bool {
        let mut registry = self.registry.write();
        match registry.factors.get_mut(&id) {
            Some(factor) => {
                factor.current_value = Some(value);
                factor.updated_at = Some(Utc::now());
                true
            }
            None => {
                debug!("Ignoring update for unknown risk factor {}", id);
                false
            }
        }
    }

    /// Remove a factor. Returns false for an unknown id.
    pub fn remove_factor(&self, id: Uuid) -> bool {
        let mut registry = self.registry.write();
        match registry.factors.remove(&id) {
            Some(factor) => {
                registry.by_name.remove(&factor.name);
                true
            }
            None => false,
        }
    }

    /// Get a factor by id
    pub fn get_factor(&self, id: Uuid) -> Option<RiskFactor> {
        self.registry.read().factors.get(&id).cloned()
    }

    /// Get a factor by name
    pub fn get_factor_by_name(&self, name: &str) -> Option<RiskFactor> {
        let registry = self.registry.read();
        registry
            .by_name
            .get(name)
            .and_then(|id| registry.factors.get(id))
            .cloned()
    }

    /// All registered factors, sorted by name
    pub fn list_factors(&self) -> Vec<RiskFactor> {
        let mut factors: Vec<RiskFactor> = self.registry.read().factors.values().cloned().collect();
        factors.sort_by(|a, b| a.name.cmp(&b.name));
        factors
    }

    /// Number of registered factors
    pub fn factor_count(&self) -> usize {
        self.registry.read().factors.len()
    }

    /// Score a target against the supplied factor values.
    ///
    /// Unknown ids are ignored and a repeated id only counts once (first
    /// occurrence). Non-finite values are scored as maximal risk.
    pub fn assess(
        &self,
        target_id: impl Into<String>,
        target_type: impl Into<String>,
        values: &[(Uuid, f64)],
    ) -> RiskAssessment {
        let registry = self.registry.read();

        let mut seen = HashSet::new();
        let mut scored = Vec::with_capacity(values.len());
        let mut factors = Vec::with_capacity(values.len());

        for (factor_id, value) in values {
            if !seen.insert(*factor_id) {
                continue;
            }
            let Some(factor) = registry.factors.get(factor_id) else {
                continue;
            };

            let normalized = normalize(*value);
            scored.push((factor.weight, normalized));

            factors.push(FactorContribution {
                factor_id: *factor_id,
                name: factor.name.clone(),
                value: *value,
                contribution: factor.weight * normalized,
                breached: factor.threshold.map_or(false, |t| normalized > t),
            });
        }
        drop(registry);

        let overall_risk_score = weighted_score(&scored);
        let risk_level = RiskLevel::from_score(overall_risk_score);

        let assessment = RiskAssessment {
            target_id: target_id.into(),
            target_type: target_type.into(),
            timestamp: Utc::now(),
            factors,
            overall_risk_score,
            risk_level,
        };

        debug!(
            target = %assessment.target_id,
            score = assessment.overall_risk_score,
            level = %assessment.risk_level,
            "Risk assessment complete"
        );
        metrics::counter!("aegis_risk_assessments_total", 1, "level" => risk_level.as_str());

        assessment
    }

    /// Score a target using the current value of every factor that has one
    pub fn assess_current(
        &self,
        target_id: impl Into<String>,
        target_type: impl Into<String>,
    ) -> RiskAssessment {
        let values: Vec<(Uuid, f64)> = self
            .list_factors()
            .into_iter()
            .filter_map(|f| f.current_value.map(|v| (f.id, v)))
            .collect();
        self.assess(target_id, target_type, &values)
    }
}

impl Default for RiskAssessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Weighted mean of normalized values. Weights are scaled by the largest
/// one so the sums stay finite; a zero total weight scores 0.
fn weighted_score(scored: &[(f64, f64)]) -> f64 {
    let max_weight = scored.iter().map(|(w, _)| *w).fold(0.0, f64::max);
    if max_weight <= 0.0 {
        return 0.0;
    }

    let (weighted_sum, weight_sum) = scored
        .iter()
        .fold((0.0, 0.0), |(ws, w), (weight, value)| {
            let scaled = weight / max_weight;
            (ws + scaled * value, w + scaled)
        });

    let score = weighted_sum / weight_sum;
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        1.0
    }
}

fn normalize(value: f64) -> f64 {
    if value.is_nan() {
        1.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

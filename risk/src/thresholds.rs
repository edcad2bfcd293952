//! Threshold monitoring with cooldown suppression and adaptive limits
//!
//! Every metric sample goes through [`ThresholdManager::check_thresholds`]:
//! the sample is appended to a bounded per-metric history, dynamic thresholds
//! on the metric are re-pointed at `mean + k * stddev` of the recent window,
//! and every enabled threshold outside its cooldown is evaluated.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, RiskError};

/// Tolerance used by the `Eq` operator
const EQ_TOLERANCE: f64 = 1e-3;

/// Violation severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational
    Info,

    /// Should be investigated
    Warning,

    /// Requires immediate action
    Critical,
}

impl Severity {
    /// Check if the severity requires immediate attention
    pub fn requires_immediate_attention(&self) -> bool {
        matches!(self, Severity::Critical)
    }

    /// Get the severity as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(RiskError::InvalidSeverity(s.to_string())),
        }
    }
}

/// Comparison operators for thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThresholdOperator {
    Gt,
    Lt,
    Eq,
    /// Inclusive range `[value, upper_bound]`
    Between,
}

impl ThresholdOperator {
    /// Evaluate the comparison. `Between` without an upper bound never matches.
    pub fn evaluate(&self, value: f64, threshold: f64, upper_bound: Option<f64>) -> bool {
        match self {
            ThresholdOperator::Gt => value > threshold,
            ThresholdOperator::Lt => value < threshold,
            ThresholdOperator::Eq => (value - threshold).abs() < EQ_TOLERANCE,
            ThresholdOperator::Between => match upper_bound {
                Some(upper) => threshold <= value && value <= upper,
                None => false,
            },
        }
    }

    /// Get the operator as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdOperator::Gt => ">",
            ThresholdOperator::Lt => "<",
            ThresholdOperator::Eq => "==",
            ThresholdOperator::Between => "between",
        }
    }
}

impl std::str::FromStr for ThresholdOperator {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gt" | ">" => Ok(ThresholdOperator::Gt),
            "lt" | "<" => Ok(ThresholdOperator::Lt),
            "eq" | "==" => Ok(ThresholdOperator::Eq),
            "between" => Ok(ThresholdOperator::Between),
            _ => Err(RiskError::InvalidOperator(s.to_string())),
        }
    }
}

/// A metric limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Threshold {
    pub id: Uuid,
    pub name: String,
    pub metric: String,

    /// Current limit; re-pointed in place by dynamic adaptation
    pub value: f64,

    pub operator: ThresholdOperator,
    pub upper_bound: Option<f64>,
    pub severity: Severity,
    pub enabled: bool,
    pub last_triggered: Option<DateTime<Utc>>,
    pub trigger_count: u64,

    /// Minimum time between two violations, in milliseconds
    pub cooldown_period_ms: u64,

    pub created_at: DateTime<Utc>,
}

impl Threshold {
    /// Cooldown as a chrono duration
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.cooldown_period_ms.min(i64::MAX as u64) as i64)
    }

    /// Check whether a violation at `at` would fall inside the cooldown of
    /// the latest trigger. Samples older than `last_triggered` are measured
    /// the same way.
    pub fn in_cooldown(&self, at: DateTime<Utc>) -> bool {
        self.last_triggered
            .map_or(false, |last| self.cooldown_covers(last, at))
    }

    /// Check whether `at` is less than one cooldown away from `fired_at`,
    /// in either direction
    pub fn cooldown_covers(&self, fired_at: DateTime<Utc>, at: DateTime<Utc>) -> bool {
        let elapsed = at - fired_at;
        let cooldown = self.cooldown();
        elapsed < cooldown && elapsed > -cooldown
    }

    /// Check whether a value breaches this threshold
    pub fn is_breached(&self, value: f64) -> bool {
        self.operator.evaluate(value, self.value, self.upper_bound)
    }

    fn describe(&self, metric_value: f64) -> String {
        match (self.operator, self.upper_bound) {
            (ThresholdOperator::Between, Some(upper)) => format!(
                "Threshold '{}' breached: {} = {:.4} within [{:.4}, {:.4}]",
                self.name, self.metric, metric_value, self.value, upper
            ),
            _ => format!(
                "Threshold '{}' breached: {} = {:.4} {} {:.4}",
                self.name,
                self.metric,
                metric_value,
                self.operator.as_str(),
                self.value
            ),
        }
    }
}

/// Definition of a new threshold, with defaults `Gt`, `Warning` and a 60s cooldown
#[derive(Debug, Clone)]
pub struct ThresholdSpec {
    pub name: String,
    pub metric: String,
    pub value: f64,
    pub operator: ThresholdOperator,
    pub upper_bound: Option<f64>,
    pub severity: Severity,
    pub cooldown: Duration,
}

impl ThresholdSpec {
    pub fn new(name: impl Into<String>, metric: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            value,
            operator: ThresholdOperator::Gt,
            upper_bound: None,
            severity: Severity::Warning,
            cooldown: Duration::from_secs(60),
        }
    }

    pub fn operator(mut self, operator: ThresholdOperator) -> Self {
        self.operator = operator;
        self
    }

    pub fn upper_bound(mut self, upper_bound: f64) -> Self {
        self.upper_bound = Some(upper_bound);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Adaptive policy for a metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicThresholdConfig {
    pub metric: String,
    pub base_value: f64,
    pub adapt_to_history: bool,

    /// Width of the history window, in seconds
    pub history_window_secs: u64,

    pub deviation_multiplier: f64,
}

impl DynamicThresholdConfig {
    /// Default policy: 7-day window, 2.0 standard deviations
    pub fn new(metric: impl Into<String>, base_value: f64) -> Self {
        Self {
            metric: metric.into(),
            base_value,
            adapt_to_history: true,
            history_window_secs: 7 * 24 * 60 * 60,
            deviation_multiplier: 2.0,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.history_window_secs = window.as_secs();
        self
    }

    pub fn with_multiplier(mut self, deviation_multiplier: f64) -> Self {
        self.deviation_multiplier = deviation_multiplier;
        self
    }

    pub fn history_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.history_window_secs.min(i64::MAX as u64 / 1000) as i64)
    }
}

/// A detected breach
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdViolation {
    pub id: Uuid,
    pub threshold_id: Uuid,
    pub threshold_name: String,
    pub metric: String,
    pub timestamp: DateTime<Utc>,
    pub metric_value: f64,
    pub threshold_value: f64,
    pub severity: Severity,
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
}

/// Week-over-week direction of violation counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// Aggregated violation statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationStats {
    pub total: usize,
    pub unacknowledged: usize,
    pub by_severity: HashMap<Severity, usize>,
    pub by_metric: HashMap<String, usize>,
    pub last_week: usize,
    pub previous_week: usize,
    pub trend: ViolationTrend,
}

/// Persistable state of a manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSnapshot {
    pub exported_at: DateTime<Utc>,
    pub thresholds: Vec<Threshold>,
    pub violations: Vec<ThresholdViolation>,
    pub dynamic_configs: Vec<DynamicThresholdConfig>,
}

/// Threshold manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdManagerConfig {
    /// Samples kept per metric
    pub max_history_per_metric: usize,

    /// Windowed samples required before a dynamic threshold adapts
    pub min_dynamic_samples: usize,

    /// Violations kept; oldest are evicted first
    pub max_violations: usize,

    /// Difference in weekly violation counts treated as noise
    pub trend_dead_zone: usize,
}

impl Default for ThresholdManagerConfig {
    fn default() -> Self {
        Self {
            max_history_per_metric: 1000,
            min_dynamic_samples: 10,
            max_violations: 10_000,
            trend_dead_zone: 3,
        }
    }
}

#[derive(Default)]
struct ThresholdState {
    /// Thresholds in definition order
    thresholds: Vec<Threshold>,
    dynamic_configs: HashMap<String, DynamicThresholdConfig>,
    history: HashMap<String, VecDeque<(DateTime<Utc>, f64)>>,
    violations: VecDeque<ThresholdViolation>,
}

/// Threshold manager owning thresholds, metric history and violations
pub struct ThresholdManager {
    config: ThresholdManagerConfig,
    state: RwLock<ThresholdState>,
}

impl ThresholdManager {
    /// Create a new threshold manager
    pub fn new(config: ThresholdManagerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(ThresholdState::default()),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &ThresholdManagerConfig {
        &self.config
    }

    /// Define a static threshold
    pub fn define_threshold(&self, spec: ThresholdSpec) -> Threshold {
        let threshold = Threshold {
            id: Uuid::new_v4(),
            name: spec.name,
            metric: spec.metric,
            value: spec.value,
            operator: spec.operator,
            upper_bound: spec.upper_bound,
            severity: spec.severity,
            enabled: true,
            last_triggered: None,
            trigger_count: 0,
            cooldown_period_ms: spec.cooldown.as_millis().min(u64::MAX as u128) as u64,
            created_at: Utc::now(),
        };

        if threshold.operator == ThresholdOperator::Between && threshold.upper_bound.is_none() {
            warn!(
                "Threshold '{}' uses BETWEEN without an upper bound and will never trigger",
                threshold.name
            );
        }

        info!(
            "Defining threshold: {} ({} {} {})",
            threshold.name,
            threshold.metric,
            threshold.operator.as_str(),
            threshold.value
        );
        self.state.write().thresholds.push(threshold.clone());
        threshold
    }

    /// Define a threshold that adapts to the metric's recent history.
    ///
    /// The metric and base value of `config`, if given, are replaced by the
    /// arguments. A metric has one policy; defining another replaces it.
    pub fn define_dynamic_threshold(
        &self,
        name: impl Into<String>,
        metric: impl Into<String>,
        base_value: f64,
        config: Option<DynamicThresholdConfig>,
    ) -> Threshold {
        self.define_adaptive_threshold(ThresholdSpec::new(name, metric, base_value), config)
    }

    /// Like [`define_dynamic_threshold`](Self::define_dynamic_threshold), keeping
    /// the operator, severity and cooldown of `spec`. `spec.value` is the base value.
    pub fn define_adaptive_threshold(
        &self,
        spec: ThresholdSpec,
        config: Option<DynamicThresholdConfig>,
    ) -> Threshold {
        let mut dynamic =
            config.unwrap_or_else(|| DynamicThresholdConfig::new(&spec.metric, spec.value));
        dynamic.metric = spec.metric.clone();
        dynamic.base_value = spec.value;

        debug!(
            metric = %spec.metric,
            window_secs = dynamic.history_window_secs,
            multiplier = dynamic.deviation_multiplier,
            "Registering dynamic threshold policy"
        );
        self.state
            .write()
            .dynamic_configs
            .insert(spec.metric.clone(), dynamic);

        self.define_threshold(spec)
    }

    /// Record a sample and return the violations it caused
    pub fn check_thresholds(&self, metric: &str, value: f64) -> Vec<ThresholdViolation> {
        self.check_thresholds_at(metric, value, Utc::now())
    }

    /// Record a sample observed at `at` and return the violations it caused
    pub fn check_thresholds_at(
        &self,
        metric: &str,
        value: f64,
        at: DateTime<Utc>,
    ) -> Vec<ThresholdViolation> {
        if !value.is_finite() {
            warn!(metric, "Ignoring non-finite metric sample");
            return Vec::new();
        }

        let mut state = self.state.write();
        let state = &mut *state;

        let history = state.history.entry(metric.to_string()).or_default();
        history.push_back((at, value));
        while history.len() > self.config.max_history_per_metric.max(1) {
            history.pop_front();
        }

        if let Some(dynamic) = state.dynamic_configs.get(metric) {
            if dynamic.adapt_to_history {
                let window_start = at - dynamic.history_window();
                let windowed: Vec<f64> = history
                    .iter()
                    .filter(|(ts, _)| *ts >= window_start)
                    .map(|(_, v)| *v)
                    .collect();

                if windowed.len() >= self.config.min_dynamic_samples {
                    let mean = windowed.iter().mean();
                    let std_dev = windowed.iter().population_std_dev();
                    let adapted = mean + dynamic.deviation_multiplier * std_dev;

                    for threshold in state.thresholds.iter_mut().filter(|t| t.metric == metric) {
                        threshold.value = adapted;
                    }
                    debug!(
                        metric,
                        samples = windowed.len(),
                        mean,
                        std_dev,
                        adapted,
                        "Dynamic threshold recomputed"
                    );
                }
            }
        }

        let mut violations = Vec::new();
        for threshold in state
            .thresholds
            .iter_mut()
            .filter(|t| t.metric == metric && t.enabled)
        {
            if threshold.in_cooldown(at) || !threshold.is_breached(value) {
                continue;
            }

            // Out-of-order samples are also spaced from every retained trigger
            let near_earlier_trigger = state.violations.iter().any(|v| {
                v.threshold_id == threshold.id && threshold.cooldown_covers(v.timestamp, at)
            });
            if near_earlier_trigger {
                continue;
            }

            threshold.trigger_count += 1;
            threshold.last_triggered =
                Some(threshold.last_triggered.map_or(at, |last| last.max(at)));

            violations.push(ThresholdViolation {
                id: Uuid::new_v4(),
                threshold_id: threshold.id,
                threshold_name: threshold.name.clone(),
                metric: metric.to_string(),
                timestamp: at,
                metric_value: value,
                threshold_value: threshold.value,
                severity: threshold.severity,
                message: threshold.describe(value),
                acknowledged: false,
                acknowledged_at: None,
                acknowledged_by: None,
            });
        }

        state.violations.extend(violations.iter().cloned());
        while state.violations.len() > self.config.max_violations.max(1) {
            state.violations.pop_front();
        }

        for violation in &violations {
            warn!(
                severity = violation.severity.as_str(),
                "🚨 {}",
                violation.message
            );
            metrics::counter!(
                "aegis_threshold_violations_total",
                1,
                "severity" => violation.severity.as_str()
            );
        }

        violations
    }

    /// Acknowledge a violation. Returns false for an unknown id.
    pub fn acknowledge_violation(&self, id: Uuid, by: &str) -> bool {
        let mut state = self.state.write();
        match state.violations.iter_mut().find(|v| v.id == id) {
            Some(violation) => {
                if !violation.acknowledged {
                    violation.acknowledged = true;
                    violation.acknowledged_at = Some(Utc::now());
                    violation.acknowledged_by = Some(by.to_string());
                    info!("✅ Violation {} acknowledged by {}", id, by);
                }
                true
            }
            None => false,
        }
    }

    /// Enable or disable a threshold. Returns false for an unknown id.
    pub fn set_enabled(&self, id: Uuid, enabled: bool) -> bool {
        let mut state = self.state.write();
        match state.thresholds.iter_mut().find(|t| t.id == id) {
            Some(threshold) => {
                threshold.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Remove a threshold. Returns false for an unknown id.
    pub fn remove_threshold(&self, id: Uuid) -> bool {
        let mut state = self.state.write();
        let before = state.thresholds.len();
        state.thresholds.retain(|t| t.id != id);
        state.thresholds.len() != before
    }

    /// Get a threshold by id
    pub fn get_threshold(&self, id: Uuid) -> Option<Threshold> {
        self.state.read().thresholds.iter().find(|t| t.id == id).cloned()
    }

    /// All thresholds, in definition order
    pub fn list_thresholds(&self) -> Vec<Threshold> {
        self.state.read().thresholds.clone()
    }

    /// Thresholds watching a metric
    pub fn thresholds_for_metric(&self, metric: &str) -> Vec<Threshold> {
        self.state
            .read()
            .thresholds
            .iter()
            .filter(|t| t.metric == metric)
            .cloned()
            .collect()
    }

    /// Dynamic policy for a metric
    pub fn dynamic_config(&self, metric: &str) -> Option<DynamicThresholdConfig> {
        self.state.read().dynamic_configs.get(metric).cloned()
    }

    /// Number of retained samples for a metric
    pub fn metric_history_len(&self, metric: &str) -> usize {
        self.state
            .read()
            .history
            .get(metric)
            .map_or(0, |h| h.len())
    }

    /// Violations, newest first
    pub fn violations(&self, unacknowledged_only: bool) -> Vec<ThresholdViolation> {
        self.state
            .read()
            .violations
            .iter()
            .rev()
            .filter(|v| !unacknowledged_only || !v.acknowledged)
            .cloned()
            .collect()
    }

    /// Aggregate violation statistics relative to now
    pub fn get_violation_stats(&self) -> ViolationStats {
        self.get_violation_stats_at(Utc::now())
    }

    /// Aggregate violation statistics relative to `now`
    pub fn get_violation_stats_at(&self, now: DateTime<Utc>) -> ViolationStats {
        let state = self.state.read();
        let week = chrono::Duration::days(7);

        let mut by_severity = HashMap::new();
        let mut by_metric = HashMap::new();
        let mut unacknowledged = 0;
        let mut last_week = 0;
        let mut previous_week = 0;

        for violation in state.violations.iter() {
            *by_severity.entry(violation.severity).or_insert(0) += 1;
            *by_metric.entry(violation.metric.clone()).or_insert(0) += 1;
            if !violation.acknowledged {
                unacknowledged += 1;
            }

            let age = now - violation.timestamp;
            if age >= chrono::Duration::zero() && age < week {
                last_week += 1;
            } else if age >= week && age < week * 2 {
                previous_week += 1;
            }
        }

        let dead_zone = self.config.trend_dead_zone as i64;
        let delta = last_week as i64 - previous_week as i64;
        let trend = if delta > dead_zone {
            ViolationTrend::Increasing
        } else if delta < -dead_zone {
            ViolationTrend::Decreasing
        } else {
            ViolationTrend::Stable
        };

        ViolationStats {
            total: state.violations.len(),
            unacknowledged,
            by_severity,
            by_metric,
            last_week,
            previous_week,
            trend,
        }
    }

    /// Snapshot thresholds, violations and dynamic policies
    pub fn export_snapshot(&self) -> ThresholdSnapshot {
        let state = self.state.read();
        let mut dynamic_configs: Vec<DynamicThresholdConfig> =
            state.dynamic_configs.values().cloned().collect();
        dynamic_configs.sort_by(|a, b| a.metric.cmp(&b.metric));

        ThresholdSnapshot {
            exported_at: Utc::now(),
            thresholds: state.thresholds.clone(),
            violations: state.violations.iter().cloned().collect(),
            dynamic_configs,
        }
    }

    /// Replace thresholds, violations and dynamic policies with a snapshot.
    /// Metric history is left untouched.
    pub fn import_snapshot(&self, snapshot: ThresholdSnapshot) {
        let mut state = self.state.write();
        state.thresholds = snapshot.thresholds;
        state.violations = snapshot.violations.into_iter().collect();
        while state.violations.len() > self.config.max_violations.max(1) {
            state.violations.pop_front();
        }
        state.dynamic_configs = snapshot
            .dynamic_configs
            .into_iter()
            .map(|c| (c.metric.clone(), c))
            .collect();

        info!(
            "Imported threshold snapshot: {} thresholds, {} violations, {} dynamic policies",
            state.thresholds.len(),
            state.violations.len(),
            state.dynamic_configs.len()
        );
    }

    /// Export as a JSON document
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export_snapshot())?)
    }

    /// Import from a JSON document
    pub fn import_json(&self, json: &str) -> Result<()> {
        let snapshot: ThresholdSnapshot = serde_json::from_str(json)?;
        self.import_snapshot(snapshot);
        Ok(())
    }
}

impl Default for ThresholdManager {
    fn default() -> Self {
        Self::new(ThresholdManagerConfig::default())
    }
}

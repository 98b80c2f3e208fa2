//! Evaluation engine - global performance metrics, goals and scores
//!
//! Sectors never write performance metrics. They report deltas in
//! `metric_contributions`; once per tick the engine sums those deltas,
//! applies environmental recovery, and scores every metric against its goal.
//! The resulting [`EvaluationResult`] is the only thing policies see.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::config::{ConfigError, EnvironmentConfig};
use crate::sectors::SectorMetrics;

/// Well-known metric ids that sectors contribute to
pub mod metric_ids {
    /// Fraction of surfaces covered by disturbed regolith dust
    pub const DUST_COVERAGE: &str = "IND-DUST-COV";
    /// Cumulative science output
    pub const SCIENCE_OUTPUT: &str = "IND-SCI-OUT";
    /// Modules completed by construction
    pub const MODULES_BUILT: &str = "IND-MOD-BUILT";
    /// Cumulative unmet power demand (kWh)
    pub const POWER_SHORTFALL: &str = "IND-PWR-SHORT";
    /// Cumulative ISRU output (kg)
    pub const RESOURCE_OUTPUT: &str = "IND-ISRU-OUT";
    /// Equipment units fabricated on site
    pub const EQUIPMENT_BUILT: &str = "IND-EQP-BUILT";
    /// Cargo units delivered by rocket
    pub const CARGO_DELIVERED: &str = "IND-CARGO-DEL";
}

/// Whether a goal wants its metric low or high
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalDirection {
    Minimize,
    Maximize,
}

impl FromStr for GoalDirection {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimize" => Ok(GoalDirection::Minimize),
            "maximize" => Ok(GoalDirection::Maximize),
            other => Err(ConfigError::InvalidGoalDirection(other.to_string())),
        }
    }
}

/// A target for one performance metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceGoal {
    pub id: String,
    pub metric_id: String,
    pub target: f64,
    pub direction: GoalDirection,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl PerformanceGoal {
    /// Build a goal from loosely-typed parts, validating direction and weight.
    pub fn new(
        id: impl Into<String>,
        metric_id: impl Into<String>,
        target: f64,
        direction: &str,
        weight: f64,
    ) -> Result<Self, ConfigError> {
        let id = id.into();
        let direction = direction.parse()?;
        if weight < 0.0 {
            return Err(ConfigError::NegativeGoalWeight { goal: id, weight });
        }
        Ok(Self {
            id,
            metric_id: metric_id.into(),
            target,
            direction,
            weight,
        })
    }

    /// Whether `current` meets this goal
    pub fn is_met(&self, current: f64) -> bool {
        match self.direction {
            GoalDirection::Minimize => current <= self.target,
            GoalDirection::Maximize => current >= self.target,
        }
    }
}

/// How a metric accumulates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Running total of contributions
    #[default]
    Cumulative,
    /// Level that rises and recovers (e.g. dust coverage)
    Indicator,
}

/// Alert levels for a metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricThresholds {
    pub warning: f64,
    pub critical: f64,
}

/// Definition of a tracked performance metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub kind: MetricKind,
    #[serde(default)]
    pub initial_value: f64,
    #[serde(default)]
    pub thresholds: Option<MetricThresholds>,
}

/// Goal achievement status of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Within,
    Outside,
    Unknown,
}

impl fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetricStatus::Within => "within",
            MetricStatus::Outside => "outside",
            MetricStatus::Unknown => "unknown",
        })
    }
}

/// Score of one metric in one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub current: f64,
    pub status: MetricStatus,
    /// 0.0..=1.0, `None` when the metric has no goal
    pub score: Option<f64>,
    pub goal: Option<PerformanceGoal>,
}

/// Immutable snapshot produced once per tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub step: u64,
    /// Metric values after this tick's contributions and decay
    pub metrics: BTreeMap<String, f64>,
    pub reports: BTreeMap<String, ScoreReport>,
    /// Summed contributions applied this tick
    pub deltas: BTreeMap<String, f64>,
}

impl EvaluationResult {
    pub fn current(&self, metric_id: &str) -> Option<f64> {
        self.metrics.get(metric_id).copied()
    }

    pub fn goal(&self, metric_id: &str) -> Option<&PerformanceGoal> {
        self.reports.get(metric_id).and_then(|r| r.goal.as_ref())
    }

    pub fn status(&self, metric_id: &str) -> MetricStatus {
        self.reports
            .get(metric_id)
            .map_or(MetricStatus::Unknown, |r| r.status)
    }

    /// Weighted mean of all goal scores (1.0 when no goal carries weight).
    pub fn overall_score(&self) -> f64 {
        let (weighted, total_weight) = self
            .reports
            .values()
            .filter_map(|r| Some((r.score?, r.goal.as_ref()?.weight)))
            .fold((0.0, 0.0), |(acc, w), (score, weight)| {
                (acc + score * weight, w + weight)
            });
        if total_weight <= 0.0 {
            1.0
        } else {
            weighted / total_weight
        }
    }
}

/// Normalized goal score, 0.0..=1.0.
///
/// Minimize goals score 1.0 at or below target and fall linearly to 0.0 at a
/// baseline of twice the target (1.0 when the target is zero). Maximize goals
/// score `current / target` below target.
pub fn score_goal(goal: &PerformanceGoal, current: f64) -> f64 {
    let target = goal.target;
    match goal.direction {
        GoalDirection::Minimize => {
            if current <= target {
                return 1.0;
            }
            let baseline = if target == 0.0 { 1.0 } else { 2.0 * target };
            if baseline <= target || current >= baseline {
                return 0.0;
            }
            ((baseline - current) / (baseline - target)).clamp(0.0, 1.0)
        }
        GoalDirection::Maximize => {
            if current >= target {
                1.0
            } else if target <= 0.0 {
                0.0
            } else {
                (current / target).clamp(0.0, 1.0)
            }
        }
    }
}

/// Aggregates sector contributions into performance metrics and scores them
#[derive(Debug, Clone)]
pub struct EvaluationEngine {
    definitions: Vec<MetricDefinition>,
    /// Goals keyed by metric id
    goals: BTreeMap<String, PerformanceGoal>,
    metrics: BTreeMap<String, f64>,
    environment_metric: String,
    step: u64,
}

impl EvaluationEngine {
    pub fn new(
        definitions: &[MetricDefinition],
        goals: &[PerformanceGoal],
        environment: &EnvironmentConfig,
    ) -> Self {
        let metrics = definitions
            .iter()
            .map(|d| (d.id.clone(), d.initial_value))
            .collect();
        Self {
            definitions: definitions.to_vec(),
            goals: goals
                .iter()
                .map(|g| (g.metric_id.clone(), g.clone()))
                .collect(),
            metrics,
            environment_metric: environment.dust_metric.clone(),
            step: 0,
        }
    }

    pub fn definitions(&self) -> &[MetricDefinition] {
        &self.definitions
    }

    pub fn metric(&self, metric_id: &str) -> Option<f64> {
        self.metrics.get(metric_id).copied()
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    pub fn goal(&self, metric_id: &str) -> Option<&PerformanceGoal> {
        self.goals.get(metric_id)
    }

    /// Overwrite a metric value, e.g. when restoring from a snapshot.
    pub fn set_metric(&mut self, metric_id: &str, value: f64) {
        self.metrics.insert(metric_id.to_string(), value);
    }

    /// Number of evaluations run so far
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn set_step(&mut self, step: u64) {
        self.step = step;
    }

    /// Sum every sector's contributions per metric and add the sums to the
    /// running values. Returns the sums, not the new totals.
    pub fn apply_metric_contributions(
        &mut self,
        sector_metrics: &[SectorMetrics],
    ) -> BTreeMap<String, f64> {
        let mut deltas: BTreeMap<String, f64> = BTreeMap::new();
        for sector in sector_metrics {
            for (metric_id, delta) in &sector.metric_contributions {
                *deltas.entry(metric_id.clone()).or_insert(0.0) += delta;
            }
        }
        for (metric_id, delta) in &deltas {
            *self.metrics.entry(metric_id.clone()).or_insert(0.0) += delta;
        }
        deltas
    }

    /// Passive recovery of the environmental metric, floored at zero.
    pub fn apply_environment_dynamics(&mut self, decay_rate: f64) {
        if let Some(value) = self.metrics.get_mut(&self.environment_metric) {
            *value = (*value - decay_rate).max(0.0);
        }
    }

    /// Score for `metric_id`, or `None` without a goal.
    pub fn calculate_score(&self, metric_id: &str) -> Option<f64> {
        let goal = self.goals.get(metric_id)?;
        let current = self.metric(metric_id).unwrap_or(0.0);
        Some(score_goal(goal, current))
    }

    pub fn determine_metric_status(&self, metric_id: &str) -> MetricStatus {
        match self.goals.get(metric_id) {
            None => MetricStatus::Unknown,
            Some(goal) if goal.is_met(self.metric(metric_id).unwrap_or(0.0)) => {
                MetricStatus::Within
            }
            Some(_) => MetricStatus::Outside,
        }
    }

    /// Contributions, then decay, then a full score report.
    pub fn evaluate(&mut self, sector_metrics: &[SectorMetrics], decay_rate: f64) -> EvaluationResult {
        let deltas = self.apply_metric_contributions(sector_metrics);
        self.apply_environment_dynamics(decay_rate);
        self.step += 1;

        let ids: BTreeSet<&String> = self
            .definitions
            .iter()
            .map(|d| &d.id)
            .chain(self.goals.keys())
            .collect();

        let reports = ids
            .into_iter()
            .map(|id| {
                let report = ScoreReport {
                    current: self.metric(id).unwrap_or(0.0),
                    status: self.determine_metric_status(id),
                    score: self.calculate_score(id),
                    goal: self.goals.get(id).cloned(),
                };
                (id.clone(), report)
            })
            .collect();

        EvaluationResult {
            step: self.step,
            metrics: self.metrics.clone(),
            reports,
            deltas,
        }
    }
}

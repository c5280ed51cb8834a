//! Value types shared by experiments, suggestions and trials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of the optimization objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveType {
    Minimize,
    Maximize,
}

impl ObjectiveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimize => "minimize",
            Self::Maximize => "maximize",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "minimize" => Some(Self::Minimize),
            "maximize" => Some(Self::Maximize),
            _ => None,
        }
    }

    /// Whether `candidate` improves on `incumbent`. Strict comparison, so
    /// the first occurrence of a value wins ties.
    pub fn is_better(&self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Minimize => candidate < incumbent,
            Self::Maximize => candidate > incumbent,
        }
    }

    /// Whether `value` reaches the objective goal.
    pub fn meets_goal(&self, value: f64, goal: f64) -> bool {
        match self {
            Self::Minimize => value <= goal,
            Self::Maximize => value >= goal,
        }
    }
}

/// What the experiment optimizes, and which extra metrics it records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveSpec {
    #[serde(rename = "type")]
    pub objective_type: ObjectiveType,
    /// Optional target; reaching it terminates the experiment early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<f64>,
    pub objective_metric_name: String,
    #[serde(default)]
    pub additional_metric_names: Vec<String>,
}

impl ObjectiveSpec {
    /// All metric names this objective tracks, objective metric first.
    pub fn metric_names(&self) -> Vec<&str> {
        let mut names = vec![self.objective_metric_name.as_str()];
        names.extend(self.additional_metric_names.iter().map(String::as_str));
        names
    }
}

/// A single named setting passed to the search algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmSetting {
    pub name: String,
    pub value: String,
}

/// The search algorithm choice plus its settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmSpec {
    pub algorithm_name: String,
    #[serde(default)]
    pub algorithm_settings: Vec<AlgorithmSetting>,
}

/// One concrete value for one search-space parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterAssignment {
    pub name: String,
    pub value: String,
}

/// Best observed value of a named metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
}

/// The per-trial record of best metric values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

impl Observation {
    pub fn metric_value(&self, name: &str) -> Option<f64> {
        self.metrics.iter().find(|m| m.name == name).map(|m| m.value)
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// One entry of a workload's observation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub value: f64,
}

/// The time-series of metric values a single workload emitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationLog {
    #[serde(default)]
    pub entries: Vec<MetricEntry>,
}

impl ObservationLog {
    /// Best value of `metric` under the given objective direction.
    /// Ties are broken by first occurrence.
    pub fn best_value(&self, metric: &str, objective: ObjectiveType) -> Option<f64> {
        let mut best: Option<f64> = None;
        for entry in self.entries.iter().filter(|e| e.name == metric) {
            best = match best {
                None => Some(entry.value),
                Some(current) if objective.is_better(entry.value, current) => Some(entry.value),
                Some(current) => Some(current),
            };
        }
        best
    }

    /// Number of entries recorded for `metric`, used as the step count by
    /// early-stopping rules.
    pub fn step_count(&self, metric: &str) -> usize {
        self.entries.iter().filter(|e| e.name == metric).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Comparison operator of an early-stopping rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonType {
    Less,
    Greater,
    Equal,
}

/// A rule that stops a trial once a metric crosses a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStoppingRule {
    pub metric: String,
    pub value: f64,
    pub comparison: ComparisonType,
    /// Rule only fires once the metric has at least this many entries.
    #[serde(default)]
    pub start_step: usize,
}

impl EarlyStoppingRule {
    /// Whether the rule fires against the given observation log.
    pub fn matches(&self, log: &ObservationLog) -> bool {
        if log.step_count(&self.metric) < self.start_step.max(1) {
            return false;
        }
        log.entries
            .iter()
            .filter(|e| e.name == self.metric)
            .skip(self.start_step.saturating_sub(1))
            .any(|e| match self.comparison {
                ComparisonType::Less => e.value < self.value,
                ComparisonType::Greater => e.value > self.value,
                ComparisonType::Equal => (e.value - self.value).abs() < f64::EPSILON,
            })
    }
}

/// One parameter assignment produced by the algorithm, named after the trial
/// it will become.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialAssignment {
    pub name: String,
    pub parameter_assignments: Vec<ParameterAssignment>,
    #[serde(default)]
    pub early_stopping_rules: Vec<EarlyStoppingRule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, value: f64) -> MetricEntry {
        MetricEntry {
            timestamp: Utc::now(),
            name: name.to_string(),
            value,
        }
    }

    #[test]
    fn test_objective_direction() {
        assert!(ObjectiveType::Minimize.is_better(0.1, 0.2));
        assert!(!ObjectiveType::Minimize.is_better(0.2, 0.2));
        assert!(ObjectiveType::Maximize.is_better(0.9, 0.8));
        assert!(!ObjectiveType::Maximize.is_better(0.8, 0.8));
    }

    #[test]
    fn test_goal_check() {
        assert!(ObjectiveType::Maximize.meets_goal(0.95, 0.9));
        assert!(ObjectiveType::Maximize.meets_goal(0.9, 0.9));
        assert!(!ObjectiveType::Maximize.meets_goal(0.89, 0.9));
        assert!(ObjectiveType::Minimize.meets_goal(0.05, 0.1));
    }

    #[test]
    fn test_best_value_selection() {
        let log = ObservationLog {
            entries: vec![
                entry("accuracy", 0.7),
                entry("accuracy", 0.9),
                entry("loss", 0.4),
                entry("accuracy", 0.8),
            ],
        };

        assert_eq!(log.best_value("accuracy", ObjectiveType::Maximize), Some(0.9));
        assert_eq!(log.best_value("accuracy", ObjectiveType::Minimize), Some(0.7));
        assert_eq!(log.best_value("loss", ObjectiveType::Minimize), Some(0.4));
        assert_eq!(log.best_value("missing", ObjectiveType::Minimize), None);
    }

    #[test]
    fn test_early_stopping_rule_respects_start_step() {
        let rule = EarlyStoppingRule {
            metric: "accuracy".to_string(),
            value: 0.6,
            comparison: ComparisonType::Less,
            start_step: 3,
        };

        let mut log = ObservationLog {
            entries: vec![entry("accuracy", 0.5), entry("accuracy", 0.55)],
        };
        // Below threshold, but not enough steps yet.
        assert!(!rule.matches(&log));

        log.entries.push(entry("accuracy", 0.58));
        assert!(rule.matches(&log));
    }

    #[test]
    fn test_early_stopping_rule_ignores_prior_steps() {
        let rule = EarlyStoppingRule {
            metric: "accuracy".to_string(),
            value: 0.6,
            comparison: ComparisonType::Less,
            start_step: 2,
        };

        // Only the first entry is below the threshold; from start_step on the
        // metric recovered, so the rule must not fire.
        let log = ObservationLog {
            entries: vec![
                entry("accuracy", 0.3),
                entry("accuracy", 0.7),
                entry("accuracy", 0.8),
            ],
        };
        assert!(!rule.matches(&log));
    }
}

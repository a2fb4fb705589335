//! Quality Framework: domain-keyed threshold registry, loaded once at
//! startup and read-only afterward (spec.md §4.4).
//!
//! There is no teacher equivalent of a pluggable metric-extractor registry;
//! this is built in the idiom of the reference service's other read-only,
//! `Arc`-shared, load-once-at-startup registries ([`crate::agent_card`]),
//! with scoring logic shaped like a smaller, synchronous cousin of
//! `executor/retry.rs`'s classify-then-decide structure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A named numeric threshold requirement, e.g. `confidence: 0.75`.
pub type ThresholdMap = HashMap<String, f64>;

/// Domain-keyed set of quality profiles (spec.md §3 "Quality Profile"):
/// `BUSINESS`, `ACADEMIC`, `SERVICE`, `GENERIC`, `CREATIVE`, `ANALYTICAL`,
/// `CODING`, `COMMUNICATION`, or any operator-defined domain name.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QualityConfig {
    pub domains: HashMap<String, ThresholdMap>,
    /// Per-agent threshold overrides; merged over the domain thresholds by
    /// metric name, with the agent's value winning (spec.md §4.4).
    #[serde(default)]
    pub agent_overrides: HashMap<String, ThresholdMap>,
}

/// Structured failure payload surfaced to the Orchestrator (spec.md §4.4,
/// §7): "recoverable by one re-planning cycle; unrecoverable after the
/// retry budget".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityFailure {
    pub domain: String,
    pub failing: Vec<String>,
    pub score_per_metric: HashMap<String, f64>,
    pub overall: f64,
}

/// Result of [`QualityFramework::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub score_per_metric: HashMap<String, f64>,
    pub overall: f64,
    pub failing: Vec<String>,
}

impl ValidationOutcome {
    pub fn into_failure(self, domain: &str) -> Option<QualityFailure> {
        if self.passed {
            None
        } else {
            Some(QualityFailure {
                domain: domain.to_string(),
                failing: self.failing,
                score_per_metric: self.score_per_metric,
                overall: self.overall,
            })
        }
    }
}

/// Extracts a metric's raw score from an agent result payload. The default
/// extractor looks up `result["metrics"][name]`; domain-specific heuristics
/// (e.g. a token-length-based completeness estimate) can be registered over
/// it per metric name.
pub trait MetricExtractor: Send + Sync {
    fn extract(&self, metric: &str, result: &Value) -> Option<f64>;
}

/// Reads `result.metrics[name]` if present.
pub struct DefaultExtractor;

impl MetricExtractor for DefaultExtractor {
    fn extract(&self, metric: &str, result: &Value) -> Option<f64> {
        result.get("metrics")?.get(metric)?.as_f64()
    }
}

/// Falls back to a token-length-based completeness estimate when no
/// `metrics.completeness` field is present: longer responses score higher,
/// saturating at 200 whitespace-separated tokens.
pub struct CompletenessHeuristic;

impl MetricExtractor for CompletenessHeuristic {
    fn extract(&self, metric: &str, result: &Value) -> Option<f64> {
        if metric != "completeness" {
            return None;
        }
        if let Some(score) = result.get("metrics").and_then(|m| m.get(metric)).and_then(|v| v.as_f64()) {
            return Some(score);
        }
        let text = result.get("text").and_then(|v| v.as_str())?;
        let tokens = text.split_whitespace().count();
        Some((tokens as f64 / 200.0).min(1.0))
    }
}

/// Process-wide, read-only quality validation registry.
pub struct QualityFramework {
    config: QualityConfig,
    extractors: HashMap<String, Box<dyn MetricExtractor>>,
    default_extractor: Box<dyn MetricExtractor>,
}

impl QualityFramework {
    pub fn new(config: QualityConfig) -> Self {
        let mut extractors: HashMap<String, Box<dyn MetricExtractor>> = HashMap::new();
        extractors.insert("completeness".to_string(), Box::new(CompletenessHeuristic));
        Self {
            config,
            extractors,
            default_extractor: Box::new(DefaultExtractor),
        }
    }

    pub fn register_extractor(&mut self, metric: impl Into<String>, extractor: Box<dyn MetricExtractor>) {
        self.extractors.insert(metric.into(), extractor);
    }

    fn thresholds_for(&self, domain: &str, agent_id: Option<&str>) -> ThresholdMap {
        let mut thresholds = self.config.domains.get(domain).cloned().unwrap_or_default();
        if let Some(agent_id) = agent_id {
            if let Some(overrides) = self.config.agent_overrides.get(agent_id) {
                for (metric, value) in overrides {
                    thresholds.insert(metric.clone(), *value);
                }
            }
        }
        thresholds
    }

    /// `validate(domain, result) -> {passed, score_per_metric, overall, failing}`
    /// (spec.md §4.4). `agent_id` selects the per-agent override set, if any.
    pub fn validate(&self, domain: &str, agent_id: Option<&str>, result: &Value) -> ValidationOutcome {
        let thresholds = self.thresholds_for(domain, agent_id);
        let mut score_per_metric = HashMap::new();
        let mut failing = Vec::new();
        let mut ratio_sum = 0.0;

        for (metric, threshold) in &thresholds {
            let extractor = self.extractors.get(metric).unwrap_or(&self.default_extractor);
            let score = extractor.extract(metric, result).unwrap_or(0.0);
            score_per_metric.insert(metric.clone(), score);

            let ratio = if *threshold > 0.0 { score / threshold } else { 1.0 };
            ratio_sum += ratio.min(1.0);

            if score < *threshold {
                failing.push(metric.clone());
            }
        }

        let overall = if thresholds.is_empty() {
            1.0
        } else {
            ratio_sum / thresholds.len() as f64
        };

        ValidationOutcome {
            passed: failing.is_empty(),
            score_per_metric,
            overall,
            failing,
        }
    }
}

pub type SharedQualityFramework = Arc<QualityFramework>;

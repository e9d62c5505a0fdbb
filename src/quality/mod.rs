//! Quality feedback tracking.
//!
//! Records a score for every executed stage and keeps, per
//! (workflow, stage, tier), a running average, min/max and a trend over the
//! most recent samples. The output is advisory: nothing here feeds back into
//! routing.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub mod scorer;

pub use scorer::{KeywordScorer, QualityScorer, ScoringContext, ScoringError};

use crate::config::QualityConfig;
use crate::routing::Tier;

/// Trend magnitude below which a stage counts as stable.
pub const TREND_EPSILON: f64 = 0.01;

/// One recorded score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySample {
    pub workflow: String,
    pub stage: String,
    pub tier: Tier,
    pub score: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

impl Trend {
    pub fn from_delta(delta: f64) -> Self {
        if delta > TREND_EPSILON {
            Trend::Improving
        } else if delta < -TREND_EPSILON {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Trend::Improving => "improving",
            Trend::Declining => "declining",
            Trend::Stable => "stable",
        })
    }
}

/// Aggregate quality for one (workflow, stage, tier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageQualityStats {
    pub workflow: String,
    pub stage: String,
    pub tier: Tier,
    pub samples: u64,
    pub avg_quality: f64,
    pub min_quality: f64,
    pub max_quality: f64,
    /// Recent window average minus prior window average
    pub trend: f64,
    pub direction: Trend,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct QualityKey {
    workflow: String,
    stage: String,
    tier: Tier,
}

#[derive(Debug)]
struct StageWindow {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    /// Last `2 * window` scores, oldest first
    recent: VecDeque<f64>,
}

impl StageWindow {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            recent: VecDeque::new(),
        }
    }

    fn push(&mut self, score: f64, window: usize) {
        self.count += 1;
        self.sum += score;
        self.min = self.min.min(score);
        self.max = self.max.max(score);
        self.recent.push_back(score);
        while self.recent.len() > window * 2 {
            self.recent.pop_front();
        }
    }

    /// Zero until there is at least one sample before the recent window.
    fn trend(&self, window: usize) -> f64 {
        let n = self.recent.len();
        if n <= window {
            return 0.0;
        }
        let split = n - window;
        let recent = self.recent.iter().skip(split).sum::<f64>() / window as f64;
        let prior = self.recent.iter().take(split).sum::<f64>() / split as f64;
        recent - prior
    }
}

/// Thread-safe quality tracker shared across runs.
#[derive(Debug)]
pub struct QualityTracker {
    stages: DashMap<QualityKey, StageWindow>,
    window: usize,
}

impl QualityTracker {
    pub fn new(window: usize) -> Self {
        Self {
            stages: DashMap::new(),
            window: window.max(1),
        }
    }

    pub fn from_config(config: &QualityConfig) -> Self {
        Self::new(config.trend_window)
    }

    /// Rebuild a tracker from persisted samples, replayed in order.
    pub fn from_samples(window: usize, samples: impl IntoIterator<Item = QualitySample>) -> Self {
        let tracker = Self::new(window);
        for sample in samples {
            tracker.record(&sample.workflow, &sample.stage, sample.tier, sample.score);
        }
        tracker
    }

    /// Record one score. Scores are clamped into 0.0..=1.0; NaN is dropped.
    pub fn record(&self, workflow: &str, stage: &str, tier: Tier, score: f64) {
        if score.is_nan() {
            tracing::warn!(workflow, stage, "Ignoring NaN quality score");
            return;
        }
        let score = score.clamp(0.0, 1.0);
        let key = QualityKey {
            workflow: workflow.to_string(),
            stage: stage.to_string(),
            tier,
        };
        self.stages
            .entry(key)
            .or_insert_with(StageWindow::new)
            .push(score, self.window);
        tracing::debug!(workflow, stage, %tier, score, "Recorded quality sample");
    }

    /// Stats for every tracked key, ordered by workflow, stage, tier.
    pub fn get_stage_stats(&self) -> Vec<StageQualityStats> {
        let mut stats: Vec<(QualityKey, StageQualityStats)> = self
            .stages
            .iter()
            .map(|entry| (entry.key().clone(), self.summarize(entry.key(), entry.value())))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats.into_iter().map(|(_, s)| s).collect()
    }

    /// Keys whose average is strictly below `threshold`, worst first.
    pub fn get_underperforming(&self, threshold: f64) -> Vec<StageQualityStats> {
        let mut flagged: Vec<StageQualityStats> = self
            .get_stage_stats()
            .into_iter()
            .filter(|s| s.avg_quality < threshold)
            .collect();
        flagged.sort_by(|a, b| a.avg_quality.total_cmp(&b.avg_quality));
        flagged
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn summarize(&self, key: &QualityKey, window: &StageWindow) -> StageQualityStats {
        let trend = window.trend(self.window);
        StageQualityStats {
            workflow: key.workflow.clone(),
            stage: key.stage.clone(),
            tier: key.tier,
            samples: window.count,
            avg_quality: window.sum / window.count as f64,
            min_quality: window.min,
            max_quality: window.max,
            trend,
            direction: Trend::from_delta(trend),
        }
    }
}

impl Default for QualityTracker {
    fn default() -> Self {
        Self::from_config(&QualityConfig::default())
    }
}

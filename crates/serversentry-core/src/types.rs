//! Shared data model for ServerSentry: readings, series keys, plugin and
//! rule specs, events and statistics.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

static KEY_PART: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// A single sample taken by a plugin for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    pub value: f64,
    pub timestamp: i64,
}

/// `(plugin, metric)` identity of a series. Both parts are restricted to
/// `^[A-Za-z0-9_-]+$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub plugin: String,
    pub metric: String,
}

impl SeriesKey {
    pub fn new(plugin: impl Into<String>, metric: impl Into<String>) -> Result<Self> {
        let plugin = plugin.into();
        let metric = metric.into();
        if !KEY_PART.is_match(&plugin) {
            return Err(Error::Store(format!("invalid plugin name: {plugin}")));
        }
        if !KEY_PART.is_match(&metric) {
            return Err(Error::Store(format!("invalid metric name: {metric}")));
        }
        Ok(Self { plugin, metric })
    }

    /// File-safe identifier used for persisted series and archive segments.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.plugin, self.metric)
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.plugin, self.metric)
    }
}

/// Static specification for one monitored plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    pub enabled: bool,
    pub interval_seconds: u64,
    pub sampler_ref: String,
    pub warning_threshold: Option<f64>,
    pub critical_threshold: Option<f64>,
    pub config: HashMap<String, String>,
}

/// Anomaly-detection tuning for one plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    pub enabled: bool,
    pub sensitivity: f64,
    pub window_size: usize,
    pub min_data_points: usize,
    pub detect_trends: bool,
    pub detect_spikes: bool,
    pub notification_threshold: u32,
    pub cooldown_seconds: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitivity: 2.0,
            window_size: 10,
            min_data_points: 10,
            detect_trends: true,
            detect_spikes: true,
            notification_threshold: 1,
            cooldown_seconds: 300,
        }
    }
}

/// Severity assigned to a composite rule or notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning = 1,
    Critical = 2,
    Emergency = 3,
}

/// A boolean expression evaluated over the latest readings of several
/// series; see `serversentry-rules` for the grammar and evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeRule {
    pub name: String,
    pub expression: String,
    pub severity: Severity,
    pub cooldown_seconds: u64,
    pub notify_on_trigger: bool,
    pub notify_on_recovery: bool,
    pub enabled: bool,
}

/// Per-plugin threshold breach status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Warning,
    Critical,
    Error,
}

/// Kind of anomaly an evaluation surfaced. Ordering here doubles as the
/// dominant-kind tie-break (earlier variants win when several trigger).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    ExtremePositiveSpike,
    ExtremeNegativeSpike,
    PositiveSpike,
    NegativeSpike,
    HighOutlier,
    LowOutlier,
    IqrOutlier,
    SteepUpwardTrend,
    SteepDownwardTrend,
    ModerateUpwardTrend,
    ModerateDownwardTrend,
    SuddenIncrease,
    SuddenDecrease,
}

impl AnomalyKind {
    /// Lower number = higher priority in the tie-break ordering from §4.4.
    fn rank(self) -> u8 {
        use AnomalyKind::*;
        match self {
            ExtremePositiveSpike | ExtremeNegativeSpike => 0,
            PositiveSpike | NegativeSpike => 1,
            HighOutlier | LowOutlier => 2,
            IqrOutlier => 3,
            SteepUpwardTrend | SteepDownwardTrend => 4,
            ModerateUpwardTrend | ModerateDownwardTrend => 5,
            SuddenIncrease | SuddenDecrease => 6,
        }
    }

    /// Pick the dominant kind among several that triggered in one
    /// evaluation, per the tie-break order in §4.4.
    pub fn dominant(kinds: &[AnomalyKind]) -> Option<AnomalyKind> {
        kinds.iter().copied().min_by_key(|k| k.rank())
    }
}

/// Qualitative confidence label derived from `|z|` thresholds 2.0/2.5/3.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Summary statistics over a window of readings; see `serversentry-anomaly`
/// for the computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    pub q1: f64,
    pub q3: f64,
    pub min: f64,
    pub max: f64,
    pub iqr: f64,
    pub valid: bool,
}

impl Statistics {
    pub fn empty() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            std_dev: 0.0,
            median: 0.0,
            q1: 0.0,
            q3: 0.0,
            min: 0.0,
            max: 0.0,
            iqr: 0.0,
            valid: false,
        }
    }
}

/// A typed event produced by the threshold evaluator, anomaly engine, or
/// composite rule evaluator, and carried by the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    Status {
        plugin: String,
        metric: String,
        value: f64,
        status: Status,
        warning_threshold: Option<f64>,
        critical_threshold: Option<f64>,
        timestamp: i64,
    },
    Anomaly {
        plugin: String,
        metric: String,
        value: f64,
        kinds: Vec<AnomalyKind>,
        dominant_kind: AnomalyKind,
        score: f64,
        confidence: Confidence,
        stats: Statistics,
        timestamp: i64,
    },
    Composite {
        rule: String,
        triggered: bool,
        bindings: HashMap<String, f64>,
        severity: Severity,
        timestamp: i64,
    },
}

impl Event {
    pub fn timestamp(&self) -> i64 {
        match self {
            Event::Status { timestamp, .. } => *timestamp,
            Event::Anomaly { timestamp, .. } => *timestamp,
            Event::Composite { timestamp, .. } => *timestamp,
        }
    }

    /// Whether this event represents a state recovering to a healthy
    /// condition (used by the bus's drop-oldest admission policy, which
    /// prefers to keep recoveries and criticals over routine status).
    pub fn is_recovery_or_critical(&self) -> bool {
        match self {
            Event::Status { status, .. } => matches!(status, Status::Critical),
            Event::Composite { triggered, .. } => !triggered,
            Event::Anomaly { .. } => false,
        }
    }
}

/// Bookkeeping for one delivery attempt, kept in memory for the cooldown
/// window and otherwise only persisted as a log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub event_id: String,
    pub channel: String,
    pub attempt: u32,
    pub sent_at: i64,
    pub ok: bool,
    pub error: Option<String>,
}

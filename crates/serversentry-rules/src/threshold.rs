//! Threshold Evaluator (§4.5): per-plugin warning/critical comparison plus
//! the OK/not-OK transition tracking the scheduler needs for recovery
//! detection.

use std::collections::HashMap;
use std::sync::Mutex;

use serversentry_core::{Event, SeriesKey, Status};

fn classify(value: f64, warning: Option<f64>, critical: Option<f64>) -> Status {
    if let Some(critical) = critical {
        if value >= critical {
            return Status::Critical;
        }
    }
    if let Some(warning) = warning {
        if value >= warning {
            return Status::Warning;
        }
    }
    Status::Ok
}

/// Tracks the last-seen `Status` per series so the scheduler can be told
/// about OK→not-OK and not-OK→OK transitions, not just the current state.
pub struct ThresholdEvaluator {
    last_status: Mutex<HashMap<SeriesKey, Status>>,
}

impl Default for ThresholdEvaluator {
    fn default() -> Self {
        Self { last_status: Mutex::new(HashMap::new()) }
    }
}

impl ThresholdEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Some(event)` when the status is not OK, or when it just
    /// recovered to OK from a prior not-OK reading. A first-ever OK
    /// reading with no prior state does not publish.
    pub fn evaluate(
        &self,
        key: &SeriesKey,
        value: f64,
        warning_threshold: Option<f64>,
        critical_threshold: Option<f64>,
        timestamp: i64,
    ) -> Option<Event> {
        let status = classify(value, warning_threshold, critical_threshold);

        let mut guard = self.last_status.lock().unwrap();
        let previous = guard.insert(key.clone(), status);

        let recovered = status == Status::Ok && matches!(previous, Some(p) if p != Status::Ok);
        if status == Status::Ok && !recovered {
            return None;
        }

        Some(Event::Status {
            plugin: key.plugin.clone(),
            metric: key.metric.clone(),
            value,
            status,
            warning_threshold,
            critical_threshold,
            timestamp,
        })
    }
}

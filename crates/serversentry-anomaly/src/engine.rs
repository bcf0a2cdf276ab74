//! Anomaly Engine (§4.4): outlier, IQR, trend and spike tests over a
//! window of readings, gated by a per-(plugin, metric) consecutive-anomaly
//! counter before an event is published.

use std::collections::HashMap;
use std::sync::Mutex;

use serversentry_core::{AnomalyConfig, AnomalyKind, Confidence, Event, SeriesKey, Statistics};
use tracing::debug;

use crate::stats::{linear_regression, summary};

/// Tracks the consecutive-anomalous-evaluation counter per series. Cooldown
/// on *delivery* is a dispatcher concern (§4.8); this only gates whether an
/// event is published at all.
pub struct AnomalyEngine {
    consecutive: Mutex<HashMap<SeriesKey, u32>>,
}

impl Default for AnomalyEngine {
    fn default() -> Self {
        Self { consecutive: Mutex::new(HashMap::new()) }
    }
}

impl AnomalyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates one (plugin, metric, current_value) observation against a
    /// recent window. `window` must already be the `max(50, window_size)`
    /// most recent readings the caller fetched from the store; `window`
    /// excludes `current_value` itself.
    pub fn evaluate(
        &self,
        key: &SeriesKey,
        current_value: f64,
        timestamp: i64,
        window: &[f64],
        config: &AnomalyConfig,
    ) -> Option<Event> {
        if window.len() < config.min_data_points {
            self.reset(key);
            return None;
        }

        let stats = summary(window);
        let mut kinds = Vec::new();
        let mut confidence = Confidence::Low;
        let mut score = 0.0;

        // Outlier test.
        if stats.std_dev > 0.0 {
            let z = (current_value - stats.mean) / stats.std_dev;
            if z.abs() > config.sensitivity {
                kinds.push(if z > 0.0 { AnomalyKind::HighOutlier } else { AnomalyKind::LowOutlier });
                confidence = confidence_for(z.abs());
                score = z;
            }
        }

        // IQR test.
        let iqr_low = stats.q1 - 1.5 * stats.iqr;
        let iqr_high = stats.q3 + 1.5 * stats.iqr;
        if current_value < iqr_low || current_value > iqr_high {
            kinds.push(AnomalyKind::IqrOutlier);
        }

        // Trend test.
        if config.detect_trends {
            if let Some(kind) = trend_kind(window, config) {
                kinds.push(kind);
            }
        }

        // Spike test.
        if config.detect_spikes {
            spike_kinds(current_value, window, &stats, config, &mut kinds, &mut score, &mut confidence);
        }

        if kinds.is_empty() {
            self.reset(key);
            return None;
        }

        let counter = self.bump(key);
        if counter < config.notification_threshold {
            return None;
        }

        let dominant_kind = AnomalyKind::dominant(&kinds).expect("kinds is non-empty");
        debug!(series = %key, ?dominant_kind, score, "anomaly detected");
        Some(Event::Anomaly {
            plugin: key.plugin.clone(),
            metric: key.metric.clone(),
            value: current_value,
            kinds,
            dominant_kind,
            score,
            confidence,
            stats,
            timestamp,
        })
    }

    fn bump(&self, key: &SeriesKey) -> u32 {
        let mut guard = self.consecutive.lock().unwrap();
        let counter = guard.entry(key.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    fn reset(&self, key: &SeriesKey) {
        self.consecutive.lock().unwrap().insert(key.clone(), 0);
    }
}

fn confidence_for(abs_z: f64) -> Confidence {
    if abs_z > 3.0 {
        Confidence::High
    } else if abs_z > 2.5 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

fn trend_kind(window: &[f64], config: &AnomalyConfig) -> Option<AnomalyKind> {
    let recent: Vec<f64> = window.iter().rev().take(config.window_size).rev().copied().collect();
    let (slope, corr) = linear_regression(&recent);
    let abs_slope = slope.abs();
    let abs_corr = corr.abs();

    if abs_slope > config.sensitivity && abs_corr > 0.7 {
        Some(if slope > 0.0 { AnomalyKind::SteepUpwardTrend } else { AnomalyKind::SteepDownwardTrend })
    } else if abs_slope > 0.5 * config.sensitivity && abs_corr > 0.5 {
        Some(if slope > 0.0 { AnomalyKind::ModerateUpwardTrend } else { AnomalyKind::ModerateDownwardTrend })
    } else {
        None
    }
}

fn spike_kinds(
    current: f64,
    window: &[f64],
    baseline: &Statistics,
    config: &AnomalyConfig,
    kinds: &mut Vec<AnomalyKind>,
    score: &mut f64,
    confidence: &mut Confidence,
) {
    let recent_n = window.len().min(5);
    let recent_slice = &window[window.len() - recent_n..];
    let recent_stats = summary(recent_slice);

    if recent_stats.std_dev > 0.0 {
        let recent_z = (current - recent_stats.mean) / recent_stats.std_dev;
        if recent_z.abs() > config.sensitivity {
            kinds.push(if recent_z > 0.0 { AnomalyKind::PositiveSpike } else { AnomalyKind::NegativeSpike });
            *score = recent_z;
            *confidence = confidence_for(recent_z.abs());
        }

        if baseline.std_dev > 0.0 {
            let baseline_z = (current - baseline.mean) / baseline.std_dev;
            if baseline_z.abs() > 1.5 * config.sensitivity {
                kinds.push(if baseline_z > 0.0 {
                    AnomalyKind::ExtremePositiveSpike
                } else {
                    AnomalyKind::ExtremeNegativeSpike
                });
                *score = baseline_z;
                *confidence = confidence_for(baseline_z.abs());
            }
        }

        if let Some(&previous) = window.last() {
            let delta = (current - previous).abs() / recent_stats.std_dev;
            if delta > 2.0 * config.sensitivity {
                kinds.push(if current > previous { AnomalyKind::SuddenIncrease } else { AnomalyKind::SuddenDecrease });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SeriesKey {
        SeriesKey::new("cpu", "usage").unwrap()
    }

    fn config() -> AnomalyConfig {
        AnomalyConfig { min_data_points: 10, notification_threshold: 1, ..AnomalyConfig::default() }
    }

    #[test]
    fn insufficient_data_points_yields_no_event() {
        let engine = AnomalyEngine::new();
        let window = vec![50.0; 5];
        let event = engine.evaluate(&key(), 85.0, 1, &window, &config());
        assert!(event.is_none());
    }

    #[test]
    fn zero_std_dev_window_does_not_flag_outlier() {
        let engine = AnomalyEngine::new();
        let window = vec![50.0; 12];
        let event = engine.evaluate(&key(), 85.0, 1, &window, &config());
        assert!(event.is_none());
    }

    #[test]
    fn high_variance_current_value_flags_high_outlier() {
        let engine = AnomalyEngine::new();
        let window = vec![48.0, 51.0, 49.0, 50.0, 52.0, 50.0, 49.0, 51.0, 48.0, 52.0];
        let event = engine.evaluate(&key(), 85.0, 1, &window, &config()).expect("anomaly expected");
        match event {
            Event::Anomaly { kinds, confidence, .. } => {
                assert!(kinds.contains(&AnomalyKind::HighOutlier));
                assert_eq!(confidence, Confidence::High);
            }
            _ => panic!("expected anomaly event"),
        }
    }

    #[test]
    fn steep_upward_trend_is_detected() {
        let engine = AnomalyEngine::new();
        let mut cfg = config();
        cfg.window_size = 10;
        cfg.sensitivity = 2.0;
        cfg.min_data_points = 10;
        let window = vec![10.0, 12.0, 14.0, 16.0, 18.0, 20.0, 22.0, 24.0, 26.0, 28.0];
        let event = engine.evaluate(&key(), 30.0, 1, &window, &cfg).expect("anomaly expected");
        match event {
            Event::Anomaly { kinds, .. } => assert!(kinds.contains(&AnomalyKind::SteepUpwardTrend)),
            _ => panic!("expected anomaly event"),
        }
    }

    #[test]
    fn consecutive_gating_requires_threshold_hits() {
        let engine = AnomalyEngine::new();
        let mut cfg = config();
        cfg.notification_threshold = 2;
        let window = vec![48.0, 51.0, 49.0, 50.0, 52.0, 50.0, 49.0, 51.0, 48.0, 52.0];

        let first = engine.evaluate(&key(), 85.0, 1, &window, &cfg);
        assert!(first.is_none(), "first anomalous tick should not publish yet");

        let second = engine.evaluate(&key(), 85.0, 2, &window, &cfg);
        assert!(second.is_some(), "second consecutive anomalous tick should publish");
    }

    #[test]
    fn non_anomalous_tick_resets_counter() {
        let engine = AnomalyEngine::new();
        let mut cfg = config();
        cfg.notification_threshold = 2;
        let window = vec![48.0, 51.0, 49.0, 50.0, 52.0, 50.0, 49.0, 51.0, 48.0, 52.0];

        assert!(engine.evaluate(&key(), 85.0, 1, &window, &cfg).is_none());
        assert!(engine.evaluate(&key(), 50.0, 2, &window, &cfg).is_none());
        assert!(engine.evaluate(&key(), 85.0, 3, &window, &cfg).is_none(), "counter should have reset");
    }
}

//! A single bounded, in-memory series plus the rotation logic that keeps
//! it at or under `MAX_POINTS`.

use std::collections::VecDeque;

use serversentry_core::{Error, MetricReading, Result};

/// Readings rotated out of a `Series` on overflow, to be handed to the
/// persistence layer for archiving.
pub struct Rotated {
    pub readings: Vec<MetricReading>,
}

/// An ordered, bounded sequence of readings for one `SeriesKey`.
///
/// Rotation takes the single oldest reading on overflow rather than the
/// oldest half: it is the strategy that keeps the in-memory tail at
/// exactly `max_points` immediately after the append that triggered
/// rotation, matching the rotation scenario's expectations.
pub struct Series {
    max_points: usize,
    readings: VecDeque<MetricReading>,
}

impl Series {
    pub fn new(max_points: usize) -> Self {
        Self { max_points, readings: VecDeque::with_capacity(max_points) }
    }

    /// Appends `reading`, rejecting out-of-order timestamps and
    /// non-finite values. Returns the reading(s) rotated to archive, if
    /// any.
    pub fn append(&mut self, reading: MetricReading) -> Result<Option<Rotated>> {
        if !reading.value.is_finite() {
            return Err(Error::Store(format!("reading value is not finite: {}", reading.value)));
        }
        if let Some(last) = self.readings.back() {
            if reading.timestamp < last.timestamp {
                return Err(Error::Store(format!(
                    "out-of-order timestamp: {} < {}",
                    reading.timestamp, last.timestamp
                )));
            }
        }

        let mut rotated = None;
        if self.readings.len() >= self.max_points {
            if let Some(oldest) = self.readings.pop_front() {
                rotated = Some(Rotated { readings: vec![oldest] });
            }
        }
        self.readings.push_back(reading);
        debug_assert!(self.readings.len() <= self.max_points);
        Ok(rotated)
    }

    /// Last `n` readings, newest last. Errors if the series is empty.
    pub fn recent(&self, n: usize) -> Result<Vec<MetricReading>> {
        if self.readings.is_empty() {
            return Err(Error::Store("series is empty".into()));
        }
        let take = n.min(self.readings.len());
        Ok(self.readings.iter().rev().take(take).rev().copied().collect())
    }

    /// Readings with `t0 <= timestamp <= t1`. An empty result is not an
    /// error.
    pub fn range(&self, t0: i64, t1: i64) -> Vec<MetricReading> {
        self.readings.iter().filter(|r| r.timestamp >= t0 && r.timestamp <= t1).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn all(&self) -> Vec<MetricReading> {
        self.readings.iter().copied().collect()
    }

    /// Seeds the in-memory tail from persisted readings on restart (the
    /// last `MAX_POINTS` lines of the series file).
    pub fn load(&mut self, readings: Vec<MetricReading>) {
        self.readings = readings.into_iter().rev().take(self.max_points).rev().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(ts: i64, v: f64) -> MetricReading {
        MetricReading { value: v, timestamp: ts }
    }

    #[test]
    fn never_exceeds_max_points() {
        let mut series = Series::new(4);
        for ts in 1..=6 {
            series.append(r(ts, ts as f64)).unwrap();
            assert!(series.len() <= 4);
        }
    }

    #[test]
    fn rotation_scenario_s6() {
        let mut series = Series::new(4);
        for ts in 1..=4 {
            assert!(series.append(r(ts, ts as f64)).unwrap().is_none());
        }
        assert_eq!(series.len(), 4);

        let rotated = series.append(r(5, 5.0)).unwrap().expect("5th append rotates");
        assert_eq!(rotated.readings[0].timestamp, 1);
        assert_eq!(series.len(), 4);
        assert_eq!(series.recent(4).unwrap().iter().map(|r| r.timestamp).collect::<Vec<_>>(), vec![2, 3, 4, 5]);

        let rotated = series.append(r(6, 6.0)).unwrap().expect("6th append rotates");
        assert_eq!(rotated.readings[0].timestamp, 2);
        assert_eq!(series.len(), 4);
        assert_eq!(series.recent(4).unwrap().iter().map(|r| r.timestamp).collect::<Vec<_>>(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn out_of_order_timestamp_is_rejected() {
        let mut series = Series::new(4);
        series.append(r(10, 1.0)).unwrap();
        assert!(series.append(r(5, 1.0)).is_err());
    }

    #[test]
    fn non_finite_value_is_rejected() {
        let mut series = Series::new(4);
        assert!(series.append(r(1, f64::NAN)).is_err());
        assert!(series.append(r(1, f64::INFINITY)).is_err());
    }

    #[test]
    fn recent_on_empty_series_errors() {
        let series = Series::new(4);
        assert!(series.recent(1).is_err());
    }

    #[test]
    fn range_is_inclusive_both_ends() {
        let mut series = Series::new(10);
        for ts in 1..=5 {
            series.append(r(ts, ts as f64)).unwrap();
        }
        let ranged = series.range(2, 4);
        assert_eq!(ranged.iter().map(|r| r.timestamp).collect::<Vec<_>>(), vec![2, 3, 4]);
    }
}

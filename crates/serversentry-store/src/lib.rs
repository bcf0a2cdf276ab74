//! Time-series store: a bounded, in-memory `Series` per `(plugin, metric)`
//! backed by append-only CSV persistence, with archive rotation on
//! overflow and retention cleanup.

mod persistence;
mod series;

use std::collections::HashMap;
use std::sync::Arc;

use serversentry_anomaly::summary;
use serversentry_core::{MetricReading, Result, SeriesKey, Statistics};
use tokio::sync::RwLock;
use tracing::warn;

use persistence::Persistence;
use series::Series;

pub use series::Rotated;

/// Shared, thread-safe handle to the store. Cloning shares the same
/// underlying state (`Arc`-backed).
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    max_points: usize,
    persistence: Persistence,
    series: RwLock<HashMap<SeriesKey, Series>>,
}

impl Store {
    pub fn new(data_dir: impl Into<std::path::PathBuf>, max_points: usize) -> Self {
        Self { inner: Arc::new(Inner { max_points, persistence: Persistence::new(data_dir), series: RwLock::new(HashMap::new()) }) }
    }

    pub async fn init(&self) -> Result<()> {
        self.inner.persistence.ensure_dirs().await
    }

    /// Appends one reading. Persists to disk and archives any rotated
    /// reading; persistence failures are logged, not returned, so a disk
    /// fault never loses the in-memory append.
    pub async fn append(&self, key: &SeriesKey, reading: MetricReading) -> Result<()> {
        let rotated = {
            let mut guard = self.inner.series.write().await;
            let series = guard.entry(key.clone()).or_insert_with(|| Series::new(self.inner.max_points));
            series.append(reading)?
        };

        if let Err(err) = self.inner.persistence.append_reading(key, reading).await {
            warn!(series = %key, error = %err, "failed to persist reading");
        }
        if let Some(rotated) = rotated {
            if let Err(err) = self.inner.persistence.archive_readings(key, &rotated.readings).await {
                warn!(series = %key, error = %err, "failed to archive rotated reading");
            }
        }
        Ok(())
    }

    /// Last `n` in-memory readings, newest last.
    pub async fn recent(&self, key: &SeriesKey, n: usize) -> Result<Vec<MetricReading>> {
        let guard = self.inner.series.read().await;
        match guard.get(key) {
            Some(series) => series.recent(n),
            None => Err(serversentry_core::Error::Store(format!("no series for {key}"))),
        }
    }

    /// In-memory readings within `[t0, t1]`.
    pub async fn range(&self, key: &SeriesKey, t0: i64, t1: i64) -> Vec<MetricReading> {
        let guard = self.inner.series.read().await;
        guard.get(key).map(|series| series.range(t0, t1)).unwrap_or_default()
    }

    /// Summary statistics over the last `n` in-memory readings, delegating
    /// to the statistics kernel.
    pub async fn statistics(&self, key: &SeriesKey, n: usize) -> Result<Statistics> {
        let readings = self.recent(key, n).await?;
        let values: Vec<f64> = readings.iter().map(|r| r.value).collect();
        Ok(summary(&values))
    }

    /// Restores the in-memory tail for `key` from its persisted series
    /// file. Call once per known plugin/metric pair at startup.
    pub async fn restore(&self, key: &SeriesKey) -> Result<()> {
        let readings = self.inner.persistence.load_series(key).await?;
        let mut guard = self.inner.series.write().await;
        let series = guard.entry(key.clone()).or_insert_with(|| Series::new(self.inner.max_points));
        series.load(readings);
        Ok(())
    }

    /// Applies retention independently to the raw (live) series and its
    /// archive segments: `raw_days` bounds the live file, `archive_days`
    /// bounds archive segments, and the two may differ.
    pub async fn cleanup(&self, key: &SeriesKey, now: i64, raw_days: u32, archive_days: u32) -> Result<()> {
        self.inner.persistence.cleanup(key, now, raw_days, archive_days).await
    }

    /// All readings for `key` within `[t0, t1]`, merging the live file and
    /// any archive segments, for operator export.
    pub async fn export(&self, key: &SeriesKey, t0: i64, t1: i64) -> Result<Vec<MetricReading>> {
        self.inner.persistence.export(key, t0, t1).await
    }

    pub async fn series_len(&self, key: &SeriesKey) -> usize {
        self.inner.series.read().await.get(key).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key() -> SeriesKey {
        SeriesKey::new("cpu", "usage").unwrap()
    }

    #[tokio::test]
    async fn append_and_recent_round_trip() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path(), 4);
        store.init().await.unwrap();

        for ts in 1..=3 {
            store.append(&key(), MetricReading { timestamp: ts, value: ts as f64 }).await.unwrap();
        }
        let recent = store.recent(&key(), 10).await.unwrap();
        assert_eq!(recent.len(), 3);
    }

    #[tokio::test]
    async fn rotation_archives_and_caps_in_memory_len() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path(), 4);
        store.init().await.unwrap();

        for ts in 1..=6 {
            store.append(&key(), MetricReading { timestamp: ts, value: ts as f64 }).await.unwrap();
        }
        assert_eq!(store.series_len(&key()).await, 4);

        let exported = store.export(&key(), 0, 100).await.unwrap();
        assert_eq!(exported.len(), 6, "archive plus live file together retain all readings");
    }

    #[tokio::test]
    async fn statistics_delegates_to_the_statistics_kernel() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path(), 20);
        store.init().await.unwrap();

        for ts in 1..=10 {
            store.append(&key(), MetricReading { timestamp: ts, value: 50.0 }).await.unwrap();
        }
        let stats = store.statistics(&key(), 10).await.unwrap();
        assert!(stats.valid);
        assert_eq!(stats.mean, 50.0);
        assert_eq!(stats.std_dev, 0.0);
    }

    #[tokio::test]
    async fn recent_on_unknown_series_errors() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path(), 4);
        store.init().await.unwrap();
        assert!(store.recent(&key(), 1).await.is_err());
    }
}

//! Append-only CSV persistence for series and archive segments.
//!
//! Each series lives at `<data_dir>/<plugin>_<metric>.csv` with header
//! `timestamp,value,plugin,metric`. On rotation the reading(s) rotated out
//! of the in-memory tail are appended to an archive segment named
//! `<plugin>_<metric>.<unix-seconds>.csv`, one segment per calendar day of
//! first-write. Persistence failures are logged and swallowed by the
//! caller (`Store::append`): a write to disk failing must never lose the
//! in-memory reading.

use std::path::{Path, PathBuf};

use serversentry_core::{MetricReading, Result, SeriesKey};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const HEADER: &str = "timestamp,value,plugin,metric";

pub struct Persistence {
    data_dir: PathBuf,
}

impl Persistence {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    fn series_path(&self, file_stem: &str) -> PathBuf {
        self.data_dir.join(format!("{file_stem}.csv"))
    }

    fn archive_path(&self, file_stem: &str, day_start: i64) -> PathBuf {
        self.data_dir.join("archive").join(format!("{file_stem}.{day_start}.csv"))
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).await?;
        fs::create_dir_all(self.data_dir.join("archive")).await?;
        Ok(())
    }

    /// Appends one reading to the live series file, creating it (with
    /// header) if absent.
    pub async fn append_reading(&self, key: &SeriesKey, reading: MetricReading) -> Result<()> {
        append_csv_line(&self.series_path(&key.file_stem()), key, reading).await
    }

    /// Appends rotated readings to the archive segment for the UTC day
    /// each reading's timestamp falls in.
    pub async fn archive_readings(&self, key: &SeriesKey, readings: &[MetricReading]) -> Result<()> {
        let file_stem = key.file_stem();
        for reading in readings {
            let day_start = reading.timestamp - (reading.timestamp % 86_400);
            append_csv_line(&self.archive_path(&file_stem, day_start), key, *reading).await?;
        }
        Ok(())
    }

    /// Reads back the live series file, if present, oldest first.
    pub async fn load_series(&self, key: &SeriesKey) -> Result<Vec<MetricReading>> {
        read_csv(&self.series_path(&key.file_stem())).await
    }

    /// Deletes archive segments whose day is older than `archive_days`
    /// relative to `now`, and truncates the live series file to drop
    /// readings older than `raw_days` (re-writing it in place).
    pub async fn cleanup(&self, key: &SeriesKey, now: i64, raw_days: u32, archive_days: u32) -> Result<()> {
        let file_stem = key.file_stem();
        let raw_cutoff = now - raw_days as i64 * 86_400;
        let live = self.series_path(&file_stem);
        let readings = read_csv(&live).await?;
        let kept: Vec<MetricReading> = readings.into_iter().filter(|r| r.timestamp >= raw_cutoff).collect();
        rewrite_csv(&live, key, &kept).await?;

        let archive_cutoff = now - archive_days as i64 * 86_400;
        let archive_dir = self.data_dir.join("archive");
        let mut entries = match fs::read_dir(&archive_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(&file_stem) {
                continue;
            }
            if let Some(day) = parse_segment_day(&name) {
                if day < archive_cutoff {
                    let _ = fs::remove_file(entry.path()).await;
                }
            }
        }
        Ok(())
    }

    /// Exports all readings for a series (live + archived) within
    /// `[t0, t1]`, ordered by timestamp.
    pub async fn export(&self, key: &SeriesKey, t0: i64, t1: i64) -> Result<Vec<MetricReading>> {
        let file_stem = key.file_stem();
        let mut all = read_csv(&self.series_path(&file_stem)).await?;

        let archive_dir = self.data_dir.join("archive");
        if let Ok(mut entries) = fs::read_dir(&archive_dir).await {
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let name = name.to_string_lossy().to_string();
                if name.starts_with(&file_stem) {
                    all.extend(read_csv(&entry.path()).await?);
                }
            }
        }

        all.retain(|r| r.timestamp >= t0 && r.timestamp <= t1);
        all.sort_by_key(|r| r.timestamp);
        Ok(all)
    }
}

fn parse_segment_day(file_name: &str) -> Option<i64> {
    let stem = file_name.strip_suffix(".csv")?;
    let day_str = stem.rsplit('.').next()?;
    day_str.parse::<i64>().ok()
}

async fn append_csv_line(path: &Path, key: &SeriesKey, reading: MetricReading) -> Result<()> {
    let needs_header = !path.exists();
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path).await?;
    if needs_header {
        file.write_all(format!("{HEADER}\n").as_bytes()).await?;
    }
    file.write_all(format!("{},{},{},{}\n", reading.timestamp, reading.value, key.plugin, key.metric).as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

async fn read_csv(path: &Path) -> Result<Vec<MetricReading>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).await?;
    let mut readings = Vec::new();
    for line in contents.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, ',');
        let (Some(ts), Some(value)) = (parts.next(), parts.next()) else { continue };
        if let (Ok(timestamp), Ok(value)) = (ts.parse::<i64>(), value.parse::<f64>()) {
            readings.push(MetricReading { timestamp, value });
        }
    }
    Ok(readings)
}

async fn rewrite_csv(path: &Path, key: &SeriesKey, readings: &[MetricReading]) -> Result<()> {
    let mut contents = format!("{HEADER}\n");
    for r in readings {
        contents.push_str(&format!("{},{},{},{}\n", r.timestamp, r.value, key.plugin, key.metric));
    }
    fs::write(path, contents).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key() -> SeriesKey {
        SeriesKey::new("cpu", "usage").unwrap()
    }

    #[tokio::test]
    async fn append_and_reload_round_trip() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        persistence.ensure_dirs().await.unwrap();

        for ts in 1..=3 {
            persistence.append_reading(&key(), MetricReading { timestamp: ts, value: ts as f64 }).await.unwrap();
        }
        let loaded = persistence.load_series(&key()).await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].timestamp, 1);
    }

    #[tokio::test]
    async fn archive_and_export_merge_live_and_archived() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        persistence.ensure_dirs().await.unwrap();

        persistence.archive_readings(&key(), &[MetricReading { timestamp: 1, value: 1.0 }]).await.unwrap();
        persistence.append_reading(&key(), MetricReading { timestamp: 2, value: 2.0 }).await.unwrap();

        let exported = persistence.export(&key(), 0, 100).await.unwrap();
        assert_eq!(exported.len(), 2);
        assert_eq!(exported[0].timestamp, 1);
        assert_eq!(exported[1].timestamp, 2);
    }

    #[tokio::test]
    async fn cleanup_drops_readings_older_than_cutoff() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        persistence.ensure_dirs().await.unwrap();

        persistence.append_reading(&key(), MetricReading { timestamp: 0, value: 1.0 }).await.unwrap();
        persistence.append_reading(&key(), MetricReading { timestamp: 10 * 86_400, value: 2.0 }).await.unwrap();

        persistence.cleanup(&key(), 10 * 86_400, 1, 30).await.unwrap();
        let loaded = persistence.load_series(&key()).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].timestamp, 10 * 86_400);
    }
}

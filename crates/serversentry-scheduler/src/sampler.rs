//! Sampler Registry (§4.1): named sources that produce one numeric
//! reading on demand. Built-in cpu/memory/disk/process samplers read
//! `/proc` (and shell out to `df` for disk, matching how the source
//! acquires these metrics) behind a narrow OS-boundary seam so other
//! platforms can supply their own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serversentry_core::{Error, Result};
use tokio::fs;
use tokio::process::Command;

/// Carries the per-sample deadline; the registry resolves
/// `plugin_name → sampler` at scheduler tick time.
pub struct SampleContext {
    pub deadline: Duration,
}

impl SampleContext {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }
}

#[async_trait]
pub trait Sampler: Send + Sync {
    async fn sample(&self, ctx: &SampleContext) -> Result<f64>;
}

async fn with_deadline<F, T>(ctx: &SampleContext, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::time::timeout(ctx.deadline, fut).await.unwrap_or_else(|_| Err(Error::sampler_transient("sample timed out")))
}

/// Resolves plugin name to sampler implementation. A missing registration
/// fails the tick with status ERROR but does not stop the scheduler.
#[derive(Clone, Default)]
pub struct SamplerRegistry {
    samplers: Arc<std::sync::RwLock<HashMap<String, Arc<dyn Sampler>>>>,
}

impl SamplerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin_name: impl Into<String>, sampler: Arc<dyn Sampler>) {
        self.samplers.write().unwrap().insert(plugin_name.into(), sampler);
    }

    pub fn get(&self, plugin_name: &str) -> Option<Arc<dyn Sampler>> {
        self.samplers.read().unwrap().get(plugin_name).cloned()
    }

    /// Built-in cpu, memory, disk and process samplers, registered under
    /// their conventional plugin names.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("cpu", Arc::new(CpuSampler::default()));
        registry.register("memory", Arc::new(MemorySampler));
        registry.register("disk", Arc::new(DiskSampler::default()));
        registry.register("process", Arc::new(ProcessSampler));
        registry
    }
}

/// Percent CPU utilization derived from the delta between two
/// `/proc/stat` snapshots. The first call after a cold start has no prior
/// snapshot to diff against and returns a transient error ("warming up");
/// the scheduler's tick-level retry picks it up on the next tick.
#[derive(Default)]
pub struct CpuSampler {
    last: Mutex<Option<(u64, u64)>>,
}

fn parse_proc_stat(contents: &str) -> Result<(u64, u64)> {
    let line = contents.lines().next().ok_or_else(|| Error::sampler_permanent("empty /proc/stat"))?;
    let fields: Vec<u64> = line.split_whitespace().skip(1).filter_map(|f| f.parse::<u64>().ok()).collect();
    if fields.len() < 4 {
        return Err(Error::sampler_permanent("malformed /proc/stat cpu line"));
    }
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total: u64 = fields.iter().sum();
    Ok((idle, total))
}

#[async_trait]
impl Sampler for CpuSampler {
    async fn sample(&self, ctx: &SampleContext) -> Result<f64> {
        with_deadline(ctx, async {
            let contents = fs::read_to_string("/proc/stat").await.map_err(|e| Error::sampler_transient(e.to_string()))?;
            let (idle, total) = parse_proc_stat(&contents)?;

            let mut last = self.last.lock().unwrap();
            let previous = last.replace((idle, total));
            match previous {
                None => Err(Error::sampler_transient("warming up: no prior /proc/stat snapshot")),
                Some((prev_idle, prev_total)) => {
                    let delta_total = total.saturating_sub(prev_total);
                    let delta_idle = idle.saturating_sub(prev_idle);
                    if delta_total == 0 {
                        return Ok(0.0);
                    }
                    Ok(100.0 * (1.0 - delta_idle as f64 / delta_total as f64))
                }
            }
        })
        .await
    }
}

/// Percent memory utilization: `used = total - available`, per the
/// Linux `/proc`-derived accounting this workspace commits to.
pub struct MemorySampler;

fn parse_meminfo(contents: &str) -> Result<f64> {
    let mut total = None;
    let mut available = None;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = rest.trim().split_whitespace().next().and_then(|v| v.parse::<f64>().ok());
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = rest.trim().split_whitespace().next().and_then(|v| v.parse::<f64>().ok());
        }
    }
    let (total, available) = total.zip(available).ok_or_else(|| Error::sampler_permanent("missing MemTotal/MemAvailable in /proc/meminfo"))?;
    if total == 0.0 {
        return Err(Error::sampler_permanent("MemTotal is zero"));
    }
    Ok(100.0 * (total - available) / total)
}

#[async_trait]
impl Sampler for MemorySampler {
    async fn sample(&self, ctx: &SampleContext) -> Result<f64> {
        with_deadline(ctx, async {
            let contents = fs::read_to_string("/proc/meminfo").await.map_err(|e| Error::sampler_transient(e.to_string()))?;
            parse_meminfo(&contents)
        })
        .await
    }
}

/// Percent disk utilization of the root filesystem, read by shelling out
/// to `df` (the same acquisition path the source uses).
#[derive(Default)]
pub struct DiskSampler {
    pub mount_point: Option<String>,
}

fn parse_df_percent(output: &str) -> Result<f64> {
    let data_line = output.lines().nth(1).ok_or_else(|| Error::sampler_permanent("unexpected df output"))?;
    let percent_field = data_line
        .split_whitespace()
        .find(|f| f.ends_with('%'))
        .ok_or_else(|| Error::sampler_permanent("no percent field in df output"))?;
    percent_field.trim_end_matches('%').parse::<f64>().map_err(|_| Error::sampler_permanent("unparseable df percent field"))
}

#[async_trait]
impl Sampler for DiskSampler {
    async fn sample(&self, ctx: &SampleContext) -> Result<f64> {
        let mount_point = self.mount_point.clone().unwrap_or_else(|| "/".to_string());
        with_deadline(ctx, async move {
            let output = Command::new("df").arg(&mount_point).output().await.map_err(|e| Error::sampler_transient(e.to_string()))?;
            if !output.status.success() {
                return Err(Error::sampler_transient("df exited non-zero"));
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            parse_df_percent(&stdout)
        })
        .await
    }
}

/// Count of running processes, derived from numeric entries under `/proc`.
pub struct ProcessSampler;

#[async_trait]
impl Sampler for ProcessSampler {
    async fn sample(&self, ctx: &SampleContext) -> Result<f64> {
        with_deadline(ctx, async {
            let mut entries = fs::read_dir("/proc").await.map_err(|e| Error::sampler_transient(e.to_string()))?;
            let mut count = 0u64;
            while let Some(entry) = entries.next_entry().await.map_err(|e| Error::sampler_transient(e.to_string()))? {
                if entry.file_name().to_string_lossy().chars().all(|c| c.is_ascii_digit()) {
                    count += 1;
                }
            }
            Ok(count as f64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_proc_stat_cpu_line() {
        let sample = "cpu  10 20 30 400 5 0 0 0 0 0\ncpu0 ...";
        let (idle, total) = parse_proc_stat(sample).unwrap();
        assert_eq!(idle, 405);
        assert_eq!(total, 465);
    }

    #[test]
    fn parses_meminfo_percent() {
        let sample = "MemTotal:       16000000 kB\nMemFree:         2000000 kB\nMemAvailable:    4000000 kB\n";
        let percent = parse_meminfo(sample).unwrap();
        assert!((percent - 75.0).abs() < 1e-6);
    }

    #[test]
    fn parses_df_percent_field() {
        let sample = "Filesystem 1K-blocks Used Available Use% Mounted on\n/dev/sda1 100 91 9 91% /\n";
        let percent = parse_df_percent(sample).unwrap();
        assert_eq!(percent, 91.0);
    }

    #[tokio::test]
    async fn cpu_sampler_warms_up_on_first_call() {
        let sampler = CpuSampler::default();
        let ctx = SampleContext::new(Duration::from_secs(1));
        let result = sampler.sample(&ctx).await;
        assert!(result.is_err() || result.is_ok(), "first call should not panic regardless of /proc availability");
    }

    #[test]
    fn registry_resolves_registered_plugin() {
        struct Fixed(f64);
        #[async_trait]
        impl Sampler for Fixed {
            async fn sample(&self, _ctx: &SampleContext) -> Result<f64> {
                Ok(self.0)
            }
        }
        let registry = SamplerRegistry::new();
        registry.register("custom", Arc::new(Fixed(42.0)));
        assert!(registry.get("custom").is_some());
        assert!(registry.get("missing").is_none());
    }
}

//! Scheduler (§4.9): one tick worker per enabled plugin, wiring
//! sample -> store -> threshold/anomaly evaluation -> publish, plus
//! composite rule re-evaluation for any rule a plugin's tick touches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serversentry_anomaly::AnomalyEngine;
use serversentry_bus::EventBus;
use serversentry_core::{AnomalyConfig, CompositeRule, MetricReading, PluginSpec, SeriesKey};
use serversentry_rules::{referenced_series, CompositeEvaluator, ThresholdEvaluator};
use serversentry_store::Store;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::sampler::{SampleContext, SamplerRegistry};

/// Conventional metric name for a plugin's single reported value, keyed by
/// the sampler it binds to. Plugins using a custom sampler fall back to a
/// generic name.
fn metric_name(sampler_ref: &str) -> &'static str {
    match sampler_ref {
        "cpu" | "memory" | "disk" => "usage",
        "process" => "count",
        _ => "value",
    }
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

pub struct Scheduler {
    store: Store,
    samplers: SamplerRegistry,
    anomaly_engine: AnomalyEngine,
    anomaly_config: AnomalyConfig,
    anomaly_enabled: bool,
    threshold_evaluator: ThresholdEvaluator,
    composite_evaluator: CompositeEvaluator,
    composite_rules: Vec<CompositeRule>,
    bus: EventBus,
    shutdown_grace: Duration,
}

impl Scheduler {
    pub fn new(
        store: Store,
        samplers: SamplerRegistry,
        anomaly_config: AnomalyConfig,
        anomaly_enabled: bool,
        composite_rules: Vec<CompositeRule>,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            samplers,
            anomaly_engine: AnomalyEngine::new(),
            anomaly_config,
            anomaly_enabled,
            threshold_evaluator: ThresholdEvaluator::new(),
            composite_evaluator: CompositeEvaluator::new(),
            composite_rules,
            bus,
            shutdown_grace: Duration::from_secs(5),
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Spawns one tick worker per enabled plugin and runs until `shutdown`
    /// fires, then waits up to `shutdown_grace` for in-flight work before
    /// returning.
    pub async fn run(self: Arc<Self>, plugins: Vec<PluginSpec>, check_timeout: Duration, shutdown: watch::Receiver<bool>) {
        let mut workers = Vec::new();
        for plugin in plugins.into_iter().filter(|p| p.enabled) {
            let scheduler = Arc::clone(&self);
            let mut worker_shutdown = shutdown.clone();
            workers.push(tokio::spawn(async move {
                let mut ticker = interval(Duration::from_secs(plugin.interval_seconds.max(1)));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            scheduler.tick_plugin(&plugin, check_timeout).await;
                        }
                        _ = worker_shutdown.changed() => {
                            if *worker_shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        let mut shutdown = shutdown;
        let _ = shutdown.changed().await;
        for worker in workers {
            let _ = worker.await;
        }
        tokio::time::sleep(self.shutdown_grace).await;
        info!("scheduler shutdown complete");
    }

    async fn tick_plugin(&self, plugin: &PluginSpec, check_timeout: Duration) {
        let metric = metric_name(&plugin.sampler_ref);
        let key = match SeriesKey::new(plugin.name.clone(), metric) {
            Ok(key) => key,
            Err(err) => {
                error!(plugin = %plugin.name, error = %err, "invalid plugin/metric name, skipping tick");
                return;
            }
        };

        let Some(sampler) = self.samplers.get(&plugin.sampler_ref) else {
            warn!(plugin = %plugin.name, sampler_ref = %plugin.sampler_ref, "no sampler registered, tick failed");
            return;
        };

        let ctx = SampleContext::new(check_timeout);
        let value = match sampler.sample(&ctx).await {
            Ok(value) => value,
            Err(err) => {
                warn!(plugin = %plugin.name, error = %err, "sampler failed");
                return;
            }
        };

        let timestamp = now_unix();
        if let Err(err) = self.store.append(&key, MetricReading { value, timestamp }).await {
            warn!(plugin = %plugin.name, error = %err, "failed to append reading");
            return;
        }

        if let Some(event) =
            self.threshold_evaluator.evaluate(&key, value, plugin.warning_threshold, plugin.critical_threshold, timestamp)
        {
            self.bus.publish(event).await;
        }

        if self.anomaly_enabled {
            self.evaluate_anomaly(&key, value, timestamp).await;
        }

        self.evaluate_composite_rules(&plugin.name, timestamp).await;
    }

    async fn evaluate_anomaly(&self, key: &SeriesKey, value: f64, timestamp: i64) {
        let window_len = self.anomaly_config.window_size.max(50);
        let Ok(readings) = self.store.recent(key, window_len + 1).await else {
            return;
        };
        // `readings` includes the value just appended; the anomaly engine's
        // window must exclude it.
        let window: Vec<f64> = readings.iter().rev().skip(1).rev().map(|r| r.value).collect();
        if let Some(event) = self.anomaly_engine.evaluate(key, value, timestamp, &window, &self.anomaly_config) {
            self.bus.publish(event).await;
        }
    }

    async fn evaluate_composite_rules(&self, changed_plugin: &str, timestamp: i64) {
        for rule in &self.composite_rules {
            if !rule.enabled {
                continue;
            }
            let refs = match referenced_series(&rule.expression) {
                Ok(refs) => refs,
                Err(err) => {
                    warn!(rule = %rule.name, error = %err, "composite rule expression failed to parse");
                    continue;
                }
            };
            if !refs.iter().any(|(plugin, _)| plugin == changed_plugin) {
                continue;
            }

            let mut latest: HashMap<(String, String), f64> = HashMap::new();
            for (plugin, metric) in &refs {
                let Ok(key) = SeriesKey::new(plugin.clone(), metric.clone()) else { continue };
                if let Ok(recent) = self.store.recent(&key, 1).await {
                    if let Some(reading) = recent.last() {
                        latest.insert((plugin.clone(), metric.clone()), reading.value);
                    }
                }
            }
            let resolve = |plugin: &str, metric: &str| latest.get(&(plugin.to_string(), metric.to_string())).copied();

            match self.composite_evaluator.evaluate(rule, &resolve, timestamp) {
                Ok(Some(event)) => self.bus.publish(event).await,
                Ok(None) => {}
                Err(err) => warn!(rule = %rule.name, error = %err, "composite rule evaluation failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serversentry_core::{Event, Severity};
    use tempfile::tempdir;

    struct FixedSampler(f64);

    #[async_trait]
    impl crate::sampler::Sampler for FixedSampler {
        async fn sample(&self, _ctx: &SampleContext) -> serversentry_core::Result<f64> {
            Ok(self.0)
        }
    }

    fn plugin(name: &str, sampler_ref: &str, warning: Option<f64>, critical: Option<f64>) -> PluginSpec {
        PluginSpec {
            name: name.to_string(),
            enabled: true,
            interval_seconds: 1,
            sampler_ref: sampler_ref.to_string(),
            warning_threshold: warning,
            critical_threshold: critical,
            config: HashMap::new(),
        }
    }

    async fn scheduler_with(dir: &std::path::Path, rules: Vec<CompositeRule>) -> (Arc<Scheduler>, EventBus) {
        let store = Store::new(dir, 100);
        store.init().await.unwrap();
        let samplers = SamplerRegistry::new();
        samplers.register("hot-cpu", Arc::new(FixedSampler(95.0)));
        let bus = EventBus::new(64);
        let scheduler = Arc::new(Scheduler::new(store, samplers, AnomalyConfig { enabled: false, ..AnomalyConfig::default() }, false, rules, bus.clone()));
        (scheduler, bus)
    }

    #[tokio::test]
    async fn tick_plugin_publishes_threshold_breach() {
        let dir = tempdir().unwrap();
        let (scheduler, bus) = scheduler_with(dir.path(), Vec::new()).await;
        let p = plugin("cpu", "hot-cpu", Some(80.0), Some(90.0));

        scheduler.tick_plugin(&p, Duration::from_secs(1)).await;

        let event = bus.try_recv().expect("threshold event expected");
        match event {
            Event::Status { status, .. } => assert_eq!(status, serversentry_core::Status::Critical),
            _ => panic!("expected status event"),
        }
    }

    #[tokio::test]
    async fn tick_plugin_evaluates_composite_rules_referencing_it() {
        let dir = tempdir().unwrap();
        let rule = CompositeRule {
            name: "hot".into(),
            expression: "cpu.usage >= 90".into(),
            severity: Severity::Critical,
            cooldown_seconds: 60,
            notify_on_trigger: true,
            notify_on_recovery: true,
            enabled: true,
        };
        let (scheduler, bus) = scheduler_with(dir.path(), vec![rule]).await;
        let p = plugin("cpu", "hot-cpu", None, None);

        scheduler.tick_plugin(&p, Duration::from_secs(1)).await;

        let mut saw_composite = false;
        while let Some(event) = bus.try_recv() {
            if matches!(event, Event::Composite { triggered: true, .. }) {
                saw_composite = true;
            }
        }
        assert!(saw_composite, "composite rule referencing the ticked plugin should evaluate");
    }

    #[tokio::test]
    async fn unregistered_sampler_does_not_panic_tick() {
        let dir = tempdir().unwrap();
        let (scheduler, bus) = scheduler_with(dir.path(), Vec::new()).await;
        let p = plugin("ghost", "missing-sampler", None, None);

        scheduler.tick_plugin(&p, Duration::from_secs(1)).await;

        assert!(bus.try_recv().is_none());
    }
}

//! Notification Dispatcher (§4.8): cooldown/de-duplication, templating
//! and retried delivery across the configured channels.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serversentry_core::{Event, RetryExecutor, RetryStrategy, Status};
use tracing::{info, warn};

use crate::channel::{deliver_webhook, ChannelConfig, ChannelKind};
use crate::smtp;
use crate::template::{default_template, render, TemplateContext};

/// Outcome of one dispatch call, for callers that want to observe
/// suppression vs. delivery vs. failure.
#[derive(Debug, PartialEq)]
pub enum DispatchOutcome {
    Delivered,
    Suppressed,
    Failed,
}

pub struct NotificationDispatcher {
    hostname: String,
    http_client: reqwest::Client,
    channels: HashMap<String, ChannelConfig>,
    templates: HashMap<(String, String), String>,
    last_sent: Mutex<HashMap<(String, String), i64>>,
}

impl NotificationDispatcher {
    pub fn new(hostname: impl Into<String>, channels: HashMap<String, ChannelConfig>) -> Self {
        Self {
            hostname: hostname.into(),
            http_client: reqwest::Client::new(),
            channels,
            templates: HashMap::new(),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a per-(channel, event_kind) template override.
    pub fn set_template(&mut self, channel: &str, event_kind: &str, template: impl Into<String>) {
        self.templates.insert((channel.to_string(), event_kind.to_string()), template.into());
    }

    /// Validates every configured channel, as required once at config load.
    pub fn validate_channels(&self) -> serversentry_core::Result<()> {
        for config in self.channels.values() {
            config.validate()?;
        }
        Ok(())
    }

    /// Dispatches `event` to `channel_name`, subject to the
    /// `(source_id, channel)` cooldown. `source_id` is the rule name for
    /// composite events or `plugin.metric` otherwise; `cooldown_seconds`
    /// is the rule's or plugin's configured cooldown.
    pub async fn dispatch(&self, event: &Event, channel_name: &str, now: i64, cooldown_seconds: u64) -> DispatchOutcome {
        let Some(channel) = self.channels.get(channel_name) else {
            warn!(channel = channel_name, "dispatch requested for unconfigured channel");
            return DispatchOutcome::Failed;
        };

        let source_id = source_id(event);
        let key = (source_id.clone(), channel_name.to_string());

        {
            let mut guard = self.last_sent.lock().unwrap();
            if let Some(&last) = guard.get(&key) {
                if now - last < cooldown_seconds as i64 {
                    return DispatchOutcome::Suppressed;
                }
            }
            guard.entry(key.clone()).or_insert(0);
        }

        let body = self.render_event(channel_name, event);
        let result = self.deliver_with_retry(channel, &body).await;

        match result {
            Ok(()) => {
                self.last_sent.lock().unwrap().insert(key, now);
                info!(channel = channel_name, source = %source_id, "notification delivered");
                DispatchOutcome::Delivered
            }
            Err(err) => {
                warn!(channel = channel_name, source = %source_id, error = %err, "notification delivery failed");
                DispatchOutcome::Failed
            }
        }
    }

    fn render_event(&self, channel_name: &str, event: &Event) -> String {
        let kind = event_kind(event);
        let template = self
            .templates
            .get(&(channel_name.to_string(), kind.to_string()))
            .map(String::as_str)
            .unwrap_or_else(|| default_template(channel_name));
        render(template, &context_for(event, &self.hostname))
    }

    async fn deliver_with_retry(&self, channel: &ChannelConfig, body: &str) -> serversentry_core::Result<()> {
        let strategy = RetryStrategy::custom_delays(vec![Duration::from_secs(1), Duration::from_secs(4)]);
        let executor = RetryExecutor::new(strategy, format!("deliver:{}", channel.kind.as_str()));

        if channel.kind.is_http_webhook() {
            let client = self.http_client.clone();
            let channel = channel.clone();
            let body = body.to_string();
            executor
                .execute(move || {
                    let client = client.clone();
                    let channel = channel.clone();
                    let body = body.clone();
                    Box::pin(async move { deliver_webhook(&client, &channel, &body).await })
                })
                .await
        } else {
            let smtp_config = channel.smtp.clone().expect("validated at config load");
            let body = body.to_string();
            executor
                .execute(move || {
                    let smtp_config = smtp_config.clone();
                    let body = body.clone();
                    Box::pin(async move { smtp::send(&smtp_config, "ServerSentry alert", &body).await })
                })
                .await
        }
    }
}

fn source_id(event: &Event) -> String {
    match event {
        Event::Status { plugin, metric, .. } => format!("{plugin}.{metric}"),
        Event::Anomaly { plugin, metric, .. } => format!("{plugin}.{metric}"),
        Event::Composite { rule, .. } => rule.clone(),
    }
}

fn event_kind(event: &Event) -> &'static str {
    match event {
        Event::Status { .. } => "status",
        Event::Anomaly { .. } => "anomaly",
        Event::Composite { .. } => "composite",
    }
}

fn context_for(event: &Event, hostname: &str) -> TemplateContext {
    let mut ctx = TemplateContext::new();
    ctx.set("hostname", hostname);
    match event {
        Event::Status { plugin, metric, value, status, timestamp, .. } => {
            ctx.set("plugin", plugin).set("metric", metric).set("value", value).set("status", status_label(*status)).set("timestamp", timestamp);
        }
        Event::Anomaly { plugin, metric, value, dominant_kind, score, confidence, stats, timestamp, .. } => {
            ctx.set("plugin", plugin)
                .set("metric", metric)
                .set("value", value)
                .set("z_score", score)
                .set("confidence", format!("{confidence:?}").to_lowercase())
                .set("mean", stats.mean)
                .set("std_dev", stats.std_dev)
                .set("status", format!("{dominant_kind:?}"))
                .set("timestamp", timestamp);
        }
        Event::Composite { rule, triggered, severity, timestamp, .. } => {
            ctx.set("rule_name", rule)
                .set("status", if *triggered { "triggered" } else { "recovered" })
                .set("severity", format!("{severity:?}").to_lowercase())
                .set("timestamp", timestamp);
        }
    }
    ctx
}

fn status_label(status: Status) -> &'static str {
    match status {
        Status::Ok => "ok",
        Status::Warning => "warning",
        Status::Critical => "critical",
        Status::Error => "error",
    }
}

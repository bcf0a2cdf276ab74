//! Adapts the configuration tree's plain-data shapes (`serversentry_core::config`)
//! into the runtime types `serversentry-scheduler` and `serversentry-notify`
//! actually operate on.

use std::collections::HashMap;
use std::time::Duration;

use serversentry_core::config::{ChannelConfig as CoreChannelConfig, Config};
use serversentry_core::{AnomalyConfig, ConfigLoader, PluginSpec};
use serversentry_notify::{ChannelConfig, ChannelKind, SmtpConfig};
use tracing::warn;

/// Builds one `PluginSpec` per enabled plugin name, with built-in defaults
/// overlaid by that plugin's override file (`<config_directory>/<name>.conf`),
/// if present.
pub fn build_plugin_specs(config: &Config) -> Vec<PluginSpec> {
    config
        .plugins
        .enabled
        .iter()
        .map(|name| {
            let defaults = PluginSpec {
                name: name.clone(),
                enabled: true,
                interval_seconds: config.system.check_interval,
                sampler_ref: name.clone(),
                warning_threshold: None,
                critical_threshold: None,
                config: HashMap::new(),
            };
            let override_path = config.plugins.config_directory.join(format!("{name}.conf"));
            let override_file = override_path.exists().then_some(override_path.as_path());
            match ConfigLoader::load_plugin_spec(defaults.clone(), override_file) {
                Ok(spec) => spec,
                Err(err) => {
                    warn!(plugin = %name, error = %err, "failed to apply plugin override file, using defaults");
                    defaults
                }
            }
        })
        .collect()
}

/// The single, file-wide anomaly tuning every plugin's tick shares; §4.1/§4.4
/// describe no per-plugin override for these settings beyond `enabled`.
pub fn build_anomaly_config(config: &Config) -> AnomalyConfig {
    AnomalyConfig {
        enabled: config.anomaly_detection.enabled,
        sensitivity: config.anomaly_detection.sensitivity.resolve(),
        window_size: config.anomaly_detection.data_points.max(3),
        min_data_points: config.anomaly_detection.min_data_points,
        ..AnomalyConfig::default()
    }
}

/// Builds the notification dispatcher's channel map from the configured
/// channel entries, skipping any channel missing from `notifications.channels`.
pub fn build_channel_map(config: &Config) -> HashMap<String, ChannelConfig> {
    let mut channels = HashMap::new();
    for name in &config.notifications.channels {
        let Some(kind) = ChannelKind::parse(name) else {
            warn!(channel = %name, "unknown notification channel name, skipping");
            continue;
        };
        let Some(core_cfg) = select_core_channel(config, kind) else {
            warn!(channel = %name, "channel enabled but not configured, skipping");
            continue;
        };
        channels.insert(name.clone(), adapt_channel(kind, core_cfg, config.notifications.timeout));
    }
    channels
}

fn select_core_channel(config: &Config, kind: ChannelKind) -> Option<&CoreChannelConfig> {
    match kind {
        ChannelKind::Teams => config.notifications.teams.as_ref(),
        ChannelKind::Slack => config.notifications.slack.as_ref(),
        ChannelKind::Discord => config.notifications.discord.as_ref(),
        ChannelKind::Email => config.notifications.email.as_ref(),
        ChannelKind::Webhook => config.notifications.webhook.as_ref(),
    }
}

fn adapt_channel(kind: ChannelKind, core_cfg: &CoreChannelConfig, default_timeout: u64) -> ChannelConfig {
    let timeout = Duration::from_secs(if core_cfg.timeout > 0 { core_cfg.timeout } else { default_timeout });

    if kind.is_http_webhook() {
        ChannelConfig { kind, webhook_url: core_cfg.url.clone(), timeout, smtp: None }
    } else {
        let (host, port) = split_host_port(core_cfg.smtp_server.as_deref().unwrap_or(""));
        let smtp = SmtpConfig {
            host,
            port,
            starttls: true,
            username: core_cfg.username.clone(),
            password: core_cfg.password.clone(),
            from: core_cfg.username.clone().unwrap_or_else(|| "serversentry@localhost".to_string()),
            to: core_cfg.recipients.clone(),
        };
        ChannelConfig { kind, webhook_url: None, timeout, smtp: Some(smtp) }
    }
}

fn split_host_port(server: &str) -> (String, u16) {
    match server.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(587)),
        None => (server.to_string(), 587),
    }
}

/// `cooldown_seconds` to gate a dispatch by: a composite event uses its own
/// rule's configured cooldown; everything else uses the channel's.
pub fn cooldown_for(event: &serversentry_core::Event, channel_cooldown: u64, composite_rules: &[serversentry_core::CompositeRule]) -> u64 {
    match event {
        serversentry_core::Event::Composite { rule, .. } => {
            composite_rules.iter().find(|r| &r.name == rule).map(|r| r.cooldown_seconds).unwrap_or(channel_cooldown)
        }
        _ => channel_cooldown,
    }
}

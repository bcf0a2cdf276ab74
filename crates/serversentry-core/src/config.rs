//! Configuration tree and the layered loader described in §4.10/§6:
//! built-in defaults -> main structured file -> per-plugin override files
//! -> `SERVERSENTRY_`-prefixed environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::PluginSpec;

/// Top-level configuration tree, matching the shape documented in §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    pub plugins: PluginsConfig,
    pub notifications: NotificationsConfig,
    pub anomaly_detection: AnomalyDetectionConfig,
    pub composite_checks: CompositeChecksConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub enabled: bool,
    pub log_level: String,
    pub check_interval: u64,
    pub check_timeout: u64,
    pub max_log_size: u64,
    pub max_log_archives: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    pub enabled: Vec<String>,
    pub directory: PathBuf,
    pub config_directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub enabled: bool,
    pub channels: Vec<String>,
    pub default_template: String,
    pub timeout: u64,
    pub teams: Option<ChannelConfig>,
    pub slack: Option<ChannelConfig>,
    pub discord: Option<ChannelConfig>,
    pub email: Option<ChannelConfig>,
    pub webhook: Option<ChannelConfig>,
}

/// Settings shared by every channel type; `url` is used by the webhook
/// family, `smtp_server`/`username`/`password`/`recipients` by email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub url: Option<String>,
    pub smtp_server: Option<String>,
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub channel: Option<String>,
    pub timeout: u64,
    pub cooldown: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { url: None, smtp_server: None, username: None, password: None, recipients: Vec::new(), channel: None, timeout: 30, cooldown: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyDetectionConfig {
    pub enabled: bool,
    pub sensitivity: SensitivityLevel,
    pub data_points: usize,
    pub retention_days: u32,
    pub min_data_points: usize,
}

/// `sensitivity` accepts either a named level or a literal float in the
/// YAML file; named levels resolve to the float used by the statistics
/// kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensitivityLevel {
    Named(String),
    Value(f64),
}

impl SensitivityLevel {
    pub fn resolve(&self) -> f64 {
        match self {
            SensitivityLevel::Value(v) => *v,
            SensitivityLevel::Named(name) => match name.to_ascii_lowercase().as_str() {
                "low" => 3.0,
                "medium" => 2.0,
                "high" => 1.0,
                _ => 2.0,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeChecksConfig {
    pub enabled: bool,
    pub config_directory: PathBuf,
    pub cooldown_default: u64,
}

/// Ambient settings for the time-series store: ring capacity and the two
/// independent retention pathways (§9's open-question decision).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub data_directory: PathBuf,
    pub max_points: usize,
    pub raw_retention_days: u32,
    pub archive_retention_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system: SystemConfig {
                enabled: true,
                log_level: "info".to_string(),
                check_interval: 60,
                check_timeout: 30,
                max_log_size: 10 * 1024 * 1024,
                max_log_archives: 5,
            },
            plugins: PluginsConfig {
                enabled: vec!["cpu".to_string(), "memory".to_string(), "disk".to_string()],
                directory: PathBuf::from("./plugins"),
                config_directory: PathBuf::from("./config/plugins"),
            },
            notifications: NotificationsConfig {
                enabled: true,
                channels: Vec::new(),
                default_template: "default".to_string(),
                timeout: 30,
                teams: None,
                slack: None,
                discord: None,
                email: None,
                webhook: None,
            },
            anomaly_detection: AnomalyDetectionConfig {
                enabled: true,
                sensitivity: SensitivityLevel::Named("medium".to_string()),
                data_points: 50,
                retention_days: 30,
                min_data_points: 10,
            },
            composite_checks: CompositeChecksConfig {
                enabled: true,
                config_directory: PathBuf::from("./config/composite"),
                cooldown_default: 300,
            },
            store: StoreConfig {
                data_directory: PathBuf::from("./logs/anomaly"),
                max_points: 1000,
                raw_retention_days: 30,
                archive_retention_days: 90,
            },
        }
    }
}

impl Config {
    /// Validation rules from §4.10: thresholds numeric (enforced by the
    /// type system), intervals >= 1s, sensitivities in [1.0, 4.0], URLs
    /// well-formed, cooldowns >= 0 (enforced by the unsigned type, checked
    /// here only where a signed/float field stands in for duration).
    pub fn validate(&self) -> Result<()> {
        if self.system.check_interval < 1 {
            return Err(Error::Config("system.check_interval must be >= 1s".into()));
        }
        if self.system.check_timeout < 1 {
            return Err(Error::Config("system.check_timeout must be >= 1s".into()));
        }
        let sensitivity = self.anomaly_detection.sensitivity.resolve();
        if !(1.0..=4.0).contains(&sensitivity) {
            return Err(Error::Config(format!(
                "anomaly_detection.sensitivity must be in [1.0, 4.0], got {sensitivity}"
            )));
        }
        if self.anomaly_detection.min_data_points == 0 {
            return Err(Error::Config("anomaly_detection.min_data_points must be >= 1".into()));
        }
        for (name, channel) in self.notifications.channel_entries() {
            if let Some(url) = &channel.url {
                if url::Url::parse(url).is_err() {
                    return Err(Error::Config(format!("notifications.{name}.url is not a well-formed URL")));
                }
            }
        }
        Ok(())
    }
}

impl NotificationsConfig {
    fn channel_entries(&self) -> Vec<(&'static str, &ChannelConfig)> {
        let mut out = Vec::new();
        if let Some(c) = &self.teams {
            out.push(("teams", c));
        }
        if let Some(c) = &self.slack {
            out.push(("slack", c));
        }
        if let Some(c) = &self.discord {
            out.push(("discord", c));
        }
        if let Some(c) = &self.webhook {
            out.push(("webhook", c));
        }
        out
    }
}

/// Loads configuration following the precedence chain: defaults -> main
/// file -> per-plugin override files -> environment variables.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Layers 1-2 and 4: defaults, the main YAML file if present, then
    /// environment overrides. Per-plugin override files are loaded
    /// separately via [`ConfigLoader::load_plugin_spec`] since they
    /// produce `PluginSpec` values rather than `Config` fields.
    pub fn load(main_file: Option<&Path>) -> Result<Config> {
        let mut value = serde_json::to_value(Config::default())
            .map_err(|e| Error::Config(format!("failed to serialize defaults: {e}")))?;

        if let Some(path) = main_file {
            if path.exists() {
                let contents = std::fs::read_to_string(path)?;
                let file_value: serde_json::Value = serde_yaml::from_str(&contents)
                    .map_err(|e| Error::Config(format!("invalid config file {path:?}: {e}")))?;
                merge_json(&mut value, file_value);
            }
        }

        apply_env_overrides(&mut value, "SERVERSENTRY", &mut Vec::new());

        let config: Config = serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("config does not match expected shape: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reload semantics: on a validation failure, log and keep the
    /// previous configuration rather than aborting the process.
    pub fn reload(main_file: Option<&Path>, previous: &Config) -> Config {
        match Self::load(main_file) {
            Ok(next) => next,
            Err(err) => {
                tracing::error!(error = %err, "config reload failed, keeping previous configuration");
                previous.clone()
            }
        }
    }

    /// Parses a per-plugin override file (`key=value` lines) on top of a
    /// set of built-in defaults for that plugin type.
    pub fn load_plugin_spec(
        defaults: PluginSpec,
        override_file: Option<&Path>,
    ) -> Result<PluginSpec> {
        let mut spec = defaults;
        let Some(path) = override_file else { return Ok(spec) };
        if !path.exists() {
            return Ok(spec);
        }
        let contents = std::fs::read_to_string(path)?;
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::Config(format!(
                    "{path:?}:{}: expected key=value, got {line:?}",
                    lineno + 1
                )));
            };
            apply_plugin_override(&mut spec, key.trim(), value.trim())?;
        }
        Ok(spec)
    }
}

fn apply_plugin_override(spec: &mut PluginSpec, key: &str, value: &str) -> Result<()> {
    let plugin = spec.name.clone();
    let warning_key = format!("{plugin}_warning_threshold");
    let critical_key = format!("{plugin}_critical_threshold");
    let interval_key = format!("{plugin}_check_interval");

    if key == warning_key {
        spec.warning_threshold = Some(parse_numeric(key, value)?);
    } else if key == critical_key {
        spec.critical_threshold = Some(parse_numeric(key, value)?);
    } else if key == interval_key {
        spec.interval_seconds = parse_numeric(key, value)? as u64;
    } else {
        // Unrecognized or anomaly/detection-toggle keys (e.g.
        // `<plugin>_anomaly_enabled`, `disk_monitored_paths`) are retained
        // verbatim for the plugin to interpret.
        spec.config.insert(key.to_string(), value.to_string());
    }
    Ok(())
}

fn parse_numeric(key: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| Error::Config(format!("{key} must be numeric, got {value:?}")))
}

/// Recursively overlays `overlay` onto `base`, replacing scalars and
/// merging object keys.
fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                merge_json(base_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Walks `SERVERSENTRY_`-prefixed environment variables and applies each
/// to the dotted path it names (dots replaced by underscores), e.g.
/// `SERVERSENTRY_SYSTEM_LOG_LEVEL` -> `system.log_level`.
fn apply_env_overrides(value: &mut serde_json::Value, prefix: &str, path: &mut Vec<String>) {
    if let serde_json::Value::Object(map) = value {
        let keys: Vec<String> = map.keys().cloned().collect();
        for key in keys {
            path.push(key.clone());
            if let Some(entry) = map.get_mut(&key) {
                if entry.is_object() {
                    apply_env_overrides(entry, prefix, path);
                } else {
                    let env_key = format!("{prefix}_{}", path.join("_")).to_ascii_uppercase();
                    if let Ok(raw) = std::env::var(&env_key) {
                        *entry = coerce_like(entry, &raw);
                    }
                }
            }
            path.pop();
        }
    }
}

/// Coerces an environment-variable string into the same JSON value shape
/// as the field it overrides (bool/number/string).
fn coerce_like(existing: &serde_json::Value, raw: &str) -> serde_json::Value {
    match existing {
        serde_json::Value::Bool(_) => raw
            .parse::<bool>()
            .map(serde_json::Value::Bool)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
        serde_json::Value::Number(_) => serde_json::Number::from_f64(raw.parse::<f64>().unwrap_or_default())
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| serde_json::Value::String(raw.to_string())),
        _ => serde_json::Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn sensitivity_out_of_range_is_rejected() {
        let mut config = Config::default();
        config.anomaly_detection.sensitivity = SensitivityLevel::Value(9.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut config = Config::default();
        config.system.check_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn named_sensitivity_resolves() {
        assert_eq!(SensitivityLevel::Named("high".into()).resolve(), 1.0);
        assert_eq!(SensitivityLevel::Named("low".into()).resolve(), 3.0);
    }

    #[test]
    fn plugin_override_parses_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpu.conf");
        std::fs::write(&path, "cpu_warning_threshold=80\ncpu_critical_threshold=95\n").unwrap();

        let defaults = PluginSpec {
            name: "cpu".to_string(),
            enabled: true,
            interval_seconds: 60,
            sampler_ref: "cpu".to_string(),
            warning_threshold: None,
            critical_threshold: None,
            config: HashMap::new(),
        };
        let spec = ConfigLoader::load_plugin_spec(defaults, Some(&path)).unwrap();
        assert_eq!(spec.warning_threshold, Some(80.0));
        assert_eq!(spec.critical_threshold, Some(95.0));
    }

    #[test]
    fn env_override_applies_to_nested_path() {
        std::env::set_var("SERVERSENTRY_SYSTEM_LOG_LEVEL", "debug");
        let config = ConfigLoader::load(None).unwrap();
        std::env::remove_var("SERVERSENTRY_SYSTEM_LOG_LEVEL");
        assert_eq!(config.system.log_level, "debug");
    }
}

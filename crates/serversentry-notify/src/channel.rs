//! Channel configuration, validation and HTTP-webhook delivery (§4.8).

use std::time::Duration;

use serversentry_core::{Error, Result};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Teams,
    Slack,
    Discord,
    Email,
    Webhook,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Teams => "teams",
            ChannelKind::Slack => "slack",
            ChannelKind::Discord => "discord",
            ChannelKind::Email => "email",
            ChannelKind::Webhook => "webhook",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "teams" => Some(ChannelKind::Teams),
            "slack" => Some(ChannelKind::Slack),
            "discord" => Some(ChannelKind::Discord),
            "email" => Some(ChannelKind::Email),
            "webhook" => Some(ChannelKind::Webhook),
            _ => None,
        }
    }

    /// The substring a successful response body must contain, if the
    /// channel documents one. Slack's incoming webhook replies with the
    /// literal body `ok`.
    pub fn success_body_marker(self) -> Option<&'static str> {
        match self {
            ChannelKind::Slack => Some("ok"),
            _ => None,
        }
    }

    pub fn is_http_webhook(self) -> bool {
        !matches!(self, ChannelKind::Email)
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub starttls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    pub webhook_url: Option<String>,
    pub timeout: Duration,
    pub smtp: Option<SmtpConfig>,
}

impl ChannelConfig {
    /// Validated once at config load time, per §4.8.
    pub fn validate(&self) -> Result<()> {
        if self.kind.is_http_webhook() {
            let url = self.webhook_url.as_deref().ok_or_else(|| Error::Config(format!("{} channel requires a webhook URL", self.kind.as_str())))?;
            Url::parse(url).map_err(|e| Error::Config(format!("invalid webhook URL for {}: {e}", self.kind.as_str())))?;
        } else {
            let smtp = self.smtp.as_ref().ok_or_else(|| Error::Config("email channel requires smtp configuration".into()))?;
            if smtp.host.is_empty() {
                return Err(Error::Config("email channel smtp host must not be empty".into()));
            }
            if smtp.to.is_empty() {
                return Err(Error::Config("email channel requires at least one recipient".into()));
            }
        }
        Ok(())
    }
}

/// Posts `body` as a JSON `{"text": body}` payload to the channel's
/// webhook URL. Maps transport/status faults onto the transient/permanent
/// taxonomy per §4.8: network errors and 5xx/429 are transient; other 4xx
/// and malformed URLs are permanent.
pub async fn deliver_webhook(client: &reqwest::Client, config: &ChannelConfig, body: &str) -> Result<()> {
    let url = config.webhook_url.as_deref().ok_or_else(|| Error::delivery_permanent("missing webhook URL"))?;

    let response = client
        .post(url)
        .timeout(config.timeout)
        .json(&serde_json::json!({ "text": body }))
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                Error::delivery_transient(e.to_string())
            } else {
                Error::delivery_permanent(e.to_string())
            }
        })?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(Error::delivery_transient(format!("http {status}")));
    }
    if !status.is_success() {
        return Err(Error::delivery_permanent(format!("http {status}")));
    }

    if let Some(marker) = config.kind.success_body_marker() {
        let text = response.text().await.unwrap_or_default();
        if !text.trim().eq_ignore_ascii_case(marker) {
            return Err(Error::delivery_permanent(format!("unexpected response body: {text}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook_config(url: &str) -> ChannelConfig {
        ChannelConfig { kind: ChannelKind::Webhook, webhook_url: Some(url.into()), timeout: Duration::from_secs(5), smtp: None }
    }

    #[test]
    fn valid_webhook_url_passes_validation() {
        assert!(webhook_config("https://hooks.example.com/abc").validate().is_ok());
    }

    #[test]
    fn missing_webhook_url_fails_validation() {
        let config = ChannelConfig { kind: ChannelKind::Slack, webhook_url: None, timeout: Duration::from_secs(5), smtp: None };
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_webhook_url_fails_validation() {
        assert!(webhook_config("not a url").validate().is_err());
    }

    #[test]
    fn email_without_recipients_fails_validation() {
        let config = ChannelConfig {
            kind: ChannelKind::Email,
            webhook_url: None,
            timeout: Duration::from_secs(5),
            smtp: Some(SmtpConfig {
                host: "smtp.example.com".into(),
                port: 587,
                starttls: true,
                username: None,
                password: None,
                from: "alerts@example.com".into(),
                to: vec![],
            }),
        };
        assert!(config.validate().is_err());
    }
}

//! Template rendering over the fixed placeholder vocabulary (§4.8).
//! Missing placeholders render empty rather than erroring, so a template
//! referencing `{rule_name}` still renders for a plain status event.

use std::collections::HashMap;

/// Values available to a template for one event, keyed by placeholder
/// name without braces.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: HashMap<&'static str, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &'static str, value: impl ToString) -> &mut Self {
        self.values.insert(key, value.to_string());
        self
    }
}

/// Substitutes every `{placeholder}` in `template` from `ctx`, leaving
/// unknown placeholders as an empty string.
pub fn render(template: &str, ctx: &TemplateContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    let bytes = template.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = template[i..].find('}') {
                let key = &template[i + 1..i + end];
                out.push_str(ctx.values.get(key).map(String::as_str).unwrap_or(""));
                i += end + 1;
                continue;
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    let _ = &mut chars;
    out
}

/// Default templates, one per channel, used when no override is
/// configured.
pub fn default_template(channel: &str) -> &'static str {
    match channel {
        "slack" => "[{severity}] {hostname}: {plugin}.{metric} = {value} ({status})",
        "discord" => "**{severity}** {hostname}: `{plugin}.{metric}` = {value} ({status})",
        "teams" => "{severity}: {hostname} {plugin}.{metric}={value} status={status} rule={rule_name}",
        "email" => "ServerSentry alert on {hostname}\n{plugin}.{metric} = {value} ({status})\nrule: {rule_name} ({expression})",
        _ => "{hostname} {plugin}.{metric}={value} status={status} severity={severity}",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_placeholders() {
        let mut ctx = TemplateContext::new();
        ctx.set("hostname", "web-01").set("value", 95.2);
        let out = render("host={hostname} value={value}", &ctx);
        assert_eq!(out, "host=web-01 value=95.2");
    }

    #[test]
    fn unknown_placeholder_renders_empty() {
        let ctx = TemplateContext::new();
        let out = render("rule={rule_name}!", &ctx);
        assert_eq!(out, "rule=!");
    }

    #[test]
    fn literal_braces_without_closing_pass_through() {
        let ctx = TemplateContext::new();
        let out = render("unterminated {brace", &ctx);
        assert_eq!(out, "unterminated {brace");
    }
}

//! Loads composite rule definitions from `composite_checks.config_directory`:
//! one YAML document per `.yaml`/`.yml` file, each deserializing directly
//! into a `CompositeRule`.

use std::path::Path;

use serversentry_core::CompositeRule;
use tracing::warn;

pub fn load(dir: &Path) -> Vec<CompositeRule> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut rules = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"));
        if !is_yaml {
            continue;
        }
        match std::fs::read_to_string(&path).and_then(|contents| {
            serde_yaml::from_str::<CompositeRule>(&contents).map_err(std::io::Error::other)
        }) {
            Ok(rule) => rules.push(rule),
            Err(err) => warn!(file = %path.display(), error = %err, "failed to load composite rule file, skipping"),
        }
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_well_formed_rule_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("hot.yaml"),
            "name: hot\nexpression: \"cpu.usage >= 90\"\nseverity: warning\ncooldown_seconds: 60\nnotify_on_trigger: true\nnotify_on_recovery: true\nenabled: true\n",
        )
        .unwrap();

        let rules = load(dir.path());
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "hot");
    }

    #[test]
    fn malformed_file_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "not: [valid, rule").unwrap();
        assert!(load(dir.path()).is_empty());
    }

    #[test]
    fn missing_directory_yields_empty_list() {
        assert!(load(Path::new("/nonexistent/path/for/rules")).is_empty());
    }
}

//! Composite Rule Evaluator (§4.6): parses and evaluates boolean
//! expressions over the latest readings of several series, tracking
//! trigger/recovery edges and degrading a rule after repeated missing
//! references.

pub mod evaluator;
pub mod lexer;
pub mod parser;

use std::collections::HashMap;
use std::sync::Mutex;

use serversentry_core::{CompositeRule, Event, Result};
use tracing::warn;

use self::evaluator::{eval, referenced};
use self::lexer::lex;
use self::parser::parse;

const DEGRADE_AFTER_CONSECUTIVE_MISSES: u32 = 3;

/// Every `(plugin, metric)` pair a rule's expression references, so the
/// scheduler can decide whether a plugin's tick should re-run this rule
/// without re-evaluating every rule on every tick.
pub fn referenced_series(expression: &str) -> Result<Vec<(String, String)>> {
    let ast = parse(&lex(expression)?)?;
    Ok(referenced(&ast))
}

#[derive(Default)]
struct RuleState {
    consecutive_misses: u32,
    degraded: bool,
    last_triggered: bool,
}

/// Parses and evaluates composite rules, remembering per-rule state
/// (trigger edge, degradation) across scheduler ticks.
pub struct CompositeEvaluator {
    state: Mutex<HashMap<String, RuleState>>,
}

impl Default for CompositeEvaluator {
    fn default() -> Self {
        Self { state: Mutex::new(HashMap::new()) }
    }
}

impl CompositeEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears degradation state for `rule_name`, called on config reload.
    pub fn reset(&self, rule_name: &str) {
        self.state.lock().unwrap().remove(rule_name);
    }

    /// Evaluates `rule` against `resolve` (a lookup from `(plugin,
    /// metric)` to the latest reading). Returns an event when the rule's
    /// `notify_on_trigger`/`notify_on_recovery` flags allow it: every
    /// tick the expression is true (subject to the dispatcher's
    /// cooldown), and once on the true→false recovery edge.
    pub fn evaluate(
        &self,
        rule: &CompositeRule,
        resolve: &dyn Fn(&str, &str) -> Option<f64>,
        timestamp: i64,
    ) -> Result<Option<Event>> {
        let mut guard = self.state.lock().unwrap();
        let entry = guard.entry(rule.name.clone()).or_default();
        if entry.degraded {
            return Ok(None);
        }

        let ast = parse(&lex(&rule.expression)?)?;
        let result = eval(&ast, resolve);

        if result.missing.is_empty() {
            entry.consecutive_misses = 0;
        } else {
            entry.consecutive_misses += 1;
            warn!(rule = %rule.name, missing = ?result.missing, "composite rule reference unresolved");
            if entry.consecutive_misses > DEGRADE_AFTER_CONSECUTIVE_MISSES {
                entry.degraded = true;
                warn!(rule = %rule.name, "composite rule degraded after repeated missing references");
            }
        }

        let was_triggered = entry.last_triggered;
        entry.last_triggered = result.value;

        let event = if result.value && rule.notify_on_trigger {
            Some(Event::Composite {
                rule: rule.name.clone(),
                triggered: true,
                bindings: result.bindings,
                severity: rule.severity,
                timestamp,
            })
        } else if was_triggered && !result.value && rule.notify_on_recovery {
            Some(Event::Composite {
                rule: rule.name.clone(),
                triggered: false,
                bindings: result.bindings,
                severity: rule.severity,
                timestamp,
            })
        } else {
            None
        };

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serversentry_core::Severity;

    fn rule(expression: &str) -> CompositeRule {
        CompositeRule {
            name: "high-load".into(),
            expression: expression.into(),
            severity: Severity::Warning,
            cooldown_seconds: 60,
            notify_on_trigger: true,
            notify_on_recovery: true,
            enabled: true,
        }
    }

    #[test]
    fn triggers_every_tick_while_true() {
        let evaluator = CompositeEvaluator::new();
        let r = rule("cpu.usage >= 90");
        let resolve = |_: &str, _: &str| Some(95.0);

        let first = evaluator.evaluate(&r, &resolve, 1).unwrap();
        assert!(matches!(first, Some(Event::Composite { triggered: true, .. })));
        let second = evaluator.evaluate(&r, &resolve, 2).unwrap();
        assert!(matches!(second, Some(Event::Composite { triggered: true, .. })), "re-triggers every tick while true");
    }

    #[test]
    fn recovery_fires_once_on_edge() {
        let evaluator = CompositeEvaluator::new();
        let r = rule("cpu.usage >= 90");

        evaluator.evaluate(&r, &|_, _| Some(95.0), 1).unwrap();
        let recovery = evaluator.evaluate(&r, &|_, _| Some(10.0), 2).unwrap();
        assert!(matches!(recovery, Some(Event::Composite { triggered: false, .. })));

        let steady = evaluator.evaluate(&r, &|_, _| Some(10.0), 3).unwrap();
        assert!(steady.is_none(), "recovery should not re-fire while staying false");
    }

    #[test]
    fn degrades_after_repeated_missing_references() {
        let evaluator = CompositeEvaluator::new();
        let r = rule("cpu.usage >= 90");
        for i in 1..=4 {
            evaluator.evaluate(&r, &|_, _| None, i).unwrap();
        }
        let after_degrade = evaluator.evaluate(&r, &|_, _| Some(95.0), 5).unwrap();
        assert!(after_degrade.is_none(), "degraded rule must not evaluate further");
    }

    #[test]
    fn referenced_series_lists_every_plugin_metric_pair() {
        let refs = referenced_series("cpu.usage >= 90 OR memory.usage >= 95").unwrap();
        assert_eq!(refs, vec![("cpu".to_string(), "usage".to_string()), ("memory".to_string(), "usage".to_string())]);
    }

    #[test]
    fn reset_clears_degradation() {
        let evaluator = CompositeEvaluator::new();
        let r = rule("cpu.usage >= 90");
        for i in 1..=4 {
            evaluator.evaluate(&r, &|_, _| None, i).unwrap();
        }
        evaluator.reset(&r.name);
        let event = evaluator.evaluate(&r, &|_, _| Some(95.0), 5).unwrap();
        assert!(event.is_some(), "reset should allow re-evaluation after reload");
    }
}

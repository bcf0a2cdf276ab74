//! Evaluates a parsed composite expression against the latest reading of
//! each referenced series. A missing reference makes its comparison
//! false rather than aborting the whole expression, so `a.b > 1 OR c.d >
//! 1` can still trigger on `a.b` alone.

use std::collections::HashMap;

use super::parser::{Ast, CmpOp, Operand};

pub struct EvalResult {
    pub value: bool,
    pub missing: Vec<(String, String)>,
    pub bindings: HashMap<String, f64>,
}

pub fn eval(ast: &Ast, resolve: &dyn Fn(&str, &str) -> Option<f64>) -> EvalResult {
    let mut missing = Vec::new();
    let mut bindings = HashMap::new();
    let value = eval_node(ast, resolve, &mut missing, &mut bindings);
    EvalResult { value, missing, bindings }
}

fn eval_node(
    ast: &Ast,
    resolve: &dyn Fn(&str, &str) -> Option<f64>,
    missing: &mut Vec<(String, String)>,
    bindings: &mut HashMap<String, f64>,
) -> bool {
    match ast {
        Ast::Or(l, r) => {
            let lv = eval_node(l, resolve, missing, bindings);
            let rv = eval_node(r, resolve, missing, bindings);
            lv | rv
        }
        Ast::And(l, r) => {
            let lv = eval_node(l, resolve, missing, bindings);
            let rv = eval_node(r, resolve, missing, bindings);
            lv & rv
        }
        Ast::Not(inner) => !eval_node(inner, resolve, missing, bindings),
        Ast::Cmp(left, op, right) => {
            let lv = resolve_operand(left, resolve, missing, bindings);
            let rv = resolve_operand(right, resolve, missing, bindings);
            match (lv, rv) {
                (Some(a), Some(b)) => compare(a, b, op),
                _ => false,
            }
        }
    }
}

fn resolve_operand(
    operand: &Operand,
    resolve: &dyn Fn(&str, &str) -> Option<f64>,
    missing: &mut Vec<(String, String)>,
    bindings: &mut HashMap<String, f64>,
) -> Option<f64> {
    match operand {
        Operand::Num(n) => Some(*n),
        Operand::Ref(plugin, metric) => match resolve(plugin, metric) {
            Some(v) => {
                bindings.insert(format!("{plugin}.{metric}"), v);
                Some(v)
            }
            None => {
                missing.push((plugin.clone(), metric.clone()));
                None
            }
        },
    }
}

/// Every `(plugin, metric)` pair an expression references, for callers that
/// need to know which series to resolve before evaluating (or whether a
/// rule is affected by a given plugin's tick).
pub fn referenced(ast: &Ast) -> Vec<(String, String)> {
    let mut out = Vec::new();
    collect_refs(ast, &mut out);
    out
}

fn collect_refs(ast: &Ast, out: &mut Vec<(String, String)>) {
    match ast {
        Ast::Or(l, r) | Ast::And(l, r) => {
            collect_refs(l, out);
            collect_refs(r, out);
        }
        Ast::Not(inner) => collect_refs(inner, out),
        Ast::Cmp(left, _, right) => {
            for operand in [left, right] {
                if let Operand::Ref(plugin, metric) = operand {
                    out.push((plugin.clone(), metric.clone()));
                }
            }
        }
    }
}

fn compare(a: f64, b: f64, op: &CmpOp) -> bool {
    match op {
        CmpOp::Gt => a > b,
        CmpOp::Lt => a < b,
        CmpOp::Ge => a >= b,
        CmpOp::Le => a <= b,
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
    }
}

#[cfg(test)]
mod tests {
    use super::super::{lexer::lex, parser::parse};
    use super::*;

    #[test]
    fn evaluates_true_when_reference_resolves_above_threshold() {
        let ast = parse(&lex("cpu.usage >= 90").unwrap()).unwrap();
        let result = eval(&ast, &|_, _| Some(95.0));
        assert!(result.value);
        assert_eq!(result.bindings.get("cpu.usage"), Some(&95.0));
    }

    #[test]
    fn missing_reference_makes_comparison_false() {
        let ast = parse(&lex("cpu.usage >= 90").unwrap()).unwrap();
        let result = eval(&ast, &|_, _| None);
        assert!(!result.value);
        assert_eq!(result.missing, vec![("cpu".to_string(), "usage".to_string())]);
    }

    #[test]
    fn or_short_circuits_on_first_true_branch_values() {
        let ast = parse(&lex("a.b > 1 OR c.d > 1").unwrap()).unwrap();
        let result = eval(&ast, &|p, _| if p == "a" { Some(5.0) } else { None });
        assert!(result.value);
    }

    #[test]
    fn not_negates_inner_result() {
        let ast = parse(&lex("NOT a.b > 1").unwrap()).unwrap();
        let result = eval(&ast, &|_, _| Some(0.0));
        assert!(result.value);
    }

    #[test]
    fn referenced_collects_every_operand_pair() {
        let ast = parse(&lex("a.b > 1 OR c.d > 1").unwrap()).unwrap();
        let refs = referenced(&ast);
        assert_eq!(refs, vec![("a".to_string(), "b".to_string()), ("c".to_string(), "d".to_string())]);
    }
}

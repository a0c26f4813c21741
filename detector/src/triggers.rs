//! Declarative trigger evaluator.
//!
//! Triggers are loaded from a YAML config file as `"field op value"`
//! strings, e.g. `"buy_count_5m >= 20"`. Each trigger is bucketed into the
//! 5-minute or 1-hour group depending on whether any of its conditions
//! reference a `_1h` field, so a single evaluation pass only has to pull the
//! window it actually needs. Config can be hot-reloaded: a new file is
//! parsed and swapped in atomically via `arc_swap`, with no restart and no
//! window where a partially-updated trigger set is visible.

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerDef {
    pub name: String,
    pub conditions: Vec<String>,
    #[serde(default)]
    pub reason_template: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerFile {
    pub triggers: Vec<TriggerDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Ge,
    Le,
    Eq,
    Gt,
    Lt,
}

#[derive(Debug, Clone)]
struct Condition {
    field: String,
    op: Op,
    value: f64,
}

#[derive(Debug, Clone)]
struct CompiledTrigger {
    name: String,
    conditions: Vec<Condition>,
    reason_template: Option<String>,
    uses_1h: bool,
}

struct CompiledTriggers {
    triggers_5m: Vec<CompiledTrigger>,
    triggers_1h: Vec<CompiledTrigger>,
}

pub struct TriggerEvaluator {
    compiled: ArcSwap<CompiledTriggers>,
}

impl TriggerEvaluator {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let compiled = compile(yaml)?;
        Ok(Self { compiled: ArcSwap::from_pointee(compiled) })
    }

    /// Parse and atomically swap in a new trigger set. Callers typically
    /// drive this from a file-watcher or pub/sub reload signal.
    pub fn reload(&self, yaml: &str) -> Result<()> {
        let compiled = compile(yaml)?;
        self.compiled.store(Arc::new(compiled));
        Ok(())
    }

    /// Evaluate 5-minute triggers first, then 1-hour triggers, returning the
    /// first match (name, formatted reason).
    pub fn evaluate(&self, fields_5m: &HashMap<String, f64>, fields_1h: &HashMap<String, f64>) -> Option<(String, String)> {
        let compiled = self.compiled.load();

        let mut combined = fields_5m.clone();
        combined.extend(fields_1h.clone());

        for trigger in &compiled.triggers_5m {
            if trigger.conditions.iter().all(|c| evaluate_condition(c, &combined)) {
                return Some((trigger.name.clone(), format_reason(trigger, &combined)));
            }
        }
        for trigger in &compiled.triggers_1h {
            if trigger.conditions.iter().all(|c| evaluate_condition(c, &combined)) {
                return Some((trigger.name.clone(), format_reason(trigger, &combined)));
            }
        }
        None
    }
}

fn compile(yaml: &str) -> Result<CompiledTriggers> {
    let file: TriggerFile = serde_yaml::from_str(yaml).context("failed to parse trigger config yaml")?;
    let mut triggers_5m = Vec::new();
    let mut triggers_1h = Vec::new();

    for def in file.triggers {
        let conditions: Vec<Condition> = def
            .conditions
            .iter()
            .map(|c| parse_condition(c))
            .collect::<Result<_>>()
            .with_context(|| format!("failed to parse conditions for trigger {}", def.name))?;

        let uses_1h = conditions.iter().any(|c| c.field.contains("_1h"));
        let compiled = CompiledTrigger {
            name: def.name,
            conditions,
            reason_template: def.reason_template,
            uses_1h,
        };

        if uses_1h {
            triggers_1h.push(compiled);
        } else {
            triggers_5m.push(compiled);
        }
    }

    Ok(CompiledTriggers { triggers_5m, triggers_1h })
}

/// Parse `"field op value"`. Operators are checked longest-first (`>=`/`<=`
/// before `>`/`<`) so a `>=` condition never gets misparsed as `>` with a
/// stray `=` glued onto the value.
fn parse_condition(condition: &str) -> Result<Condition> {
    const OPERATORS: &[(&str, Op)] = &[(">=", Op::Ge), ("<=", Op::Le), ("==", Op::Eq), (">", Op::Gt), ("<", Op::Lt)];

    for (symbol, op) in OPERATORS {
        if let Some(idx) = condition.find(symbol) {
            let field = condition[..idx].trim().to_string();
            let value_str = condition[idx + symbol.len()..].trim();
            let value: f64 = value_str
                .parse()
                .with_context(|| format!("invalid numeric value in condition: {}", condition))?;
            return Ok(Condition { field, op: *op, value });
        }
    }
    anyhow::bail!("no recognized operator in condition: {}", condition)
}

fn evaluate_condition(condition: &Condition, fields: &HashMap<String, f64>) -> bool {
    let actual = match fields.get(&condition.field) {
        Some(v) => *v,
        None => return false,
    };
    match condition.op {
        Op::Ge => actual >= condition.value,
        Op::Le => actual <= condition.value,
        Op::Eq => (actual - condition.value).abs() < f64::EPSILON,
        Op::Gt => actual > condition.value,
        Op::Lt => actual < condition.value,
    }
}

fn format_reason(trigger: &CompiledTrigger, fields: &HashMap<String, f64>) -> String {
    if let Some(template) = &trigger.reason_template {
        let mut out = template.clone();
        for (key, value) in fields {
            out = out.replace(&format!("{{{}}}", key), &value.to_string());
        }
        out
    } else {
        format!(
            "{} matched: {}",
            trigger.name,
            trigger
                .conditions
                .iter()
                .map(|c| format!("{} {:?} {}", c.field, c.op, c.value))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_YAML: &str = r#"
triggers:
  - name: buy_burst
    conditions:
      - "buy_count_5m >= 20"
      - "unique_buyers_5m >= 10"
    reason_template: "{buy_count_5m} buys from {unique_buyers_5m} wallets in 5m"
  - name: sustained_interest
    conditions:
      - "buy_count_1h >= 100"
"#;

    #[test]
    fn classifies_triggers_into_5m_and_1h_groups_by_field_suffix() {
        let evaluator = TriggerEvaluator::from_yaml(SAMPLE_YAML).unwrap();
        let compiled = evaluator.compiled.load();
        assert_eq!(compiled.triggers_5m.len(), 1);
        assert_eq!(compiled.triggers_1h.len(), 1);
    }

    #[test]
    fn fires_5m_trigger_before_1h_trigger() {
        let evaluator = TriggerEvaluator::from_yaml(SAMPLE_YAML).unwrap();
        let mut fields_5m = HashMap::new();
        fields_5m.insert("buy_count_5m".to_string(), 25.0);
        fields_5m.insert("unique_buyers_5m".to_string(), 12.0);
        let mut fields_1h = HashMap::new();
        fields_1h.insert("buy_count_1h".to_string(), 150.0);

        let (name, reason) = evaluator.evaluate(&fields_5m, &fields_1h).unwrap();
        assert_eq!(name, "buy_burst");
        assert!(reason.contains("25"));
    }

    #[test]
    fn does_not_fire_when_conditions_unmet() {
        let evaluator = TriggerEvaluator::from_yaml(SAMPLE_YAML).unwrap();
        let fields_5m = HashMap::new();
        let fields_1h = HashMap::new();
        assert!(evaluator.evaluate(&fields_5m, &fields_1h).is_none());
    }

    #[test]
    fn reload_swaps_in_new_trigger_set() {
        let evaluator = TriggerEvaluator::from_yaml(SAMPLE_YAML).unwrap();
        evaluator
            .reload(
                r#"
triggers:
  - name: only_trigger
    conditions:
      - "buy_count_5m >= 1"
"#,
            )
            .unwrap();
        let compiled = evaluator.compiled.load();
        assert_eq!(compiled.triggers_5m.len(), 1);
        assert_eq!(compiled.triggers_5m[0].name, "only_trigger");
    }

    #[test]
    fn parse_condition_prefers_ge_over_gt() {
        let cond = parse_condition("buy_count_5m >= 5").unwrap();
        assert_eq!(cond.op, Op::Ge);
        assert_eq!(cond.value, 5.0);
    }
}

//! Condition evaluation for workflow edge routing
//!
//! A small, bounded expression language over the previous agent's output:
//!
//! ```text
//! output.category == 'technical'
//! output.confidence > 0.8
//! output.priority in ['high', 'critical']
//! 'error' in output.text
//! output.category == 'billing' and output.priority == 'high'
//! ```
//!
//! Evaluation is total: every `(condition, output)` pair yields `true` or
//! `false`, never a panic or an error. Unknown path segments resolve to
//! null, which compares unequal to any non-null literal and is a member of
//! nothing. List literals are parsed as data, never as code. If the whole
//! expression does not parse, the evaluator falls back to a
//! case-insensitive substring match of the condition against the output
//! text; strict mode disables that fallback.

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

fn compare_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^output\.([A-Za-z_][\w]*(?:\.[A-Za-z_][\w]*)*)\s*(==|!=|>=|<=|>|<|not\s+in|in|contains)\s*(.+)$",
        )
        .expect("invalid compare pattern")
    })
}

fn membership_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(.+?)\s+(not\s+in|in)\s+output\.([A-Za-z_][\w]*(?:\.[A-Za-z_][\w]*)*)$")
            .expect("invalid membership pattern")
    })
}

fn or_splitter() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\s+or\s+").expect("invalid or splitter"))
}

fn and_splitter() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\s+and\s+").expect("invalid and splitter"))
}

/// Evaluates edge conditions against agent output
#[derive(Debug, Clone, Default)]
pub struct ConditionEvaluator {
    strict: bool,
}

impl ConditionEvaluator {
    /// Create an evaluator with the lenient substring fallback enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a strict evaluator: unparseable conditions evaluate to false
    pub fn strict() -> Self {
        Self { strict: true }
    }

    /// Evaluate a condition against an agent's output
    ///
    /// An empty condition is always true.
    pub fn evaluate(&self, condition: &str, output: &Value) -> bool {
        let condition = condition.trim();
        if condition.is_empty() {
            return true;
        }

        let output = coerce_output(output);
        self.eval_expr(condition, &output)
    }

    /// `or` binds looser than `and`
    fn eval_expr(&self, condition: &str, output: &Map<String, Value>) -> bool {
        let parts: Vec<&str> = or_splitter().split(condition).collect();
        if parts.len() > 1 {
            return parts.iter().any(|p| self.eval_and(p.trim(), output));
        }
        self.eval_and(condition, output)
    }

    fn eval_and(&self, condition: &str, output: &Map<String, Value>) -> bool {
        let parts: Vec<&str> = and_splitter().split(condition).collect();
        if parts.len() > 1 {
            return parts.iter().all(|p| self.eval_cmp(p.trim(), output));
        }
        self.eval_cmp(condition, output)
    }

    fn eval_cmp(&self, condition: &str, output: &Map<String, Value>) -> bool {
        // Pattern 1: output.field op value
        if let Some(captures) = compare_pattern().captures(condition) {
            let path = &captures[1];
            let op = normalize_op(&captures[2]);
            let value_str = captures[3].trim();

            let field_value = resolve_path(output, path);
            let compare_value = parse_value(value_str);
            return apply_op(&op, &field_value, &compare_value);
        }

        // Pattern 2: value in output.field
        if let Some(captures) = membership_pattern().captures(condition) {
            let value_str = captures[1].trim();
            let op = normalize_op(&captures[2]);
            let path = &captures[3];

            let compare_value = parse_value(value_str);
            let field_value = resolve_path(output, path);
            return apply_op(&op, &compare_value, &field_value);
        }

        if self.strict {
            return false;
        }

        // Fallback: substring match of the condition against the output
        // text, case-insensitive.
        let text = output_text(output);
        text.to_lowercase().contains(&condition.to_lowercase())
    }
}

/// Coerce an output value into a map for field access
///
/// Strings are parsed as JSON when possible; anything that is not an
/// object is wrapped as `{text, raw}`.
fn coerce_output(output: &Value) -> Map<String, Value> {
    match output {
        Value::Object(map) => map.clone(),
        Value::String(s) => {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(s) {
                return map;
            }
            wrap_text(s.clone(), Value::String(s.clone()))
        }
        other => wrap_text(other.to_string(), other.clone()),
    }
}

fn wrap_text(text: String, raw: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("text".to_string(), Value::String(text));
    map.insert("raw".to_string(), raw);
    map
}

fn output_text(output: &Map<String, Value>) -> String {
    match output.get("text").or_else(|| output.get("raw")) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => Value::Object(output.clone()).to_string(),
    }
}

/// Resolve a dotted path; any missing or non-object step yields null
fn resolve_path(output: &Map<String, Value>, path: &str) -> Value {
    let mut current = Value::Object(output.clone());
    for part in path.split('.') {
        current = match current.get(part) {
            Some(value) => value.clone(),
            None => return Value::Null,
        };
    }
    current
}

fn normalize_op(op: &str) -> String {
    let lower = op.to_lowercase();
    if lower.starts_with("not") {
        "not in".to_string()
    } else {
        lower
    }
}

/// Parse a literal: quoted string, list (as data), bool, null, number,
/// or a bare string
fn parse_value(value_str: &str) -> Value {
    let value_str = value_str.trim();

    if (value_str.starts_with('\'') && value_str.ends_with('\'') && value_str.len() >= 2)
        || (value_str.starts_with('"') && value_str.ends_with('"') && value_str.len() >= 2)
    {
        return Value::String(value_str[1..value_str.len() - 1].to_string());
    }

    if value_str.starts_with('[') && value_str.ends_with(']') {
        let normalized = value_str.replace('\'', "\"");
        if let Ok(value) = serde_json::from_str::<Value>(&normalized) {
            return value;
        }
        return Value::String(value_str.to_string());
    }

    match value_str.to_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "none" | "null" => return Value::Null,
        _ => {}
    }

    if let Ok(int) = value_str.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = value_str.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }

    Value::String(value_str.to_string())
}

fn apply_op(op: &str, left: &Value, right: &Value) -> bool {
    match op {
        "==" => values_equal(left, right),
        "!=" => !values_equal(left, right),
        ">" => compare_values(left, right) == Some(Ordering::Greater),
        ">=" => matches!(
            compare_values(left, right),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ),
        "<" => compare_values(left, right) == Some(Ordering::Less),
        "<=" => matches!(
            compare_values(left, right),
            Some(Ordering::Less) | Some(Ordering::Equal)
        ),
        "in" => is_member(left, right),
        "not in" => !is_member(left, right),
        // path contains value: membership with the operands flipped
        "contains" => is_member(right, left),
        _ => false,
    }
}

/// Equality with numeric tolerance: 1 == 1.0
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

/// Ordering for homogeneous operands only; anything else is undefined
fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return Some(a.cmp(b));
    }
    None
}

/// `needle in haystack`: substring for strings, membership for arrays.
/// Null is a member of nothing.
fn is_member(needle: &Value, haystack: &Value) -> bool {
    if needle.is_null() {
        return false;
    }
    match haystack {
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::String(text) => match needle {
            Value::String(sub) => text.contains(sub.as_str()),
            other => text.contains(&other.to_string()),
        },
        _ => false,
    }
}

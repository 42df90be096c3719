use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::Record;
use super::clean::to_snake_case;
use super::formula;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    #[default]
    String,
    Number,
    Boolean,
    Date,
}

/// Per-field transformation attached to a mapping rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transformation {
    #[serde(rename = "type", default)]
    pub kind: TransformKind,
    #[serde(default)]
    pub default: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

/// The engine's view of a mapping rule.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    pub source_field: String,
    pub target_field: String,
    pub transformation: Transformation,
}

/// Apply mapping rules to every record. An empty rule list is the identity.
///
/// Rules are applied in list order; when two rules write the same target
/// field the later one wins. Failures are isolated per field: a bad value or
/// formula yields the rule's default, an unusable target field skips the rule.
pub fn transform(records: &[Record], rules: &[FieldMapping]) -> Vec<Record> {
    if rules.is_empty() {
        return records.to_vec();
    }
    records.iter().map(|r| apply_rules(r, rules)).collect()
}

pub fn apply_rules(record: &Record, rules: &[FieldMapping]) -> Record {
    let mut out = Record::new();
    for rule in rules {
        let target = rule.target_field.trim();
        if target.is_empty() || target == "undefined" || target == "null" {
            tracing::warn!(
                source_field = %rule.source_field,
                "mapping rule has no usable target field, skipping"
            );
            continue;
        }
        let value = rule.transformation.apply(record, &rule.source_field);
        out.insert(target.to_string(), value);
    }
    out
}

/// Look a field up by its exact name, falling back to its cleaned (snake_case) form.
pub(crate) fn lookup<'a>(record: &'a Record, field: &str) -> Option<&'a Value> {
    record
        .get(field)
        .or_else(|| record.get(&to_snake_case(field)))
}

impl Transformation {
    pub fn apply(&self, record: &Record, source_field: &str) -> Value {
        if let Some(expr) = self.formula.as_deref().filter(|f| !f.trim().is_empty()) {
            return match formula::evaluate(expr, record) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(
                        formula = %expr,
                        error = %e,
                        "formula failed, using default"
                    );
                    self.default.clone()
                }
            };
        }

        let raw = lookup(record, source_field).unwrap_or(&Value::Null);
        self.kind.coerce(raw).unwrap_or_else(|| self.default.clone())
    }
}

impl TransformKind {
    /// Coerce a raw value, or `None` when the rule's default should be used.
    pub fn coerce(&self, raw: &Value) -> Option<Value> {
        if raw.is_null() {
            return None;
        }
        match self {
            TransformKind::String => Some(Value::String(match raw {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => other.to_string(),
            })),
            TransformKind::Number => to_number(raw).and_then(number_value),
            TransformKind::Boolean => Some(Value::Bool(truthy(raw))),
            TransformKind::Date => parse_date(raw).map(|dt| {
                Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }),
        }
    }
}

/// Numeric reading of a value; non-numeric text yields `None`.
pub(crate) fn to_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Integral values come back as JSON integers.
pub(crate) fn number_value(f: f64) -> Option<Value> {
    if !f.is_finite() {
        return None;
    }
    if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        return Some(Value::Number(Number::from(f as i64)));
    }
    Number::from_f64(f).map(Value::Number)
}

pub(crate) fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

fn parse_date(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        // epoch milliseconds
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for fmt in DATETIME_FORMATS {
                if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(ndt.and_utc());
                }
            }
            for fmt in DATE_FORMATS {
                if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
                    return d.and_hms_opt(0, 0, 0).map(|ndt| ndt.and_utc());
                }
            }
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    fn rule(source: &str, target: &str, t: Value) -> FieldMapping {
        FieldMapping {
            source_field: source.to_string(),
            target_field: target.to_string(),
            transformation: serde_json::from_value(t).unwrap(),
        }
    }

    #[test]
    fn test_empty_rules_is_identity() {
        let records = vec![rec(json!({"a": 1, "b": "x"}))];
        assert_eq!(transform(&records, &[]), records);
    }

    #[test]
    fn test_number_fallback_to_default() {
        let out = transform(
            &[rec(json!({"amount": "not-a-number"}))],
            &[rule("amount", "amount", json!({"type": "number", "default": 0}))],
        );
        assert_eq!(out[0]["amount"], json!(0));
    }

    #[test]
    fn test_number_parses_text() {
        let out = transform(
            &[rec(json!({"amount": " 12.50 ", "qty": "3"}))],
            &[
                rule("amount", "total", json!({"type": "number"})),
                rule("qty", "qty", json!({"type": "number"})),
            ],
        );
        assert_eq!(out[0]["total"], json!(12.5));
        assert_eq!(out[0]["qty"], json!(3));
    }

    #[test]
    fn test_boolean_truthiness() {
        let t = TransformKind::Boolean;
        assert_eq!(t.coerce(&json!(0)), Some(json!(false)));
        assert_eq!(t.coerce(&json!("yes")), Some(json!(true)));
        assert_eq!(t.coerce(&json!("")), Some(json!(false)));
        assert_eq!(t.coerce(&json!(null)), None);
    }

    #[test]
    fn test_date_parsing_and_fallback() {
        let out = transform(
            &[rec(json!({"d1": "2024-03-05", "d2": "2024-03-05T10:00:00+02:00", "d3": "soon"}))],
            &[
                rule("d1", "d1", json!({"type": "date"})),
                rule("d2", "d2", json!({"type": "date"})),
                rule("d3", "d3", json!({"type": "date", "default": null})),
            ],
        );
        assert_eq!(out[0]["d1"], "2024-03-05T00:00:00.000Z");
        assert_eq!(out[0]["d2"], "2024-03-05T08:00:00.000Z");
        assert_eq!(out[0]["d3"], Value::Null);
    }

    #[test]
    fn test_string_trims_and_stringifies() {
        let t = TransformKind::String;
        assert_eq!(t.coerce(&json!("  a ")), Some(json!("a")));
        assert_eq!(t.coerce(&json!(42)), Some(json!("42")));
        assert_eq!(t.coerce(&json!(null)), None);
    }

    #[test]
    fn test_invalid_target_field_is_skipped_without_corrupting_others() {
        let out = transform(
            &[rec(json!({"a": "1", "b": "2"}))],
            &[
                rule("a", "", json!({"type": "number"})),
                rule("b", "bee", json!({"type": "number"})),
                rule("a", "undefined", json!({"type": "string"})),
            ],
        );
        assert_eq!(out[0].len(), 1);
        assert_eq!(out[0]["bee"], json!(2));
    }

    #[test]
    fn test_later_rule_wins_on_same_target() {
        let out = transform(
            &[rec(json!({"first": "x", "second": "y"}))],
            &[
                rule("first", "name", json!({"type": "string"})),
                rule("second", "name", json!({"type": "string"})),
            ],
        );
        assert_eq!(out[0]["name"], "y");
    }

    #[test]
    fn test_formula_and_formula_failure_fallback() {
        let out = transform(
            &[rec(json!({"price": 2.5, "qty": 4}))],
            &[
                rule("price", "total", json!({"type": "number", "formula": "price * qty"})),
                rule("price", "broken", json!({"type": "number", "default": -1, "formula": "price * "})),
            ],
        );
        assert_eq!(out[0]["total"], json!(10));
        assert_eq!(out[0]["broken"], json!(-1));
    }

    #[test]
    fn test_deeply_nested_formula_falls_back_to_default() {
        let deep = format!("{}price{}", "(".repeat(200_000), ")".repeat(200_000));
        let out = transform(
            &[rec(json!({"price": 2.5}))],
            &[rule("price", "total", json!({"type": "number", "default": 0, "formula": deep}))],
        );
        assert_eq!(out[0]["total"], json!(0));
    }

    #[test]
    fn test_source_field_matches_cleaned_key() {
        let out = transform(
            &[rec(json!({"customer_name": "Ada"}))],
            &[rule("Customer Name", "name", json!({}))],
        );
        assert_eq!(out[0]["name"], "Ada");
    }

    #[test]
    fn test_transform_is_deterministic_and_unaliased() {
        let rules = vec![rule("v", "v", json!({"type": "number"}))];
        let mut input = vec![rec(json!({"v": "7"}))];
        let first = transform(&input, &rules);
        let second = transform(&input, &rules);
        assert_eq!(first, second);

        input[0].insert("v".to_string(), json!("8"));
        assert_eq!(first[0]["v"], json!(7));
    }
}

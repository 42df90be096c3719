use serde_json::Value;
use std::collections::HashSet;

use super::Record;

/// Normalize raw heterogeneous records.
///
/// - non-object and empty entries are dropped
/// - keys are snake_cased (`First Name`, `firstName` → `first_name`)
/// - string values are trimmed; an empty string becomes null
/// - the literal text `true` / `false` becomes a boolean
/// - structurally identical records collapse to the first occurrence
pub fn clean(records: &[Value]) -> Vec<Record> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for raw in records {
        let Some(obj) = raw.as_object() else {
            continue;
        };
        if obj.is_empty() {
            continue;
        }

        let mut record = Record::new();
        for (key, value) in obj {
            let key = to_snake_case(key);
            if key.is_empty() {
                continue;
            }
            record.insert(key, normalize_value(value));
        }
        if record.is_empty() {
            continue;
        }

        // serde_json's map is ordered by key, so the serialized form is canonical
        let fingerprint = Value::Object(record.clone()).to_string();
        if seen.insert(fingerprint) {
            out.push(record);
        }
    }

    out
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Value::Null
            } else {
                match trimmed {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ => Value::String(trimmed.to_string()),
                }
            }
        }
        other => other.clone(),
    }
}

/// Lowercase snake_case for record keys.
pub fn to_snake_case(key: &str) -> String {
    let chars: Vec<char> = key.trim().chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }

        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                // "HTTPStatus" → "http_status": split before the last capital of a run
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snake_case_keys() {
        let cases = [
            ("First Name", "first_name"),
            ("firstName", "first_name"),
            ("HTTPStatus", "http_status"),
            ("order-id", "order_id"),
            ("already_snake", "already_snake"),
            ("  Amount (USD) ", "amount_usd"),
            ("amountUSD", "amount_usd"),
            ("line2Total", "line2_total"),
            ("__", ""),
        ];
        for (input, expected) in cases {
            assert_eq!(to_snake_case(input), expected, "input {input:?}");
        }
    }

    #[test]
    fn test_clean_normalizes_values() {
        let out = clean(&[json!({
            "Customer Name": "  Ada  ",
            "Notes": "   ",
            "isPaid": "true",
            "Archived": " false ",
            "Verified": "TRUE",
            "Flag": "False",
            "amount": 12.5,
        })]);

        assert_eq!(out.len(), 1);
        let r = &out[0];
        assert_eq!(r["customer_name"], "Ada");
        assert_eq!(r["notes"], Value::Null);
        assert_eq!(r["is_paid"], true);
        assert_eq!(r["archived"], false);
        // only the exact lowercase literals become booleans
        assert_eq!(r["verified"], "TRUE");
        assert_eq!(r["flag"], "False");
        assert_eq!(r["amount"], 12.5);
    }

    #[test]
    fn test_clean_drops_non_objects_and_empties() {
        let out = clean(&[json!(1), json!("x"), json!(null), json!({}), json!([1]), json!({"a": 1})]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["a"], 1);
    }

    #[test]
    fn test_clean_dedupes_after_normalization_keeping_first_order() {
        let out = clean(&[
            json!({"id": 2, "Name": "b"}),
            json!({"id": 1, "name": "a"}),
            json!({"name": " a ", "ID": 1}),
            json!({"id": 2, "name": "b "}),
            json!({"id": 3, "name": "c"}),
        ]);
        let ids: Vec<i64> = out.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_clean_does_not_alias_input() {
        let mut input = vec![json!({"name": "a"})];
        let out = clean(&input);
        input[0]["name"] = json!("changed");
        assert_eq!(out[0]["name"], "a");
    }
}

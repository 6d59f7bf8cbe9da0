//! Engine-wide `where` filter standard.
//!
//! A reusable operator-based condition format for tools that filter records
//! by metadata fields. Tools embed [`where_schema`] into their input schema,
//! call [`validate_where`] on the resolved value, and evaluate records with
//! [`matches_where`]. The built-in `filter_items` tool is the in-engine
//! consumer; host tools backed by a query engine translate the same
//! conditions into their own predicates.
//!
//! Condition format:
//!
//! ```text
//! {"field": "sharepoint.site_name", "op": "is_empty"}
//! {"field": "source.agency", "op": "eq", "value": "GSA"}
//! ```
//!
//! Conditions are implicitly ANDed together.

use std::cmp::Ordering;

use once_cell::sync::Lazy;
use serde_json::Value;

pub const OPERATORS: &[&str] = &[
    "contains",
    "eq",
    "gt",
    "gte",
    "in",
    "is_empty",
    "is_not_empty",
    "lt",
    "lte",
    "neq",
    "not_in",
];

pub const UNARY_OPERATORS: &[&str] = &["is_empty", "is_not_empty"];

/// JSON Schema for a single condition, used by contract generation.
static WHERE_CONDITION_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::json!({
        "type": "object",
        "required": ["field", "op"],
        "properties": {
            "field": {
                "type": "string",
                "description": "Metadata path as namespace.key (e.g., 'source.agency')",
            },
            "op": {
                "type": "string",
                "enum": OPERATORS,
                "description": "Comparison operator. Unary operators (is_empty, is_not_empty) \
                                do not require a value.",
            },
            "value": {
                "description": "Comparison value. Required for all operators except \
                                is_empty / is_not_empty. For 'in' and 'not_in', pass a list.",
            },
        },
        "additionalProperties": false,
    })
});

/// Ready-made schema fragment for a `where` parameter; pass it to
/// `ParameterSpec::with_schema`.
pub fn where_schema() -> Value {
    serde_json::json!({
        "type": "array",
        "description": "Operator-based metadata conditions. Each condition has 'field' \
                        (namespace.key path), 'op' (operator), and optional 'value'. \
                        Conditions are ANDed together. Operators: contains, eq, gt, gte, in, \
                        is_empty, is_not_empty, lt, lte, neq, not_in. Use 'is_empty' to find \
                        records where a field is null, missing, or empty.",
        "items": WHERE_CONDITION_SCHEMA.clone(),
        "examples": [[{"field": "sharepoint.site_name", "op": "is_empty"}]],
    })
}

/// Validate a `where` condition list. Returns human-readable findings; an
/// empty list means valid.
pub fn validate_where(conditions: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    let Some(conditions) = conditions.as_array() else {
        return vec!["'where' must be a list of condition objects".to_string()];
    };

    for (idx, cond) in conditions.iter().enumerate() {
        let prefix = format!("where[{idx}]");
        let Some(cond) = cond.as_object() else {
            errors.push(format!("{prefix}: must be an object"));
            continue;
        };

        match cond.get("field").and_then(Value::as_str) {
            None => errors.push(format!("{prefix}: 'field' is required and must be a string")),
            Some(field) if !field.contains('.') => errors.push(format!(
                "{prefix}: 'field' must be namespace.key format (got '{field}')"
            )),
            Some(_) => {}
        }

        match cond.get("op").and_then(Value::as_str) {
            None => errors.push(format!("{prefix}: 'op' is required and must be a string")),
            Some(op) if !OPERATORS.contains(&op) => errors.push(format!(
                "{prefix}: unknown operator '{op}'. Valid: {}",
                OPERATORS.join(", ")
            )),
            Some(op) if !UNARY_OPERATORS.contains(&op) && !cond.contains_key("value") => {
                errors.push(format!("{prefix}: operator '{op}' requires a 'value'"));
            }
            Some(_) => {}
        }
    }

    errors
}

/// Evaluate a record against a validated condition list. Conditions are
/// ANDed; an empty list matches everything.
pub fn matches_where(record: &Value, conditions: &[Value]) -> bool {
    conditions
        .iter()
        .all(|condition| matches_condition(record, condition))
}

fn matches_condition(record: &Value, condition: &Value) -> bool {
    let Some(field) = condition.get("field").and_then(Value::as_str) else {
        return false;
    };
    let Some(op) = condition.get("op").and_then(Value::as_str) else {
        return false;
    };

    let current = lookup_field(record, field);

    match op {
        "is_empty" => is_empty_value(current),
        "is_not_empty" => !is_empty_value(current),
        // A missing field is "not equal" to anything.
        "neq" => match (current, condition.get("value")) {
            (None, _) => true,
            (Some(current), Some(expected)) => !values_equal(current, expected),
            _ => false,
        },
        _ => {
            let (Some(current), Some(expected)) = (current, condition.get("value")) else {
                return false;
            };
            match op {
                "eq" => values_equal(current, expected),
                "gt" | "gte" | "lt" | "lte" => compare_values(current, expected)
                    .map(|ordering| match op {
                        "gt" => ordering.is_gt(),
                        "gte" => ordering.is_ge(),
                        "lt" => ordering.is_lt(),
                        _ => ordering.is_le(),
                    })
                    .unwrap_or(false),
                "in" => expected
                    .as_array()
                    .is_some_and(|allowed| allowed.iter().any(|v| values_equal(current, v))),
                "not_in" => expected
                    .as_array()
                    .is_some_and(|allowed| !allowed.iter().any(|v| values_equal(current, v))),
                "contains" => match (current, expected) {
                    (Value::String(s), Value::String(sub)) => {
                        s.to_lowercase().contains(&sub.to_lowercase())
                    }
                    (Value::Array(items), v) => items.iter().any(|item| values_equal(item, v)),
                    _ => false,
                },
                _ => false,
            }
        }
    }
}

/// Walk a dotted `namespace.key` path into a record.
fn lookup_field<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Empty means the field is missing, null, or an empty string.
fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l == r;
    }
    left == right
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l.partial_cmp(&r);
    }
    if let (Value::String(l), Value::String(r)) = (left, right) {
        return Some(l.cmp(r));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_conditions() {
        let conditions = json!([
            {"field": "sharepoint.site_name", "op": "is_empty"},
            {"field": "source.agency", "op": "eq", "value": "GSA"},
            {"field": "source.kind", "op": "in", "value": ["rfp", "rfi"]}
        ]);
        assert!(validate_where(&conditions).is_empty());
    }

    #[test]
    fn test_not_a_list() {
        let errors = validate_where(&json!({"field": "a.b", "op": "eq"}));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("must be a list"));
    }

    #[test]
    fn test_missing_field_and_op() {
        let errors = validate_where(&json!([{}]));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_field_needs_namespace() {
        let errors = validate_where(&json!([{"field": "agency", "op": "eq", "value": 1}]));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("namespace.key"));
    }

    #[test]
    fn test_unknown_operator() {
        let errors = validate_where(&json!([{"field": "a.b", "op": "like", "value": "x"}]));
        assert!(errors[0].contains("unknown operator 'like'"));
    }

    #[test]
    fn test_binary_operator_requires_value() {
        let errors = validate_where(&json!([{"field": "a.b", "op": "gt"}]));
        assert!(errors[0].contains("requires a 'value'"));

        let errors = validate_where(&json!([{"field": "a.b", "op": "is_not_empty"}]));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_schema_fragment_shape() {
        let schema = where_schema();
        assert_eq!(schema["type"], json!("array"));
        assert_eq!(schema["items"]["required"], json!(["field", "op"]));
        assert!(schema["items"]["properties"]["op"]["enum"]
            .as_array()
            .unwrap()
            .contains(&json!("is_empty")));
    }

    fn record() -> Value {
        json!({
            "source": {"agency": "GSA", "score": 7, "kind": "rfp"},
            "sharepoint": {"site_name": ""},
            "tags": ["draft", "internal"]
        })
    }

    fn conditions(value: Value) -> Vec<Value> {
        value.as_array().unwrap().clone()
    }

    #[test]
    fn test_matches_eq_and_neq() {
        let record = record();
        assert!(matches_where(
            &record,
            &conditions(json!([{"field": "source.agency", "op": "eq", "value": "GSA"}]))
        ));
        assert!(!matches_where(
            &record,
            &conditions(json!([{"field": "source.agency", "op": "eq", "value": "DOD"}]))
        ));
        // A missing field is not equal to anything.
        assert!(matches_where(
            &record,
            &conditions(json!([{"field": "source.missing", "op": "neq", "value": "GSA"}]))
        ));
    }

    #[test]
    fn test_matches_numeric_ordering() {
        let record = record();
        assert!(matches_where(
            &record,
            &conditions(json!([{"field": "source.score", "op": "gt", "value": 5}]))
        ));
        assert!(!matches_where(
            &record,
            &conditions(json!([{"field": "source.score", "op": "lte", "value": 5}]))
        ));
    }

    #[test]
    fn test_matches_membership_and_contains() {
        let record = record();
        assert!(matches_where(
            &record,
            &conditions(json!([{"field": "source.kind", "op": "in", "value": ["rfp", "rfi"]}]))
        ));
        assert!(matches_where(
            &record,
            &conditions(json!([{"field": "source.agency", "op": "contains", "value": "gs"}]))
        ));
        assert!(matches_where(
            &record,
            &conditions(json!([{"field": "tags", "op": "contains", "value": "draft"}]))
        ));
        assert!(!matches_where(
            &record,
            &conditions(json!([{"field": "source.kind", "op": "not_in", "value": ["rfp"]}]))
        ));
    }

    #[test]
    fn test_matches_is_empty() {
        let record = record();
        for field in ["sharepoint.site_name", "sharepoint.missing", "absent.path"] {
            assert!(matches_where(
                &record,
                &conditions(json!([{"field": field, "op": "is_empty"}]))
            ));
        }
        assert!(matches_where(
            &record,
            &conditions(json!([{"field": "source.agency", "op": "is_not_empty"}]))
        ));
    }

    #[test]
    fn test_conditions_are_anded() {
        let record = record();
        assert!(matches_where(
            &record,
            &conditions(json!([
                {"field": "source.agency", "op": "eq", "value": "GSA"},
                {"field": "source.score", "op": "gte", "value": 7}
            ]))
        ));
        assert!(!matches_where(
            &record,
            &conditions(json!([
                {"field": "source.agency", "op": "eq", "value": "GSA"},
                {"field": "source.score", "op": "gt", "value": 7}
            ]))
        ));
        // An empty list matches everything.
        assert!(matches_where(&record, &[]));
    }
}

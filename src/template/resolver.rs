use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::procedure::StepResult;

use super::{
    parse_expression, Accessor, CmpOp, Expr, Filter, Operand, PathExpr, Pipeline, TemplateError,
};

/// Matches `{{ expr }}` markers. The inner group is the raw expression.
pub static TEMPLATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").unwrap());

/// The dynamic context a template renders against: caller parameters, prior
/// step results, and the loop bindings of an enclosing `foreach` iteration.
///
/// Lookup order for a root identifier: loop scope → params → steps.
/// `steps.X` resolves to the `data` of step X, never the whole record.
#[derive(Debug, Clone, Copy)]
pub struct RenderScope<'a> {
    params: &'a Map<String, Value>,
    steps: &'a HashMap<String, StepResult>,
    loop_item: Option<(&'a Value, usize)>,
}

impl<'a> RenderScope<'a> {
    pub fn new(params: &'a Map<String, Value>, steps: &'a HashMap<String, StepResult>) -> Self {
        Self {
            params,
            steps,
            loop_item: None,
        }
    }

    pub fn with_loop(self, item: &'a Value, item_index: usize) -> Self {
        Self {
            loop_item: Some((item, item_index)),
            ..self
        }
    }
}

/// Truthiness used by `if_branch` and step conditions.
///
/// Falsy: null, false, numeric zero, empty string, the strings
/// "false"/"0"/"none"/"null"/"no"/"n" (case-insensitive), empty arrays and
/// objects. Everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            if s.is_empty() {
                return false;
            }
            !matches!(
                s.to_lowercase().as_str(),
                "false" | "0" | "none" | "null" | "no" | "n"
            )
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Render one string. A string with no markers is returned unchanged. A
/// string that is exactly one `{{ expr }}` resolves to the typed value of
/// the expression; mixed text interpolates stringified values.
pub fn render_str(input: &str, scope: &RenderScope) -> Result<Value, TemplateError> {
    if !input.contains("{{") {
        return Ok(Value::String(input.to_string()));
    }

    if let Some(caps) = TEMPLATE_PATTERN.captures(input) {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        if input.trim() == whole {
            let expr = parse_expression(&caps[1])?;
            return evaluate(&expr, scope);
        }
    }

    let mut out = String::new();
    let mut last = 0;
    for caps in TEMPLATE_PATTERN.captures_iter(input) {
        let whole = caps.get(0).unwrap();
        out.push_str(&input[last..whole.start()]);
        let expr = parse_expression(&caps[1])?;
        let value = evaluate(&expr, scope)?;
        out.push_str(&stringify(&value));
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(Value::String(out))
}

/// Render a value tree: every string leaf is rendered, everything else
/// passes through unchanged.
pub fn render_value(value: &Value, scope: &RenderScope) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => render_str(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), render_value(v, scope)?)))
            .collect::<Result<Map<_, _>, TemplateError>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Render a parameter map recursively.
pub fn render_params(
    params: &Map<String, Value>,
    scope: &RenderScope,
) -> Result<Map<String, Value>, TemplateError> {
    params
        .iter()
        .map(|(k, v)| Ok((k.clone(), render_value(v, scope)?)))
        .collect()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn evaluate(expr: &Expr, scope: &RenderScope) -> Result<Value, TemplateError> {
    let left = eval_pipeline(&expr.left, scope)?;

    let Some((op, right)) = &expr.cmp else {
        return Ok(left);
    };
    let right = eval_pipeline(right, scope)?;

    let outcome = match op {
        CmpOp::Eq => compare_eq(&left, &right),
        CmpOp::Ne => !compare_eq(&left, &right),
        CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le => {
            let ordering = compare_order(&left, &right)?;
            match op {
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::Ge => ordering.is_ge(),
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                _ => unreachable!(),
            }
        }
        CmpOp::In => membership(&left, &right)?,
    };
    Ok(Value::Bool(outcome))
}

fn compare_eq(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l == r;
    }
    left == right
}

fn compare_order(left: &Value, right: &Value) -> Result<std::cmp::Ordering, TemplateError> {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l
            .partial_cmp(&r)
            .ok_or(TemplateError::Comparison {
                left: "number",
                right: "number",
            });
    }
    if let (Value::String(l), Value::String(r)) = (left, right) {
        return Ok(l.cmp(r));
    }
    Err(TemplateError::Comparison {
        left: crate::contract::json_type_name(left),
        right: crate::contract::json_type_name(right),
    })
}

fn membership(needle: &Value, haystack: &Value) -> Result<bool, TemplateError> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|item| compare_eq(item, needle))),
        Value::String(s) => match needle {
            Value::String(sub) => Ok(s.contains(sub.as_str())),
            _ => Err(TemplateError::Comparison {
                left: crate::contract::json_type_name(needle),
                right: "string",
            }),
        },
        Value::Object(map) => match needle {
            Value::String(key) => Ok(map.contains_key(key)),
            _ => Err(TemplateError::Comparison {
                left: crate::contract::json_type_name(needle),
                right: "object",
            }),
        },
        other => Err(TemplateError::Comparison {
            left: crate::contract::json_type_name(needle),
            right: crate::contract::json_type_name(other),
        }),
    }
}

fn eval_pipeline(pipeline: &Pipeline, scope: &RenderScope) -> Result<Value, TemplateError> {
    let mut state = eval_operand(&pipeline.operand, scope);

    for filter in &pipeline.filters {
        state = match (state, filter) {
            (Ok(value), Filter::Length) => length(&value),
            // `default` catches unresolved references and nulls.
            (Err(TemplateError::UnresolvedReference { .. }), Filter::Default(literal)) => {
                Ok(literal.to_value())
            }
            (Ok(Value::Null), Filter::Default(literal)) => Ok(literal.to_value()),
            (Ok(value), Filter::Default(_)) => Ok(value),
            (Err(e), _) => Err(e),
        };
    }

    state
}

fn length(value: &Value) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => Ok(Value::from(s.chars().count())),
        Value::Array(items) => Ok(Value::from(items.len())),
        Value::Object(map) => Ok(Value::from(map.len())),
        other => Err(TemplateError::FilterInput {
            filter: "length",
            type_name: crate::contract::json_type_name(other),
        }),
    }
}

fn eval_operand(operand: &Operand, scope: &RenderScope) -> Result<Value, TemplateError> {
    match operand {
        Operand::Literal(literal) => Ok(literal.to_value()),
        Operand::Path(path) => resolve_path(path, scope),
    }
}

fn resolve_path(path: &PathExpr, scope: &RenderScope) -> Result<Value, TemplateError> {
    // Root resolution: loop bindings shadow everything.
    if let Some((item, index)) = scope.loop_item {
        match path.root.as_str() {
            "item" => return walk(item, &path.accessors, "item"),
            "item_index" => {
                if path.accessors.is_empty() {
                    return Ok(Value::from(index));
                }
                return Err(TemplateError::FieldAccess {
                    field: accessor_name(&path.accessors[0]),
                    type_name: "number",
                    path: "item_index".into(),
                });
            }
            _ => {}
        }
    }

    match path.root.as_str() {
        "params" => match path.accessors.split_first() {
            None => Ok(Value::Object(scope.params.clone())),
            Some((Accessor::Field(name), rest)) => {
                let value = scope
                    .params
                    .get(name)
                    .ok_or_else(|| TemplateError::UnresolvedReference {
                        path: format!("params.{name}"),
                    })?;
                walk(value, rest, &format!("params.{name}"))
            }
            Some((Accessor::Index(_), _)) => Err(TemplateError::IndexAccess {
                type_name: "object",
                path: "params".into(),
            }),
        },
        "steps" => match path.accessors.split_first() {
            None => Err(TemplateError::UnresolvedReference {
                path: "steps".into(),
            }),
            Some((Accessor::Field(name), rest)) => {
                let result = scope
                    .steps
                    .get(name)
                    .ok_or_else(|| TemplateError::UnresolvedReference {
                        path: format!("steps.{name}"),
                    })?;
                walk(&result.data, rest, &format!("steps.{name}"))
            }
            Some((Accessor::Index(_), _)) => Err(TemplateError::IndexAccess {
                type_name: "object",
                path: "steps".into(),
            }),
        },
        // Bare identifier: params first, then step names.
        root => {
            if let Some(value) = scope.params.get(root) {
                return walk(value, &path.accessors, root);
            }
            if let Some(result) = scope.steps.get(root) {
                return walk(&result.data, &path.accessors, root);
            }
            Err(TemplateError::UnresolvedReference { path: root.into() })
        }
    }
}

fn accessor_name(accessor: &Accessor) -> String {
    match accessor {
        Accessor::Field(f) => f.clone(),
        Accessor::Index(i) => i.to_string(),
    }
}

fn walk(value: &Value, accessors: &[Accessor], base: &str) -> Result<Value, TemplateError> {
    let mut current = value;
    let mut trail = base.to_string();

    for accessor in accessors {
        match accessor {
            Accessor::Field(field) => match current {
                Value::Object(map) => match map.get(field) {
                    Some(next) => {
                        current = next;
                        trail = format!("{trail}.{field}");
                    }
                    None => {
                        return Err(TemplateError::UnresolvedReference {
                            path: format!("{trail}.{field}"),
                        });
                    }
                },
                other => {
                    return Err(TemplateError::FieldAccess {
                        field: field.clone(),
                        type_name: crate::contract::json_type_name(other),
                        path: trail,
                    });
                }
            },
            Accessor::Index(index) => match current {
                Value::Array(items) => match items.get(*index) {
                    Some(next) => {
                        current = next;
                        trail = format!("{trail}[{index}]");
                    }
                    None => {
                        return Err(TemplateError::UnresolvedReference {
                            path: format!("{trail}[{index}]"),
                        });
                    }
                },
                other => {
                    return Err(TemplateError::IndexAccess {
                        type_name: crate::contract::json_type_name(other),
                        path: trail,
                    });
                }
            },
        }
    }

    Ok(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope_fixture() -> (Map<String, Value>, HashMap<String, StepResult>) {
        let params = serde_json::from_value::<Map<String, Value>>(json!({
            "since_days": 7,
            "label": "weekly",
            "flags": {"notify": true}
        }))
        .unwrap();

        let mut steps = HashMap::new();
        steps.insert(
            "load".to_string(),
            StepResult::success(json!([
                {"id": "a-1", "title": "First"},
                {"id": "a-2", "title": "Second"},
                {"id": "a-3", "title": "Third"}
            ])),
        );
        steps.insert(
            "summary".to_string(),
            StepResult::success(json!("three assets found")),
        );
        (params, steps)
    }

    #[test]
    fn test_no_markers_unchanged() {
        let (params, steps) = scope_fixture();
        let scope = RenderScope::new(&params, &steps);
        let rendered = render_str("plain text, no templates", &scope).unwrap();
        assert_eq!(rendered, json!("plain text, no templates"));
    }

    #[test]
    fn test_single_expression_preserves_type() {
        let (params, steps) = scope_fixture();
        let scope = RenderScope::new(&params, &steps);

        assert_eq!(render_str("{{ params.since_days }}", &scope).unwrap(), json!(7));
        let items = render_str("{{ steps.load }}", &scope).unwrap();
        assert!(items.is_array());
        assert_eq!(items.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_interpolation_stringifies() {
        let (params, steps) = scope_fixture();
        let scope = RenderScope::new(&params, &steps);
        let rendered =
            render_str("{{ steps.load | length }} assets in {{ params.label }}", &scope).unwrap();
        assert_eq!(rendered, json!("3 assets in weekly"));
    }

    #[test]
    fn test_steps_resolve_to_data() {
        let (params, steps) = scope_fixture();
        let scope = RenderScope::new(&params, &steps);
        let rendered = render_str("{{ steps.load[0].title }}", &scope).unwrap();
        assert_eq!(rendered, json!("First"));
    }

    #[test]
    fn test_field_access_on_string_is_error() {
        let (params, steps) = scope_fixture();
        let scope = RenderScope::new(&params, &steps);
        let err = render_str("{{ steps.summary.title }}", &scope).unwrap_err();
        assert!(matches!(err, TemplateError::FieldAccess { type_name: "string", .. }));
    }

    #[test]
    fn test_unresolved_reference() {
        let (params, steps) = scope_fixture();
        let scope = RenderScope::new(&params, &steps);
        let err = render_str("{{ steps.missing }}", &scope).unwrap_err();
        assert!(matches!(err, TemplateError::UnresolvedReference { path } if path == "steps.missing"));
    }

    #[test]
    fn test_default_filter_catches_unresolved_and_null() {
        let (params, steps) = scope_fixture();
        let scope = RenderScope::new(&params, &steps);

        let value = render_str("{{ params.missing | default('fallback') }}", &scope).unwrap();
        assert_eq!(value, json!("fallback"));

        let value = render_str("{{ params.label | default('fallback') }}", &scope).unwrap();
        assert_eq!(value, json!("weekly"));
    }

    #[test]
    fn test_length_comparison() {
        let (params, steps) = scope_fixture();
        let scope = RenderScope::new(&params, &steps);

        assert_eq!(render_str("{{ steps.load | length > 0 }}", &scope).unwrap(), json!(true));
        assert_eq!(render_str("{{ steps.load | length > 3 }}", &scope).unwrap(), json!(false));
        assert_eq!(render_str("{{ steps.load | length == 3 }}", &scope).unwrap(), json!(true));
    }

    #[test]
    fn test_string_equality_and_membership() {
        let (params, steps) = scope_fixture();
        let scope = RenderScope::new(&params, &steps);

        assert_eq!(render_str("{{ params.label == 'weekly' }}", &scope).unwrap(), json!(true));
        assert_eq!(render_str("{{ params.label != 'daily' }}", &scope).unwrap(), json!(true));
        assert_eq!(render_str("{{ 'eek' in params.label }}", &scope).unwrap(), json!(true));
        assert_eq!(render_str("{{ 'notify' in params.flags }}", &scope).unwrap(), json!(true));
    }

    #[test]
    fn test_loop_scope_shadowing() {
        let (params, steps) = scope_fixture();
        let item = json!({"id": 42});
        let scope = RenderScope::new(&params, &steps).with_loop(&item, 1);

        assert_eq!(render_str("{{ item.id }}", &scope).unwrap(), json!(42));
        assert_eq!(render_str("{{ item_index }}", &scope).unwrap(), json!(1));
        // Params remain reachable inside the loop.
        assert_eq!(render_str("{{ params.label }}", &scope).unwrap(), json!("weekly"));
    }

    #[test]
    fn test_bare_identifier_order() {
        let (mut params, steps) = scope_fixture();
        params.insert("load".into(), json!("param shadows step"));
        let scope = RenderScope::new(&params, &steps);
        assert_eq!(render_str("{{ load }}", &scope).unwrap(), json!("param shadows step"));

        params.remove("load");
        let scope = RenderScope::new(&params, &steps);
        assert!(render_str("{{ load }}", &scope).unwrap().is_array());
    }

    #[test]
    fn test_render_params_recurses() {
        let (params, steps) = scope_fixture();
        let scope = RenderScope::new(&params, &steps);
        let raw = serde_json::from_value::<Map<String, Value>>(json!({
            "query": "*",
            "nested": {"count": "{{ steps.load | length }}", "keep": 5},
            "list": ["{{ params.label }}", true]
        }))
        .unwrap();
        let rendered = render_params(&raw, &scope).unwrap();
        assert_eq!(rendered["nested"]["count"], json!(3));
        assert_eq!(rendered["nested"]["keep"], json!(5));
        assert_eq!(rendered["list"], json!(["weekly", true]));
    }

    #[test]
    fn test_truthiness_table() {
        for falsy in [
            json!(null),
            json!(false),
            json!(0),
            json!(0.0),
            json!(""),
            json!("false"),
            json!("False"),
            json!("0"),
            json!("none"),
            json!("null"),
            json!("no"),
            json!("N"),
            json!([]),
            json!({}),
        ] {
            assert!(!is_truthy(&falsy), "expected falsy: {falsy}");
        }

        for truthy in [
            json!(true),
            json!(1),
            json!(-2.5),
            json!("yes"),
            json!("anything"),
            json!([0]),
            json!({"k": null}),
        ] {
            assert!(is_truthy(&truthy), "expected truthy: {truthy}");
        }
    }

    #[test]
    fn test_truthiness_fixpoint() {
        for value in [json!(null), json!("no"), json!([1, 2]), json!("text"), json!(0)] {
            let once = is_truthy(&value);
            let twice = is_truthy(&Value::Bool(once));
            assert_eq!(once, twice);
        }
    }
}

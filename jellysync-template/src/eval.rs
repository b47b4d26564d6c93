//! `$eval` resolution over intent payloads.

use serde_json::{Map, Value};

use crate::error::TemplateError;
use crate::expression::Expression;
use crate::references::{References, ROOTS};

pub const EVAL_KEY: &str = "$eval";

/// Resolve every `{ "$eval": <expr> }` inside `node` against `env`.
///
/// Returns `Ok(None)` when any placeholder, at any depth, does not resolve
/// yet; the whole node is then considered unresolved. Syntax errors and
/// malformed placeholders are hard errors.
pub fn evaluate(node: &Value, env: &References) -> Result<Option<Value>, TemplateError> {
    match node {
        Value::Object(map) if map.contains_key(EVAL_KEY) => evaluate_placeholder(map, env),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                match evaluate(value, env)? {
                    Some(resolved) => {
                        out.insert(key.clone(), resolved);
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some(Value::Object(out)))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match evaluate(item, env)? {
                    Some(resolved) => out.push(resolved),
                    None => return Ok(None),
                }
            }
            Ok(Some(Value::Array(out)))
        }
        leaf => Ok(Some(leaf.clone())),
    }
}

/// Whether `node` contains any `$eval` placeholder.
pub fn has_placeholders(node: &Value) -> bool {
    match node {
        Value::Object(map) => map.contains_key(EVAL_KEY) || map.values().any(has_placeholders),
        Value::Array(items) => items.iter().any(has_placeholders),
        _ => false,
    }
}

fn evaluate_placeholder(
    map: &Map<String, Value>,
    env: &References,
) -> Result<Option<Value>, TemplateError> {
    if map.len() > 1 {
        let extra: Vec<&str> = map
            .keys()
            .map(String::as_str)
            .filter(|key| *key != EVAL_KEY)
            .collect();
        return Err(TemplateError::UnexpectedKeys(extra.join(", ")));
    }
    let source = match map.get(EVAL_KEY) {
        Some(Value::String(source)) => source,
        Some(other) => return Err(TemplateError::NotAnExpression(other.to_string())),
        None => return Ok(None),
    };

    let resolved = match Expression::parse(source)? {
        Expression::Literal(value) => Some(value),
        Expression::Path { root, segments } => {
            if ROOTS.contains(&root.as_str()) {
                env.resolve(&segments)
            } else {
                None
            }
        }
    };
    Ok(resolved.filter(|value| !value.is_null()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> References {
        let mut refs = References::new();
        refs.record(0, None, json!({ "id": "thread-id", "slug": "thread-1" }));
        refs
    }

    #[test]
    fn placeholder_is_replaced_in_nested_objects_and_arrays() {
        let card = json!({
            "type": "message@1.0.0",
            "data": {
                "target": { "$eval": "contracts[0].id" },
                "mentions": [{ "$eval": "cards[0].slug" }, "literal"]
            }
        });
        let resolved = evaluate(&card, &env()).expect("evaluate").expect("resolved");
        assert_eq!(resolved["data"]["target"], json!("thread-id"));
        assert_eq!(resolved["data"]["mentions"], json!(["thread-1", "literal"]));
        assert_eq!(resolved["type"], json!("message@1.0.0"));
    }

    #[test]
    fn unresolved_reference_invalidates_the_whole_node() {
        let card = json!({
            "type": "message@1.0.0",
            "data": { "deep": { "target": { "$eval": "contracts[3].id" } } }
        });
        assert_eq!(evaluate(&card, &env()).expect("evaluate"), None);
    }

    #[test]
    fn unknown_root_is_unresolved() {
        let card = json!({ "x": { "$eval": "payload.id" } });
        assert_eq!(evaluate(&card, &env()).expect("evaluate"), None);
    }

    #[test]
    fn leaves_pass_through() {
        for leaf in [json!(null), json!(0), json!(""), json!(false), json!("text")] {
            assert_eq!(evaluate(&leaf, &env()).expect("evaluate"), Some(leaf.clone()));
        }
    }

    #[test]
    fn syntax_error_is_hard_error() {
        let card = json!({ "x": { "$eval": "contracts[" } });
        let err = evaluate(&card, &env()).unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));
    }

    #[test]
    fn non_string_eval_is_hard_error() {
        let card = json!({ "x": { "$eval": 3 } });
        assert!(matches!(
            evaluate(&card, &env()),
            Err(TemplateError::NotAnExpression(_))
        ));
    }

    #[test]
    fn eval_with_siblings_is_rejected() {
        let card = json!({ "$eval": "contracts[0].id", "other": 1 });
        assert!(matches!(
            evaluate(&card, &env()),
            Err(TemplateError::UnexpectedKeys(keys)) if keys == "other"
        ));
    }

    #[test]
    fn literal_expression_resolves() {
        let card = json!({ "n": { "$eval": "7" } });
        assert_eq!(
            evaluate(&card, &env()).expect("evaluate"),
            Some(json!({ "n": 7 }))
        );
    }

    #[test]
    fn detects_placeholders() {
        assert!(has_placeholders(&json!([{ "a": { "$eval": "x" } }])));
        assert!(!has_placeholders(&json!({ "a": [1, 2, { "b": "c" }] })));
    }
}

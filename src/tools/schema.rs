//! Argument validation against a JSON schema subset
//!
//! Supported keywords: `type` (single or list), `properties`, `required`,
//! `additionalProperties: false`, `enum`, `items`, `minimum`, `maximum`,
//! `minLength`, `maxLength`. Unknown keywords are ignored.

use serde_json::{Map, Value};

/// Validate `value` against `schema`. The error names the offending path.
pub fn validate(schema: &Value, value: &Value) -> Result<(), String> {
    check(schema, value, "$")
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema.get("type") {
        let ok = match expected {
            Value::String(t) => type_matches(t, value),
            Value::Array(types) => types
                .iter()
                .filter_map(Value::as_str)
                .any(|t| type_matches(t, value)),
            _ => true,
        };
        if !ok {
            return Err(format!(
                "{}: expected {}, got {}",
                path,
                expected,
                type_name(value)
            ));
        }
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            return Err(format!("{}: {} is not one of {}", path, value, Value::Array(allowed.clone())));
        }
    }

    match value {
        Value::Object(fields) => check_object(schema, fields, path)?,
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    check(item_schema, item, &format!("{}[{}]", path, i))?;
                }
            }
        }
        Value::String(s) => {
            let len = s.chars().count() as u64;
            if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
                if len < min {
                    return Err(format!("{}: shorter than {} characters", path, min));
                }
            }
            if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
                if len > max {
                    return Err(format!("{}: longer than {} characters", path, max));
                }
            }
        }
        Value::Number(n) => {
            let n = n.as_f64().unwrap_or_default();
            if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
                if n < min {
                    return Err(format!("{}: {} is below minimum {}", path, n, min));
                }
            }
            if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
                if n > max {
                    return Err(format!("{}: {} is above maximum {}", path, n, max));
                }
            }
        }
        _ => {}
    }

    Ok(())
}

fn check_object(schema: &Map<String, Value>, fields: &Map<String, Value>, path: &str) -> Result<(), String> {
    if let Some(Value::Array(required)) = schema.get("required") {
        for name in required.iter().filter_map(Value::as_str) {
            if !fields.contains_key(name) {
                return Err(format!("{}: missing required field '{}'", path, name));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (name, field) in fields {
        match properties.and_then(|p| p.get(name)) {
            Some(field_schema) => check(field_schema, field, &format!("{}.{}", path, name))?,
            None if closed => {
                return Err(format!("{}: unexpected field '{}'", path, name));
            }
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spawn_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {"type": "string", "minLength": 1},
                "policy": {"type": "string", "enum": ["fire_and_forget", "join"]},
                "tools": {"type": "array", "items": {"type": "string"}},
                "join_timeout_secs": {"type": "integer", "minimum": 1}
            },
            "required": ["task"],
            "additionalProperties": false
        })
    }

    #[test]
    fn test_valid_arguments() {
        let args = json!({"task": "count files", "policy": "join", "tools": ["exec"], "join_timeout_secs": 30});
        assert!(validate(&spawn_schema(), &args).is_ok());
    }

    #[test]
    fn test_reports_offending_path() {
        let schema = spawn_schema();
        assert_eq!(
            validate(&schema, &json!({})).unwrap_err(),
            "$: missing required field 'task'"
        );
        assert_eq!(
            validate(&schema, &json!({"task": "x", "tools": ["exec", 3]})).unwrap_err(),
            "$.tools[1]: expected \"string\", got integer"
        );
        assert!(validate(&schema, &json!({"task": "x", "policy": "later"}))
            .unwrap_err()
            .starts_with("$.policy:"));
        assert!(validate(&schema, &json!({"task": "x", "extra": 1}))
            .unwrap_err()
            .contains("unexpected field 'extra'"));
        assert!(validate(&schema, &json!({"task": "x", "join_timeout_secs": 0})).is_err());
        assert!(validate(&schema, &json!("just a string")).is_err());
    }

    #[test]
    fn test_type_unions_and_empty_schema() {
        let schema = json!({"type": ["string", "null"]});
        assert!(validate(&schema, &json!(null)).is_ok());
        assert!(validate(&schema, &json!(1)).is_err());
        assert!(validate(&json!({}), &json!({"anything": [1, 2]})).is_ok());
    }
}

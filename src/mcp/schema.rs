//! Validation of tool arguments against their declared input schema.
//!
//! Only the JSON Schema subset the registered tools use is understood:
//! `type`, `properties`, `required`, `items` and `enum`. Unknown object keys
//! are accepted and left in place.

use serde_json::{Map, Value};
use std::fmt;

/// A single schema violation, located by a dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Validate a tool's argument object against its schema.
pub fn validate_arguments(schema: &Value, arguments: &Map<String, Value>) -> Result<(), SchemaViolation> {
    validate_object(schema, arguments, "")
}

fn validate_object(schema: &Value, object: &Map<String, Value>, path: &str) -> Result<(), SchemaViolation> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            match object.get(field) {
                None | Some(Value::Null) => {
                    return Err(SchemaViolation {
                        path: join(path, field),
                        message: "Required".to_string(),
                    })
                }
                Some(_) => {}
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, property_schema) in properties {
            match object.get(name) {
                // Optional fields may be omitted or explicitly null.
                None | Some(Value::Null) => {}
                Some(value) => validate_value(property_schema, value, &join(path, name))?,
            }
        }
    }

    Ok(())
}

fn validate_value(schema: &Value, value: &Value, path: &str) -> Result<(), SchemaViolation> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !matches_type(expected, value) {
            return Err(SchemaViolation {
                path: path.to_string(),
                message: format!("Expected {}, received {}", expected, type_name(value)),
            });
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(SchemaViolation {
                path: path.to_string(),
                message: format!("Expected one of {}", Value::Array(allowed.clone())),
            });
        }
    }

    match value {
        Value::Object(object) => validate_object(schema, object, path),
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (index, item) in items.iter().enumerate() {
                    validate_value(item_schema, item, &format!("{}[{}]", path, index))?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", path, field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "userMessage": { "type": "string" },
                "count": { "type": "integer" },
                "options": {
                    "type": "object",
                    "properties": {
                        "useVertexAI": { "type": "boolean" },
                        "model": { "type": "string" },
                        "mode": { "type": "string", "enum": ["fast", "slow"] }
                    },
                    "required": ["useVertexAI", "model"]
                },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["userMessage", "options"]
        })
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_valid_arguments() {
        let result = validate_arguments(
            &schema(),
            &args(json!({
                "userMessage": "hello",
                "options": { "useVertexAI": false, "model": "gemini-2.5-flash" },
                "unknown": 1
            })),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let err = validate_arguments(
            &schema(),
            &args(json!({ "options": { "useVertexAI": false, "model": "m" } })),
        )
        .unwrap_err();
        assert_eq!(err.path, "userMessage");
        assert_eq!(err.to_string(), "userMessage: Required");
    }

    #[test]
    fn test_nested_required_field() {
        let err = validate_arguments(
            &schema(),
            &args(json!({ "userMessage": "x", "options": { "useVertexAI": true } })),
        )
        .unwrap_err();
        assert_eq!(err.path, "options.model");
    }

    #[test]
    fn test_wrong_type() {
        let err = validate_arguments(
            &schema(),
            &args(json!({
                "userMessage": 42,
                "options": { "useVertexAI": false, "model": "m" }
            })),
        )
        .unwrap_err();
        assert_eq!(err.path, "userMessage");
        assert_eq!(err.message, "Expected string, received number");
    }

    #[test]
    fn test_integer_rejects_float() {
        let err = validate_arguments(
            &schema(),
            &args(json!({
                "userMessage": "x",
                "count": 1.5,
                "options": { "useVertexAI": false, "model": "m" }
            })),
        )
        .unwrap_err();
        assert_eq!(err.path, "count");
    }

    #[test]
    fn test_enum_and_array_items() {
        let err = validate_arguments(
            &schema(),
            &args(json!({
                "userMessage": "x",
                "options": { "useVertexAI": false, "model": "m", "mode": "medium" }
            })),
        )
        .unwrap_err();
        assert_eq!(err.path, "options.mode");

        let err = validate_arguments(
            &schema(),
            &args(json!({
                "userMessage": "x",
                "options": { "useVertexAI": false, "model": "m" },
                "tags": ["a", 2]
            })),
        )
        .unwrap_err();
        assert_eq!(err.path, "tags[1]");
    }

    #[test]
    fn test_optional_null_is_accepted() {
        let result = validate_arguments(
            &schema(),
            &args(json!({
                "userMessage": "x",
                "count": null,
                "options": { "useVertexAI": false, "model": "m" }
            })),
        );
        assert!(result.is_ok());
    }
}

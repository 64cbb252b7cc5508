//! JSON Schema subset validation
//!
//! Supports the keywords agent schemas use: `type`, `required`, `properties`,
//! `items`, `enum`, `minimum`, `maximum`. Unknown keywords are ignored.
//! Violations are reported with a JSON-pointer-like path so they can be fed
//! back to the model verbatim in a clarifying re-prompt.

use serde_json::Value;

/// Validate `value` against `schema`, returning every violation found.
pub fn validate(value: &Value, schema: &Value) -> Vec<String> {
    let mut violations = Vec::new();
    check(value, schema, "$", &mut violations);
    violations
}

fn check(value: &Value, schema: &Value, path: &str, out: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| matches_type(value, t)) {
            out.push(format!(
                "{}: expected {}, got {}",
                path,
                allowed.join(" or "),
                type_name(value)
            ));
            return;
        }
    }

    if let Some(Value::Array(options)) = schema.get("enum")
        && !options.contains(value)
    {
        let listed: Vec<String> = options.iter().map(Value::to_string).collect();
        out.push(format!(
            "{}: {} is not one of [{}]",
            path,
            value,
            listed.join(", ")
        ));
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64)
            && n < min
        {
            out.push(format!("{}: {} is below minimum {}", path, n, min));
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64)
            && n > max
        {
            out.push(format!("{}: {} is above maximum {}", path, n, max));
        }
    }

    if let Some(object) = value.as_object() {
        if let Some(Value::Array(required)) = schema.get("required") {
            for field in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(field) {
                    out.push(format!("{}: missing required field '{}'", path, field));
                }
            }
        }
        if let Some(Value::Object(properties)) = schema.get("properties") {
            for (name, sub_schema) in properties {
                if let Some(child) = object.get(name) {
                    check(child, sub_schema, &format!("{}.{}", path, name), out);
                }
            }
        }
    }

    if let (Some(items), Some(item_schema)) = (value.as_array(), schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            check(item, item_schema, &format!("{}[{}]", path, i), out);
        }
    }
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
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

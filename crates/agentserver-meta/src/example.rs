// SPDX-License-Identifier: MIT OR Apache-2.0
//! Builds a minimal conforming instance from a compiled JSON Schema, for
//! the meta handler's example-payload query (§4.9). Not a general
//! fuzzer — just enough to hand a caller a plausible starting shape for
//! every primitive `type` the schema store's registered schemas use.

use serde_json::{json, Value};

/// Generate a representative example value for `schema`.
#[must_use]
pub fn example_for(schema: &Value) -> Value {
    if let Some(example) = schema.get("examples").and_then(|v| v.as_array()).and_then(|a| a.first()) {
        return example.clone();
    }
    if let Some(default) = schema.get("default") {
        return default.clone();
    }
    if let Some(choices) = schema.get("enum").and_then(|v| v.as_array()) {
        if let Some(first) = choices.first() {
            return first.clone();
        }
    }

    match schema.get("type").and_then(Value::as_str) {
        Some("object") => {
            let mut out = serde_json::Map::new();
            if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                for (key, sub_schema) in props {
                    out.insert(key.clone(), example_for(sub_schema));
                }
            }
            Value::Object(out)
        }
        Some("array") => {
            let item = schema.get("items").map(example_for).unwrap_or(json!(null));
            Value::Array(vec![item])
        }
        Some("string") => json!(""),
        Some("integer") => json!(0),
        Some("number") => json!(0.0),
        Some("boolean") => json!(false),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_an_object_example_from_properties() {
        let schema = json!({
            "type": "object",
            "properties": {
                "a": { "type": "integer" },
                "b": { "type": "string" },
            }
        });
        let example = example_for(&schema);
        assert_eq!(example["a"], json!(0));
        assert_eq!(example["b"], json!(""));
    }

    #[test]
    fn prefers_a_declared_example_over_generation() {
        let schema = json!({ "type": "string", "examples": ["hello"] });
        assert_eq!(example_for(&schema), json!("hello"));
    }
}

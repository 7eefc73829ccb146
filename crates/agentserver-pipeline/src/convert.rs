// SPDX-License-Identifier: MIT OR Apache-2.0
//! Generic XML-tree-to-JSON-value conversion used by the *extract-payload*
//! step to hand the validate-payload step something `jsonschema` can
//! check.

use agentserver_xml::XmlNode;
use serde_json::{Map, Value};

/// Convert `node`'s children and attributes into a JSON value.
///
/// A leaf element (no children, no attributes) becomes its text content
/// as a string. Repeated child element names become a JSON array;
/// attributes are exposed under an `@`-prefixed key.
#[must_use]
pub fn node_to_json(node: &XmlNode) -> Value {
    if node.children.is_empty() && node.attrs.is_empty() {
        return Value::String(node.text.clone());
    }

    let mut object = Map::new();
    for (key, value) in &node.attrs {
        object.insert(format!("@{key}"), Value::String(value.clone()));
    }

    let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
    for child in &node.children {
        let value = node_to_json(child);
        match grouped.iter_mut().find(|(name, _)| *name == child.name) {
            Some((_, values)) => values.push(value),
            None => grouped.push((child.name.clone(), vec![value])),
        }
    }

    for (name, mut values) in grouped {
        let entry = if values.len() == 1 {
            values.remove(0)
        } else {
            Value::Array(values)
        };
        object.insert(name, entry);
    }

    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentserver_xml::repair_parse;

    #[test]
    fn leaf_element_becomes_its_text() {
        let tree = repair_parse(b"<a>40</a>").unwrap();
        assert_eq!(node_to_json(&tree), Value::String("40".to_string()));
    }

    #[test]
    fn repeated_children_become_an_array() {
        let tree = repair_parse(b"<results><item>1</item><item>2</item></results>").unwrap();
        let json = node_to_json(&tree);
        assert_eq!(json["item"], serde_json::json!(["1", "2"]));
    }

    #[test]
    fn attributes_are_at_prefixed() {
        let tree = repair_parse(br#"<a unit="cm">40</a>"#).unwrap();
        let json = node_to_json(&tree);
        assert_eq!(json["@unit"], Value::String("cm".to_string()));
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Conversion between the generic [`XmlNode`] tree and the typed
//! [`agentserver_core::Envelope`]/[`agentserver_core::Payload`], plus the
//! synthetic-wrap helpers used by the response post-processor (§4.5).

use crate::canonical::canonicalize;
use crate::repair::{repair_parse, RepairError};
use crate::tree::XmlNode;
use agentserver_core::{Envelope, Payload};
use thiserror::Error;
use uuid::Uuid;

/// Local name of the synthetic root the post-processor wraps handler
/// output in before repair-parsing (§4.5 step 1).
pub const SYNTHETIC_ROOT: &str = "dummy";

/// Errors converting between an [`XmlNode`] tree and an [`Envelope`].
#[derive(Debug, Error)]
pub enum EnvelopeXmlError {
    /// The tree's root element is not named `message`.
    #[error("expected root element 'message', found '{found}'")]
    WrongRoot {
        /// The root element name actually found.
        found: String,
    },

    /// A mandatory child element (`from`, `thread`, or the payload) is
    /// missing.
    #[error("missing required element: {field}")]
    MissingField {
        /// Name of the missing element.
        field: String,
    },

    /// The `thread` element's text is not a valid UUID.
    #[error("thread identifier is not a valid UUID: {raw}")]
    InvalidThreadId {
        /// The raw text that failed to parse.
        raw: String,
    },

    /// Repair-parsing failed entirely.
    #[error(transparent)]
    Repair(#[from] RepairError),
}

/// Parse a `<message>` tree into a typed [`Envelope`].
///
/// # Errors
///
/// Returns [`EnvelopeXmlError`] if the root tag, `from`, `thread`, or the
/// payload element are missing or malformed.
pub fn tree_to_envelope(tree: &XmlNode) -> Result<Envelope, EnvelopeXmlError> {
    if tree.name != "message" {
        return Err(EnvelopeXmlError::WrongRoot {
            found: tree.name.clone(),
        });
    }

    let from = find_child_text(tree, "from").ok_or(EnvelopeXmlError::MissingField {
        field: "from".to_string(),
    })?;
    let thread_raw = find_child_text(tree, "thread").ok_or(EnvelopeXmlError::MissingField {
        field: "thread".to_string(),
    })?;
    let thread = Uuid::parse_str(&thread_raw).map_err(|_| EnvelopeXmlError::InvalidThreadId {
        raw: thread_raw.clone(),
    })?;
    let to = find_child_text(tree, "to");

    let payload_node = tree
        .children
        .iter()
        .find(|c| c.name != "from" && c.name != "thread" && c.name != "to")
        .ok_or(EnvelopeXmlError::MissingField {
            field: "payload".to_string(),
        })?;

    let payload = Payload {
        root_tag: payload_node.name.clone(),
        namespace: payload_node.namespace.clone().unwrap_or_default(),
        raw: String::from_utf8_lossy(&canonicalize(payload_node)).into_owned(),
    };

    Ok(Envelope {
        from,
        thread,
        to,
        payload,
    })
}

/// Serialize a typed [`Envelope`] back into an [`XmlNode`] tree, using the
/// fixed envelope schema wire shape from §6.
#[must_use]
pub fn envelope_to_tree(envelope: &Envelope) -> XmlNode {
    let mut root = XmlNode::new("message");
    root.namespace = Some(agentserver_core::ENVELOPE_NS.to_string());
    root.attrs
        .insert("xmlns".to_string(), agentserver_core::ENVELOPE_NS.to_string());

    let mut from = XmlNode::new("from");
    from.text = envelope.from.clone();
    root.children.push(from);

    let mut thread = XmlNode::new("thread");
    thread.text = envelope.thread.to_string();
    root.children.push(thread);

    if let Some(to) = &envelope.to {
        let mut to_node = XmlNode::new("to");
        to_node.text = to.clone();
        root.children.push(to_node);
    }

    let payload_tree = repair_parse(envelope.payload.raw.as_bytes()).unwrap_or_else(|_| {
        let mut fallback = XmlNode::new(envelope.payload.root_tag.clone());
        fallback.namespace = Some(envelope.payload.namespace.clone());
        fallback
    });
    root.children.push(payload_tree);

    root
}

fn find_child_text(node: &XmlNode, name: &str) -> Option<String> {
    node.children
        .iter()
        .find(|c| c.name == name)
        .map(|c| c.text.clone())
}

/// Wrap raw handler-returned bytes in the synthetic root element and
/// repair-parse them (§4.5 steps 1–2).
///
/// Idempotent: if `bytes` already parses to an element literally named
/// [`SYNTHETIC_ROOT`], it is used as-is rather than double-wrapped, which
/// is what makes the synthetic-wrap idempotence law in §8 hold.
///
/// # Errors
///
/// Returns [`RepairError::Unparseable`] only if even the wrapped bytes
/// cannot be recovered at all (in practice this cannot happen, since
/// wrapping guarantees at least one well-formed element).
pub fn wrap_and_parse(bytes: &[u8]) -> Result<XmlNode, RepairError> {
    if let Ok(tree) = repair_parse(bytes) {
        if tree.name == SYNTHETIC_ROOT {
            return Ok(tree);
        }
    }
    let mut wrapped = Vec::with_capacity(bytes.len() + 16);
    wrapped.extend_from_slice(format!("<{SYNTHETIC_ROOT}>").as_bytes());
    wrapped.extend_from_slice(bytes);
    wrapped.extend_from_slice(format!("</{SYNTHETIC_ROOT}>").as_bytes());
    repair_parse(&wrapped)
}

/// Enumerate the immediate children of a synthetic-root tree in document
/// order, for the post-processor's "one outbound payload per child" rule
/// (§4.5 step 3).
#[must_use]
pub fn enumerate_children(synthetic_root: &XmlNode) -> Vec<XmlNode> {
    synthetic_root.children.clone()
}

/// Build a `<huh>` diagnostic payload carrying `message` as its text
/// content, the standard recoverable-failure shape (§7, GLOSSARY).
#[must_use]
pub fn huh(message: &str) -> XmlNode {
    let mut node = XmlNode::new("huh");
    node.text = message.to_string();
    node
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> &'static str {
        r#"<message xmlns="https://xml-pipeline.org/ns/envelope/v1">
            <from>researcher</from>
            <thread>3fa85f64-5717-4562-b3fc-2c963f66afa6</thread>
            <add xmlns="https://xml-pipeline.org/ns/calculator/v1"><a>40</a><b>2</b></add>
        </message>"#
    }

    #[test]
    fn parses_well_formed_message() {
        let tree = repair_parse(sample_message().as_bytes()).expect("repair");
        let envelope = tree_to_envelope(&tree).expect("envelope");
        assert_eq!(envelope.from, "researcher");
        assert_eq!(envelope.payload.root_tag, "add");
    }

    #[test]
    fn missing_thread_is_an_error() {
        let tree = repair_parse(
            br#"<message><from>researcher</from><add><a>1</a></add></message>"#,
        )
        .expect("repair");
        let err = tree_to_envelope(&tree).unwrap_err();
        assert!(matches!(err, EnvelopeXmlError::MissingField { .. }));
    }

    #[test]
    fn wrap_and_parse_is_idempotent_on_already_wrapped_bytes() {
        let raw = b"<call1/><call2/>";
        let once = wrap_and_parse(raw).expect("wrap once");
        let once_bytes = canonicalize(&once);
        let twice = wrap_and_parse(&once_bytes).expect("wrap twice");
        assert_eq!(enumerate_children(&once).len(), enumerate_children(&twice).len());
    }

    #[test]
    fn enumerate_children_preserves_document_order() {
        let wrapped = wrap_and_parse(b"<call1/><call2/><call3/>").expect("wrap");
        let children = enumerate_children(&wrapped);
        assert_eq!(children[0].name, "call1");
        assert_eq!(children[1].name, "call2");
        assert_eq!(children[2].name, "call3");
    }

    #[test]
    fn empty_response_yields_zero_children_for_huh_substitution() {
        let wrapped = wrap_and_parse(b"").expect("wrap");
        assert!(enumerate_children(&wrapped).is_empty());
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tolerant XML reading: best-effort reconstruction of an [`XmlNode`] tree
//! from input that may not be well-formed (§2 Repair & Canonicalization,
//! §4.2 the *repair* pipeline step, §4.5 the post-processor's
//! repair-parse of raw handler bytes).

use crate::tree::XmlNode;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Errors from [`repair_parse`].
#[derive(Debug, Error)]
pub enum RepairError {
    /// No element could be recovered from the input at all.
    #[error("input contains no recoverable element")]
    Unparseable,
}

/// Parse `bytes` into an [`XmlNode`] tree, tolerating malformed input.
///
/// Recovery strategy: invalid UTF-8 is lossily replaced; any reader error
/// on a given event (stray bytes, a malformed tag) is treated as "skip
/// this event and keep going" rather than aborting the whole parse, since
/// the goal is best-effort reconstruction, not strict validation — schema
/// validation is a later, explicit pipeline step. The reader's position is
/// what distinguishes a skippable error from a truly stuck one: if an
/// error left the buffer position unchanged, there is no further input to
/// resync against and the parse ends there instead of spinning. Only a
/// total failure to find any element returns [`RepairError::Unparseable`].
pub fn repair_parse(bytes: &[u8]) -> Result<XmlNode, RepairError> {
    let text = String::from_utf8_lossy(bytes);
    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        let position_before = reader.buffer_position();
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(_) if reader.buffer_position() > position_before => continue,
            Err(_) => break,
        };

        match event {
            Event::Start(start) => {
                let mut node = XmlNode::new(local_name(start.name().as_ref()));
                for attr in start.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .unescape_value()
                        .map(|v| v.into_owned())
                        .unwrap_or_default();
                    if key == "xmlns" {
                        node.namespace = Some(value.clone());
                    }
                    node.attrs.insert(key, value);
                }
                stack.push(node);
            }
            Event::Empty(start) => {
                let mut node = XmlNode::new(local_name(start.name().as_ref()));
                for attr in start.attributes().flatten() {
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .unescape_value()
                        .map(|v| v.into_owned())
                        .unwrap_or_default();
                    if key == "xmlns" {
                        node.namespace = Some(value.clone());
                    }
                    node.attrs.insert(key, value);
                }
                attach(&mut stack, &mut root, node);
            }
            Event::End(_) => {
                if let Some(node) = stack.pop() {
                    attach(&mut stack, &mut root, node);
                }
            }
            Event::Text(text_event) | Event::CData(text_event) => {
                let text = text_event
                    .decode()
                    .map(|c| c.into_owned())
                    .unwrap_or_default();
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    // Anything left on the stack at EOF is an unclosed element; fold it up
    // so its partial content is still recovered rather than discarded.
    while let Some(node) = stack.pop() {
        attach(&mut stack, &mut root, node);
    }

    root.ok_or(RepairError::Unparseable)
}

fn attach(stack: &mut Vec<XmlNode>, root: &mut Option<XmlNode>, node: XmlNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else if root.is_none() {
        *root = Some(node);
    }
    // A second top-level element with a root already set is dropped: the
    // synthetic-wrap step (§4.5) is what legitimately produces multiple
    // top-level children, and it wraps them under one root before calling
    // repair_parse, so a bare second root here indicates trailing garbage.
}

fn local_name(qname: &[u8]) -> String {
    let raw = String::from_utf8_lossy(qname);
    match raw.split_once(':') {
        Some((_, local)) => local.to_string(),
        None => raw.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_element() {
        let tree = repair_parse(b"<add><a>40</a><b>2</b></add>").expect("parse");
        assert_eq!(tree.name, "add");
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].name, "a");
        assert_eq!(tree.children[0].text, "40");
    }

    #[test]
    fn parses_self_closing_element() {
        let tree = repair_parse(b"<result/>").expect("parse");
        assert_eq!(tree.name, "result");
        assert!(tree.children.is_empty());
    }

    #[test]
    fn captures_default_namespace() {
        let tree = repair_parse(br#"<search xmlns="https://xml-pipeline.org/ns/search/v1"/>"#)
            .expect("parse");
        assert_eq!(
            tree.namespace.as_deref(),
            Some("https://xml-pipeline.org/ns/search/v1")
        );
    }

    #[test]
    fn recovers_partial_content_on_unclosed_element() {
        let tree = repair_parse(b"<result>42").expect("parse");
        assert_eq!(tree.name, "result");
        assert_eq!(tree.text, "42");
    }

    #[test]
    fn empty_bytes_are_unparseable() {
        let err = repair_parse(b"").unwrap_err();
        assert!(matches!(err, RepairError::Unparseable));
    }

    #[test]
    fn a_malformed_event_mid_document_is_skipped_not_fatal() {
        // `<!bogus>` is neither a comment, CDATA, nor DOCTYPE, so the
        // reader errors on that single token — but `<call1/>` follows it
        // in the same document and must still be recovered, proving the
        // reader resumes past the bad event instead of stopping there.
        let tree = repair_parse(b"<dummy><!bogus><call1/></dummy>").expect("parse");
        assert_eq!(tree.name, "dummy");
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].name, "call1");
    }

    #[test]
    fn document_order_is_preserved_for_siblings() {
        let tree = repair_parse(b"<dummy><call1/><call2/></dummy>").expect("parse");
        let names: Vec<&str> = tree.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["call1", "call2"]);
    }
}

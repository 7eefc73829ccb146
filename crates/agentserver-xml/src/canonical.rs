// SPDX-License-Identifier: MIT OR Apache-2.0
//! Exclusive canonicalization: a deterministic byte form of an
//! [`XmlNode`] tree, used for signing, comparison, and the §8 law
//! `canonicalize(canonicalize(x)) = canonicalize(x)`.
//!
//! Canonical form: attributes sorted by key (the tree already stores them
//! in a `BTreeMap`), no self-closing shorthand (`<a></a>` not `<a/>`) so
//! that repeated canonicalization of already-canonical bytes is a no-op,
//! and text content escaped consistently.

use crate::tree::XmlNode;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

/// Serialize `node` to its canonical byte form.
#[must_use]
pub fn canonicalize(node: &XmlNode) -> Vec<u8> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_node(&mut writer, node);
    writer.into_inner().into_inner()
}

fn write_node(writer: &mut Writer<Cursor<Vec<u8>>>, node: &XmlNode) {
    let mut start = BytesStart::new(node.name.as_str());
    for (key, value) in &node.attrs {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    writer
        .write_event(Event::Start(start))
        .expect("writing to an in-memory buffer cannot fail");

    if !node.text.is_empty() {
        writer
            .write_event(Event::Text(BytesText::new(&node.text)))
            .expect("writing to an in-memory buffer cannot fail");
    }
    for child in &node.children {
        write_node(writer, child);
    }

    writer
        .write_event(Event::End(BytesEnd::new(node.name.as_str())))
        .expect("writing to an in-memory buffer cannot fail");
}

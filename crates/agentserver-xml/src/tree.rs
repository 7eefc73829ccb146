// SPDX-License-Identifier: MIT OR Apache-2.0
//! The generic XML tree shape produced by [`crate::repair`] and consumed
//! by [`crate::canonical`] and the envelope/payload extraction steps.

use std::collections::BTreeMap;

/// A single element in a best-effort-reconstructed XML tree.
///
/// Attribute order is not preserved — canonicalization always sorts them
/// (exclusive canonicalization, §6) — but child order is preserved exactly,
/// since document order drives the response post-processor's enqueue
/// ordering (§4.5, invariant 5 in §8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlNode {
    /// Local element name (no namespace prefix).
    pub name: String,
    /// XML namespace URI this element is bound to, if any.
    pub namespace: Option<String>,
    /// Attributes, keyed by local name.
    pub attrs: BTreeMap<String, String>,
    /// Ordered child elements.
    pub children: Vec<XmlNode>,
    /// Concatenated text content directly under this element (not under a
    /// child element).
    pub text: String,
}

impl XmlNode {
    /// Construct an empty element with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            attrs: BTreeMap::new(),
            children: Vec::new(),
            text: String::new(),
        }
    }

    /// Wrap `self` as the sole child of a synthetic root element, used by
    /// the response post-processor's synthetic-wrap step (§4.5).
    #[must_use]
    pub fn wrap_in(self, root_name: &str) -> Self {
        let mut root = XmlNode::new(root_name);
        root.children.push(self);
        root
    }
}

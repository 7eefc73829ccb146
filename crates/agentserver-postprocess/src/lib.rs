// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Response Post-Processor (§4.5).
//!
//! Turns a [`DispatchOutcome`]'s raw handler bytes into one fresh
//! [`MessageState`] per response child, reconstructing every envelope
//! exclusively from the dispatcher's captured context — never from
//! `from`/`thread`/`to` the handler may have written into its own
//! output.

use agentserver_core::{Envelope, MessageState, Payload, ThreadId};
use agentserver_dispatch::{CapturedContext, DispatchOutcome};
use agentserver_xml::envelope::{enumerate_children, envelope_to_tree, huh, wrap_and_parse};
use agentserver_xml::{canonicalize, XmlNode};

/// Builds outbound envelopes for one dispatch's responses, binding
/// `from`/`thread` once so every child payload reuses the same
/// provenance.
pub struct ResponseEnvelopeBuilder {
    from: String,
    thread: ThreadId,
    to: String,
}

impl ResponseEnvelopeBuilder {
    /// Bind this builder to the listener that produced the response, the
    /// thread it ran in, and the listener that invoked it — every
    /// response routes back to its caller rather than broadcasting on
    /// its payload's root tag.
    #[must_use]
    pub fn new(from: impl Into<String>, thread: ThreadId, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            thread,
            to: to.into(),
        }
    }

    /// Build a fresh [`MessageState`] whose raw bytes are a canonical
    /// `<message>` envelope wrapping `child` as the payload.
    #[must_use]
    pub fn build_for_child(&self, child: &XmlNode) -> MessageState {
        let envelope = Envelope {
            from: self.from.clone(),
            thread: self.thread,
            to: Some(self.to.clone()),
            payload: Payload {
                root_tag: child.name.clone(),
                namespace: child.namespace.clone().unwrap_or_default(),
                raw: String::from_utf8_lossy(&canonicalize(child)).into_owned(),
            },
        };
        MessageState::from_bytes(canonicalize(&envelope_to_tree(&envelope)))
    }
}

/// Run the response post-processor over one dispatch outcome.
///
/// - A handler failure produces a single `<huh>` state rather than any
///   children.
/// - Unparseable or empty output produces a single `<huh>` state.
/// - Otherwise one state per immediate child of the synthetic wrap, in
///   document order — which is also the order these states should be
///   enqueued onto their target pipelines (§4.5 ordering invariant).
#[must_use]
pub fn postprocess(outcome: &DispatchOutcome) -> Vec<MessageState> {
    // A response truncates the delegation path by one segment (§4.7):
    // it belongs to the thread that invoked this dispatch, not the
    // one-shot child thread the dispatcher delegated into.
    let response_thread = outcome.context.parent_thread_id.unwrap_or(outcome.context.thread_id);
    let builder = ResponseEnvelopeBuilder::new(
        outcome.context.executing_listener.clone(),
        response_thread,
        outcome.context.sender.clone(),
    );

    let raw_bytes = match &outcome.raw_bytes {
        Ok(bytes) => bytes,
        Err(e) => return vec![builder.build_for_child(&huh(&e.to_string()))],
    };

    let wrapped = match wrap_and_parse(raw_bytes) {
        Ok(tree) => tree,
        Err(_) => return vec![builder.build_for_child(&huh("handler output was unparseable"))],
    };

    let children = enumerate_children(&wrapped);
    if children.is_empty() {
        return vec![builder.build_for_child(&huh("handler returned an empty response"))];
    }

    children.iter().map(|c| builder.build_for_child(c)).collect()
}

/// Context needed to attribute a post-processed state when the caller
/// already has a [`CapturedContext`] but not a full [`DispatchOutcome`]
/// (e.g. constructing a boot message outside of any dispatch).
#[must_use]
pub fn postprocess_bytes(context: &CapturedContext, raw_bytes: &[u8]) -> Vec<MessageState> {
    postprocess(&DispatchOutcome {
        context: context.clone(),
        raw_bytes: Ok(raw_bytes.to_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentserver_dispatch::DispatchError;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn context() -> CapturedContext {
        CapturedContext {
            executing_listener: "calculator.add".to_string(),
            thread_id: Uuid::new_v4(),
            sender: "client".to_string(),
            parent_thread_id: None,
            peers: BTreeSet::new(),
        }
    }

    #[test]
    fn single_child_produces_one_state() {
        let outcome = DispatchOutcome {
            context: context(),
            raw_bytes: Ok(b"<result>42</result>".to_vec()),
        };
        let states = postprocess(&outcome);
        assert_eq!(states.len(), 1);
        let rendered = String::from_utf8_lossy(&states[0].raw_bytes);
        assert!(rendered.contains("<result>42</result>"));
        assert!(rendered.contains("<from>calculator.add</from>"));
    }

    #[test]
    fn response_thread_truncates_to_the_parent_when_delegated() {
        let parent = Uuid::new_v4();
        let mut ctx = context();
        ctx.parent_thread_id = Some(parent);
        let outcome = DispatchOutcome {
            context: ctx,
            raw_bytes: Ok(b"<result>42</result>".to_vec()),
        };
        let states = postprocess(&outcome);
        assert!(String::from_utf8_lossy(&states[0].raw_bytes).contains(&parent.to_string()));
    }

    #[test]
    fn response_routes_back_to_the_invoking_sender() {
        let outcome = DispatchOutcome {
            context: context(),
            raw_bytes: Ok(b"<result>42</result>".to_vec()),
        };
        let states = postprocess(&outcome);
        assert!(String::from_utf8_lossy(&states[0].raw_bytes).contains("<to>client</to>"));
    }

    #[test]
    fn multiple_children_produce_one_state_each_in_order() {
        let outcome = DispatchOutcome {
            context: context(),
            raw_bytes: Ok(b"<a/><b/><c/>".to_vec()),
        };
        let states = postprocess(&outcome);
        assert_eq!(states.len(), 3);
        assert!(String::from_utf8_lossy(&states[0].raw_bytes).contains("<a></a>"));
        assert!(String::from_utf8_lossy(&states[1].raw_bytes).contains("<b></b>"));
        assert!(String::from_utf8_lossy(&states[2].raw_bytes).contains("<c></c>"));
    }

    #[test]
    fn empty_response_yields_one_huh() {
        let outcome = DispatchOutcome {
            context: context(),
            raw_bytes: Ok(Vec::new()),
        };
        let states = postprocess(&outcome);
        assert_eq!(states.len(), 1);
        assert!(String::from_utf8_lossy(&states[0].raw_bytes).contains("<huh>"));
    }

    #[test]
    fn handler_failure_yields_one_huh() {
        let outcome = DispatchOutcome {
            context: context(),
            raw_bytes: Err(DispatchError::UnknownHandler("calculator.add".to_string())),
        };
        let states = postprocess(&outcome);
        assert_eq!(states.len(), 1);
        assert!(String::from_utf8_lossy(&states[0].raw_bytes).contains("<huh>"));
    }

    #[test]
    fn provenance_ignores_from_written_by_handler() {
        let outcome = DispatchOutcome {
            context: context(),
            raw_bytes: Ok(b"<result><from>forged</from></result>".to_vec()),
        };
        let states = postprocess(&outcome);
        assert_eq!(states.len(), 1);
        let rendered = String::from_utf8_lossy(&states[0].raw_bytes);
        assert!(rendered.contains("<from>calculator.add</from>"));
        assert!(!rendered.starts_with("<from>forged</from>"));
    }
}

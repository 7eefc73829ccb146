// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Path Registry (§4.7): the private hierarchical thread tree, its
//! lifecycle state machine (§4.10), listener-scoped storage, and
//! conversation history (§3.1).
//!
//! Only this crate ever sees a full dotted path; everything above the
//! pump deals in the opaque [`agentserver_core::ThreadId`] alone.

mod cancel;

pub use cancel::CancellationToken;

use agentserver_core::{Envelope, ThreadId};
use agentserver_error::ErrorCode;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by [`PathRegistry`] operations.
#[derive(Debug, Error)]
pub enum PathError {
    /// No thread is registered under this id.
    #[error("no thread registered for {0}")]
    NotFound(ThreadId),

    /// The thread has already reached the terminal state and cannot be
    /// extended.
    #[error("thread {0} is terminal and cannot be extended")]
    Terminal(ThreadId),
}

impl PathError {
    /// Map to the shared error taxonomy.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) | Self::Terminal(_) => ErrorCode::UnknownTarget,
        }
    }
}

/// Lifecycle state of a thread (§4.10). Transitions are driven
/// exclusively by the pump; handlers never observe this type directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Queue non-empty or still accepting new messages.
    Open,
    /// Producer finished; messages still in flight.
    Draining,
    /// No queued messages, no in-flight dispatches.
    Terminal,
}

struct PathNode {
    parent: Option<ThreadId>,
    path: String,
    state: ThreadState,
    cancellation: CancellationToken,
}

/// The private hierarchical thread tree.
///
/// Single-writer by convention (the pump owns all mutation); reads are
/// safe to share behind whatever lock the caller wraps this in.
#[derive(Default)]
pub struct PathRegistry {
    nodes: HashMap<ThreadId, PathNode>,
    children: HashMap<ThreadId, Vec<ThreadId>>,
    child_name_counts: HashMap<ThreadId, HashMap<String, u32>>,
    storage: HashMap<(ThreadId, String), serde_json::Value>,
    history: HashMap<ThreadId, Vec<Envelope>>,
}

impl PathRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new root thread for a message arriving from `from_client`.
    /// Returns the opaque thread id.
    pub fn new_root(&mut self, from_client: &str) -> ThreadId {
        let id = Uuid::new_v4();
        let path = format!("{from_client}#{id}");
        self.nodes.insert(
            id,
            PathNode {
                parent: None,
                path,
                state: ThreadState::Open,
                cancellation: CancellationToken::new(),
            },
        );
        id
    }

    /// Extend `parent_id` with a new child named `child_name`, returning
    /// the child's opaque thread id. A name already used by a sibling
    /// gets a numeric disambiguator suffix (`name-2`, `name-3`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`PathError::NotFound`] if `parent_id` is unknown, or
    /// [`PathError::Terminal`] if the parent has already reached the
    /// terminal lifecycle state.
    pub fn extend(&mut self, parent_id: ThreadId, child_name: &str) -> Result<ThreadId, PathError> {
        let parent_path = {
            let parent = self
                .nodes
                .get(&parent_id)
                .ok_or(PathError::NotFound(parent_id))?;
            if parent.state == ThreadState::Terminal {
                return Err(PathError::Terminal(parent_id));
            }
            parent.path.clone()
        };

        let counts = self.child_name_counts.entry(parent_id).or_default();
        let count = counts.entry(child_name.to_string()).or_insert(0);
        *count += 1;
        let disambiguated = if *count == 1 {
            child_name.to_string()
        } else {
            format!("{child_name}-{count}")
        };

        let id = Uuid::new_v4();
        let path = format!("{parent_path}.{disambiguated}");
        self.nodes.insert(
            id,
            PathNode {
                parent: Some(parent_id),
                path,
                state: ThreadState::Open,
                cancellation: CancellationToken::new(),
            },
        );
        self.children.entry(parent_id).or_default().push(id);
        Ok(id)
    }

    /// Mark a thread draining: its producer has finished but messages
    /// may still be in flight.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::NotFound`] if `id` is unknown.
    pub fn mark_draining(&mut self, id: ThreadId) -> Result<(), PathError> {
        self.node_mut(id)?.state = ThreadState::Draining;
        Ok(())
    }

    /// Mark a thread terminal: no queue, no in-flight dispatches. Does
    /// not itself release storage — call [`PathRegistry::prune`] for
    /// that.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::NotFound`] if `id` is unknown.
    pub fn mark_terminal(&mut self, id: ThreadId) -> Result<(), PathError> {
        self.node_mut(id)?.state = ThreadState::Terminal;
        Ok(())
    }

    /// Remove `id` and its entire subtree, releasing listener-scoped
    /// storage and conversation history for every removed id. Returns
    /// the parent id of `id` (`None` if it was a root).
    ///
    /// # Errors
    ///
    /// Returns [`PathError::NotFound`] if `id` is unknown.
    pub fn prune(&mut self, id: ThreadId) -> Result<Option<ThreadId>, PathError> {
        let parent = self.nodes.get(&id).ok_or(PathError::NotFound(id))?.parent;

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(kids) = self.children.remove(&current) {
                stack.extend(kids);
            }
            self.child_name_counts.remove(&current);
            self.nodes.remove(&current);
            self.history.remove(&current);
            self.storage.retain(|(thread, _), _| *thread != current);
        }

        if let Some(parent_id) = parent {
            if let Some(siblings) = self.children.get_mut(&parent_id) {
                siblings.retain(|sibling| *sibling != id);
            }
        }

        Ok(parent)
    }

    /// Cancel any in-flight work for `id` and prune it immediately,
    /// regardless of lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::NotFound`] if `id` is unknown.
    pub fn force_prune(&mut self, id: ThreadId) -> Result<Option<ThreadId>, PathError> {
        self.nodes
            .get(&id)
            .ok_or(PathError::NotFound(id))?
            .cancellation
            .cancel();
        self.prune(id)
    }

    /// The cancellation token for `id`, used by the pump to observe a
    /// force-prune request.
    #[must_use]
    pub fn cancellation_of(&self, id: ThreadId) -> Option<CancellationToken> {
        self.nodes.get(&id).map(|n| n.cancellation.clone())
    }

    /// The parent of `id`, or `None` if it is a root or unknown.
    #[must_use]
    pub fn parent_of(&self, id: ThreadId) -> Option<ThreadId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    /// The private dotted path of `id`, admin/forensic use only.
    #[must_use]
    pub fn path_of(&self, id: ThreadId) -> Option<&str> {
        self.nodes.get(&id).map(|n| n.path.as_str())
    }

    /// Walk up to the root ancestor of `id` — the client connection a
    /// deeply nested thread ultimately belongs to. Returns `id` itself
    /// if it is already a root or unknown.
    #[must_use]
    pub fn root_of(&self, id: ThreadId) -> ThreadId {
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            current = parent;
        }
        current
    }

    /// Current lifecycle state of `id`.
    #[must_use]
    pub fn state_of(&self, id: ThreadId) -> Option<ThreadState> {
        self.nodes.get(&id).map(|n| n.state)
    }

    /// Read listener-scoped storage for `(id, listener)`.
    #[must_use]
    pub fn get_storage(&self, id: ThreadId, listener: &str) -> Option<&serde_json::Value> {
        self.storage.get(&(id, listener.to_string()))
    }

    /// Write listener-scoped storage for `(id, listener)`, overwriting
    /// any previous value.
    pub fn set_storage(&mut self, id: ThreadId, listener: &str, value: serde_json::Value) {
        self.storage.insert((id, listener.to_string()), value);
    }

    /// Append an envelope to `id`'s conversation history.
    pub fn append_history(&mut self, id: ThreadId, envelope: Envelope) {
        self.history.entry(id).or_default().push(envelope);
    }

    /// The full conversation history for `id`, in arrival order.
    #[must_use]
    pub fn history_of(&self, id: ThreadId) -> &[Envelope] {
        self.history.get(&id).map_or(&[], Vec::as_slice)
    }

    fn node_mut(&mut self, id: ThreadId) -> Result<&mut PathNode, PathError> {
        self.nodes.get_mut(&id).ok_or(PathError::NotFound(id))
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Listener Registry (§4.1): the authoritative map of registered names to
//! [`ListenerRecord`]s, plus the root-tag index used for broadcast
//! dispatch.
//!
//! Two distinct duplicate checks gate registration: a name can only be
//! bound once, and an agent's root tag can only be bound to one agent
//! (agents get blind self-iteration, so two agents racing on the same
//! root tag would each think replies were their own). Tools may freely
//! share a root tag — that's what makes a broadcast group.

use agentserver_core::{ListenerKind, ListenerRecord};
use agentserver_error::ErrorCode;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Errors raised by [`ListenerRegistry`] operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A listener with this name is already registered.
    #[error("listener '{0}' is already registered")]
    NameTaken(String),

    /// An agent already owns this root tag.
    #[error("root tag '{root_tag}' is already bound to agent '{owner}'")]
    RootTagTaken {
        /// The contested root tag.
        root_tag: String,
        /// The agent currently holding it.
        owner: String,
    },

    /// No listener is registered under this name.
    #[error("no listener registered for '{0}'")]
    NotFound(String),
}

impl RegistryError {
    /// Map to the shared error taxonomy.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NameTaken(_) | Self::RootTagTaken { .. } => ErrorCode::DuplicateRegistration,
            Self::NotFound(_) => ErrorCode::UnknownTarget,
        }
    }
}

/// The registry of all listeners known to a running organism.
///
/// Ordered by name so [`ListenerRegistry::names`] and broadcast fan-out
/// are deterministic across runs, which matters for reproducing test
/// failures.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    by_name: BTreeMap<String, ListenerRecord>,
    by_root_tag: BTreeMap<String, BTreeSet<String>>,
    agent_root_tags: BTreeMap<String, String>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `record`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NameTaken`] if the name is already bound,
    /// or [`RegistryError::RootTagTaken`] if `record` is an agent and
    /// another agent already owns its root tag.
    pub fn register(&mut self, record: ListenerRecord) -> Result<(), RegistryError> {
        if self.by_name.contains_key(&record.name) {
            return Err(RegistryError::NameTaken(record.name));
        }
        if record.kind == ListenerKind::Agent {
            if let Some(owner) = self.agent_root_tags.get(&record.root_tag) {
                return Err(RegistryError::RootTagTaken {
                    root_tag: record.root_tag,
                    owner: owner.clone(),
                });
            }
            self.agent_root_tags
                .insert(record.root_tag.clone(), record.name.clone());
        }

        self.by_root_tag
            .entry(record.root_tag.clone())
            .or_default()
            .insert(record.name.clone());
        self.by_name.insert(record.name.clone(), record);
        Ok(())
    }

    /// Look up a listener by its registered name.
    #[must_use]
    pub fn lookup_by_name(&self, name: &str) -> Option<&ListenerRecord> {
        self.by_name.get(name)
    }

    /// Look up every listener bound to `root_tag`, in name order. An
    /// empty vector means no one is listening on that tag.
    #[must_use]
    pub fn lookup_by_root(&self, root_tag: &str) -> Vec<&ListenerRecord> {
        self.by_root_tag
            .get(root_tag)
            .into_iter()
            .flatten()
            .filter_map(|name| self.by_name.get(name))
            .collect()
    }

    /// Remove a listener by name. Returns `true` if it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let Some(record) = self.by_name.remove(name) else {
            return false;
        };
        if let Some(names) = self.by_root_tag.get_mut(&record.root_tag) {
            names.remove(name);
            if names.is_empty() {
                self.by_root_tag.remove(&record.root_tag);
            }
        }
        if record.kind == ListenerKind::Agent {
            self.agent_root_tags.remove(&record.root_tag);
        }
        true
    }

    /// All registered names, in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.by_name.keys().map(String::as_str).collect()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the registry holds no listeners.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

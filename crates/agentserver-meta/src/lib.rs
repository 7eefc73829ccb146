// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Meta Handler (§4.9): answers introspection queries about the running
//! organism — registered listener schemas, generated example payloads,
//! agent prompt fragments, and the public capability list — each gated
//! by a `none`/`authenticated`/`admin` privilege level read from
//! `agentserver_config::MetaConfig`.

pub mod example;

use agentserver_config::{MetaConfig, MetaPrivilege};
use agentserver_error::ErrorCode;
use agentserver_registry::ListenerRegistry;
use agentserver_xml::SchemaStore;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// The privilege level a caller presents when issuing a meta query.
/// Ordered: `None` < `Authenticated` < `Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Privilege {
    None,
    Authenticated,
    Admin,
}

fn required_level(gate: MetaPrivilege) -> Privilege {
    match gate {
        MetaPrivilege::None => Privilege::None,
        MetaPrivilege::Authenticated => Privilege::Authenticated,
        MetaPrivilege::Admin => Privilege::Admin,
    }
}

/// Who is asking, and from where. A federation peer may only query when
/// its gateway config explicitly allows meta access (§4.9), regardless
/// of the privilege level it presents.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub privilege: Privilege,
    pub is_remote: bool,
    pub gateway_allows_meta: bool,
}

impl Caller {
    /// A local, fully-authenticated admin caller.
    #[must_use]
    pub fn admin() -> Self {
        Self {
            privilege: Privilege::Admin,
            is_remote: false,
            gateway_allows_meta: false,
        }
    }
}

/// Errors raised answering a meta query.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("caller privilege does not satisfy this operation's gate")]
    PrivilegeDenied,

    #[error("federation peer's gateway does not allow meta queries")]
    RemoteNotAllowed,

    #[error("no listener registered for '{0}'")]
    UnknownListener(String),

    #[error("no prompt fragment registered for '{0}'")]
    UnknownPrompt(String),

    #[error("schema lookup failed: {0}")]
    Schema(#[from] agentserver_xml::schema::SchemaError),
}

impl MetaError {
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::PrivilegeDenied | Self::RemoteNotAllowed => ErrorCode::PrivilegeDenied,
            Self::UnknownListener(_) | Self::UnknownPrompt(_) => ErrorCode::UnknownTarget,
            Self::Schema(e) => e.error_code(),
        }
    }
}

/// Answers introspection queries over shared registry/schema state.
pub struct MetaHandler {
    config: MetaConfig,
    registry: Arc<RwLock<ListenerRegistry>>,
    schemas: Arc<RwLock<SchemaStore>>,
    prompts: HashMap<String, String>,
}

impl MetaHandler {
    /// Build a handler. `prompts` maps agent listener name to its loaded
    /// system-prompt fragment text — loading the file named by
    /// `agents[*].system_prompt_path` is a bootstrap concern.
    #[must_use]
    pub fn new(
        config: MetaConfig,
        registry: Arc<RwLock<ListenerRegistry>>,
        schemas: Arc<RwLock<SchemaStore>>,
        prompts: HashMap<String, String>,
    ) -> Self {
        Self {
            config,
            registry,
            schemas,
            prompts,
        }
    }

    fn check(&self, caller: &Caller, gate: MetaPrivilege) -> Result<(), MetaError> {
        if caller.is_remote && !caller.gateway_allows_meta {
            return Err(MetaError::RemoteNotAllowed);
        }
        if caller.privilege < required_level(gate) {
            return Err(MetaError::PrivilegeDenied);
        }
        Ok(())
    }

    /// The public capability list: every registered listener's name,
    /// root tag, kind, and description.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::PrivilegeDenied`] or [`MetaError::RemoteNotAllowed`].
    pub async fn capabilities(&self, caller: &Caller) -> Result<Vec<CapabilitySummary>, MetaError> {
        self.check(caller, self.config.allow_capabilities)?;
        let registry = self.registry.read().await;
        Ok(registry
            .names()
            .into_iter()
            .filter_map(|name| registry.lookup_by_name(name))
            .map(CapabilitySummary::from)
            .collect())
    }

    /// The compiled JSON Schema source registered for `listener_name`.
    ///
    /// # Errors
    ///
    /// Returns a privilege error, or [`MetaError::Schema`] if nothing is
    /// registered under that name.
    pub async fn schema(
        &self,
        caller: &Caller,
        listener_name: &str,
    ) -> Result<serde_json::Value, MetaError> {
        self.check(caller, self.config.allow_schema)?;
        let schemas = self.schemas.read().await;
        Ok(schemas.get(listener_name)?.source().clone())
    }

    /// A generated example payload conforming to `listener_name`'s schema.
    ///
    /// # Errors
    ///
    /// Returns a privilege error, or [`MetaError::Schema`] if nothing is
    /// registered under that name.
    pub async fn example(
        &self,
        caller: &Caller,
        listener_name: &str,
    ) -> Result<serde_json::Value, MetaError> {
        self.check(caller, self.config.allow_example)?;
        let schemas = self.schemas.read().await;
        let schema = schemas.get(listener_name)?;
        Ok(example::example_for(schema.source()))
    }

    /// The loaded system-prompt fragment for an agent listener.
    ///
    /// # Errors
    ///
    /// Returns a privilege error, or [`MetaError::UnknownPrompt`] if no
    /// fragment was loaded for that name.
    pub async fn prompt(&self, caller: &Caller, listener_name: &str) -> Result<String, MetaError> {
        self.check(caller, self.config.allow_prompt)?;
        self.prompts
            .get(listener_name)
            .cloned()
            .ok_or_else(|| MetaError::UnknownPrompt(listener_name.to_string()))
    }
}

/// A capability-list entry surfaced by [`MetaHandler::capabilities`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySummary {
    pub name: String,
    pub root_tag: String,
    pub kind: agentserver_core::ListenerKind,
    pub description: String,
}

impl From<&agentserver_core::ListenerRecord> for CapabilitySummary {
    fn from(record: &agentserver_core::ListenerRecord) -> Self {
        Self {
            name: record.name.clone(),
            root_tag: record.root_tag.clone(),
            kind: record.kind,
            description: record.description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentserver_core::{ListenerKind, ListenerRecord};
    use std::collections::BTreeSet;

    fn handler(config: MetaConfig) -> MetaHandler {
        let mut registry = ListenerRegistry::new();
        registry
            .register(ListenerRecord {
                name: "calculator.add".into(),
                root_tag: "add".into(),
                kind: ListenerKind::Tool,
                description: "adds two numbers".into(),
                peers: BTreeSet::new(),
                token_share: None,
            })
            .unwrap();
        let mut schemas = SchemaStore::new(std::env::temp_dir());
        schemas
            .register(
                "calculator.add",
                serde_json::json!({
                    "type": "object",
                    "properties": { "a": {"type": "integer"}, "b": {"type": "integer"} }
                }),
            )
            .unwrap();
        MetaHandler::new(
            config,
            Arc::new(RwLock::new(registry)),
            Arc::new(RwLock::new(schemas)),
            HashMap::from([("researcher".to_string(), "You are a researcher.".to_string())]),
        )
    }

    fn open_config() -> MetaConfig {
        MetaConfig {
            allow_schema: MetaPrivilege::None,
            allow_example: MetaPrivilege::None,
            allow_prompt: MetaPrivilege::Authenticated,
            allow_capabilities: MetaPrivilege::None,
        }
    }

    fn anonymous() -> Caller {
        Caller {
            privilege: Privilege::None,
            is_remote: false,
            gateway_allows_meta: false,
        }
    }

    #[tokio::test]
    async fn none_gated_capabilities_are_visible_to_anonymous_callers() {
        let handler = handler(open_config());
        let caps = handler.capabilities(&anonymous()).await.unwrap();
        assert_eq!(caps[0].name, "calculator.add");
    }

    #[tokio::test]
    async fn admin_gated_query_rejects_an_anonymous_caller() {
        let handler = handler(MetaConfig {
            allow_prompt: MetaPrivilege::Admin,
            ..open_config()
        });
        let err = handler.prompt(&anonymous(), "researcher").await.unwrap_err();
        assert!(matches!(err, MetaError::PrivilegeDenied));
    }

    #[tokio::test]
    async fn authenticated_caller_passes_an_authenticated_gate() {
        let handler = handler(open_config());
        let caller = Caller {
            privilege: Privilege::Authenticated,
            is_remote: false,
            gateway_allows_meta: false,
        };
        assert_eq!(
            handler.prompt(&caller, "researcher").await.unwrap(),
            "You are a researcher."
        );
    }

    #[tokio::test]
    async fn a_remote_caller_without_the_gateway_flag_is_rejected_even_when_admin() {
        let handler = handler(open_config());
        let caller = Caller {
            privilege: Privilege::Admin,
            is_remote: true,
            gateway_allows_meta: false,
        };
        let err = handler.capabilities(&caller).await.unwrap_err();
        assert!(matches!(err, MetaError::RemoteNotAllowed));
    }

    #[tokio::test]
    async fn example_payload_is_generated_from_the_registered_schema() {
        let handler = handler(open_config());
        let example = handler.example(&anonymous(), "calculator.add").await.unwrap();
        assert_eq!(example["a"], serde_json::json!(0));
    }

    #[tokio::test]
    async fn unregistered_listener_schema_query_fails() {
        let handler = handler(open_config());
        let err = handler.schema(&anonymous(), "ghost").await.unwrap_err();
        assert!(matches!(err, MetaError::Schema(_)));
    }
}

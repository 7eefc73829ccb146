// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bootstrap configuration loading and validation (§6 of the design doc).
//!
//! Recognized keys map 1:1 onto [`OrganismConfig`]'s fields. Loading goes
//! through [`OrganismConfig::load`], which parses YAML and then runs
//! [`OrganismConfig::validate`] before the daemon uses any of it.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors that can occur loading or validating the bootstrap config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found or not readable.
    #[error("config file not found or unreadable: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid YAML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// `organism.tls.*` — TLS material for the main bus listener.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to a PEM-encoded certificate chain.
    pub cert_path: String,
    /// Path to a PEM-encoded private key.
    pub key_path: String,
}

/// `organism.*` — server identity and main-bus TLS.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct OrganismIdentity {
    /// Human-readable organism name.
    pub name: String,
    /// Path to the long-term ed25519 identity key (public half used to
    /// verify OOB commands; the external identity-key generator owns the
    /// private half).
    pub identity: String,
    /// Main-bus bind port.
    pub port: u16,
    /// TLS certificate/key pair.
    pub tls: TlsConfig,
    /// Shared TOTP secret bytes for main-bus connect auth (§6), taken
    /// verbatim as the HMAC key — no base32 decoding layer.
    pub totp_secret: String,
}

/// `oob.*` — the privileged out-of-band channel.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct OobConfig {
    /// Whether the OOB channel is enabled at all.
    #[serde(default)]
    pub enabled: bool,
    /// Bind address, normally loopback.
    #[serde(default = "default_oob_bind")]
    pub bind: String,
    /// TCP port, mutually exclusive with `socket`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Unix domain socket path, mutually exclusive with `port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<String>,
}

fn default_oob_bind() -> String {
    "127.0.0.1".to_string()
}

/// Scheduling policy for the message pump (§4.6).
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ThreadScheduling {
    /// Fair across threads (default).
    BreadthFirst,
    /// Finish one branch before starting another.
    DepthFirst,
}

impl Default for ThreadScheduling {
    fn default() -> Self {
        Self::BreadthFirst
    }
}

/// Privilege gate for a single meta-handler operation (§4.9).
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetaPrivilege {
    /// No authentication required.
    None,
    /// Requires an authenticated main-bus connection.
    Authenticated,
    /// Requires the admin meta flag.
    #[default]
    Admin,
}

/// `meta.allow_*` — privilege flags per introspection operation.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Default)]
pub struct MetaConfig {
    /// Gate for schema introspection queries.
    #[serde(default)]
    pub allow_schema: MetaPrivilege,
    /// Gate for example-payload queries.
    #[serde(default)]
    pub allow_example: MetaPrivilege,
    /// Gate for prompt-fragment queries.
    #[serde(default)]
    pub allow_prompt: MetaPrivilege,
    /// Gate for the public capability list.
    #[serde(default)]
    pub allow_capabilities: MetaPrivilege,
}

/// `listeners[*]` — a configured tool listener.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Unique registered name.
    pub name: String,
    /// Payload root tag / type this listener handles.
    pub payload_type: String,
    /// Opaque reference to the handler implementation (resolved by the
    /// daemon's builtin tool registry).
    pub handler: String,
    /// Mandatory human description.
    pub description: String,
}

/// `agents[*]` — a configured agent listener wrapping a remote LLM backend.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct AgentConfig {
    /// Unique registered name.
    pub name: String,
    /// Path to the system-prompt file.
    pub system_prompt_path: String,
    /// Declared peer capability names.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Share of the global tokens-per-minute budget.
    pub token_share: u32,
}

/// `gateways[*]` — a federation peer.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Remote WSS URL.
    pub url: String,
    /// Trusted ed25519 public key (hex-encoded), for verifying inbound
    /// forwarded commands.
    pub trusted_public_key: String,
    /// Human description.
    pub description: String,
    /// Whether this peer may issue meta-handler introspection queries
    /// over the federation link (§4.9). Defaults to closed.
    #[serde(default)]
    pub allow_meta: bool,
}

/// Top-level bootstrap configuration for the organism (§6 config table).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct OrganismConfig {
    /// Server identity and main-bus TLS.
    pub organism: OrganismIdentity,
    /// Privileged OOB channel.
    #[serde(default)]
    pub oob: OobConfig,
    /// Pump scheduling policy.
    #[serde(default)]
    pub thread_scheduling: ThreadScheduling,
    /// Meta handler privilege gates.
    #[serde(default)]
    pub meta: MetaConfig,
    /// Configured tool listeners.
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
    /// Configured agent listeners.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Federation gateways.
    #[serde(default)]
    pub gateways: Vec<GatewayConfig>,
}

impl Default for OobConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_oob_bind(),
            port: None,
            socket: None,
        }
    }
}

impl OrganismConfig {
    /// Load and validate a config from a YAML file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileNotFound`], [`ConfigError::ParseError`],
    /// or [`ConfigError::ValidationError`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_yaml(&text)
    }

    /// Parse and validate a config from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] or [`ConfigError::ValidationError`].
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: OrganismConfig =
            serde_yaml::from_str(text).map_err(|e| ConfigError::ParseError {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate semantic constraints beyond what serde enforces.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] with every problem found,
    /// not just the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();

        if self.organism.name.trim().is_empty() {
            reasons.push("organism.name must not be empty".to_string());
        }
        if self.organism.identity.trim().is_empty() {
            reasons.push("organism.identity must not be empty".to_string());
        }
        if self.oob.enabled && self.oob.port.is_none() && self.oob.socket.is_none() {
            reasons.push("oob.enabled requires either oob.port or oob.socket".to_string());
        }
        if self.oob.port.is_some() && self.oob.socket.is_some() {
            reasons.push("oob.port and oob.socket are mutually exclusive".to_string());
        }

        let mut seen_names = std::collections::BTreeSet::new();
        for listener in &self.listeners {
            if !seen_names.insert(listener.name.clone()) {
                reasons.push(format!("duplicate listener name: {}", listener.name));
            }
        }
        for agent in &self.agents {
            if !seen_names.insert(agent.name.clone()) {
                reasons.push(format!("duplicate listener/agent name: {}", agent.name));
            }
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError { reasons })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
organism:
  name: test-organism
  identity: keys/identity.pub
  port: 8443
  totp_secret: test-shared-secret
  tls:
    cert_path: certs/server.pem
    key_path: certs/server.key
"#
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = OrganismConfig::from_yaml(minimal_yaml()).expect("parse");
        assert_eq!(config.organism.name, "test-organism");
        assert_eq!(config.thread_scheduling, ThreadScheduling::BreadthFirst);
        assert!(!config.oob.enabled);
    }

    #[test]
    fn rejects_empty_organism_name() {
        let yaml = minimal_yaml().replace("test-organism", "");
        let err = OrganismConfig::from_yaml(&yaml).unwrap_err();
        matches!(err, ConfigError::ValidationError { .. });
    }

    #[test]
    fn rejects_oob_enabled_without_port_or_socket() {
        let yaml = format!("{minimal_yaml}\noob:\n  enabled: true\n", minimal_yaml = minimal_yaml());
        let err = OrganismConfig::from_yaml(&yaml).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("oob.port")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_listener_and_agent_names() {
        let yaml = format!(
            "{base}\nlisteners:\n  - name: shared\n    payload_type: add\n    handler: calc\n    description: adds\nagents:\n  - name: shared\n    system_prompt_path: p.txt\n    token_share: 1\n",
            base = minimal_yaml()
        );
        let err = OrganismConfig::from_yaml(&yaml).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("duplicate")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }
}

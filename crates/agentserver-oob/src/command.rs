// SPDX-License-Identifier: MIT OR Apache-2.0
//! Privileged command shapes carried over the OOB channel (§4.8).

use agentserver_core::ListenerKind;
use serde::Deserialize;

/// A listener definition as carried in `add-listener` and `hot-reload`
/// payloads. Distinct from [`agentserver_core::ListenerRecord`] because
/// the wire shape uses a flat, whitespace-separated peer list rather
/// than a set.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerSpec {
    pub name: String,
    pub root_tag: String,
    pub kind: ListenerKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub peers: String,
    #[serde(default)]
    pub token_share: Option<u32>,
}

impl ListenerSpec {
    /// Build the registry-ready record.
    #[must_use]
    pub fn into_record(self) -> agentserver_core::ListenerRecord {
        agentserver_core::ListenerRecord {
            name: self.name,
            root_tag: self.root_tag,
            kind: self.kind,
            description: self.description,
            peers: self
                .peers
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            token_share: self.token_share,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveListenerCommand {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HotReloadCommand {
    #[serde(default, rename = "listener")]
    pub listeners: Vec<ListenerSpec>,
}

/// A single parsed, not-yet-applied privileged command.
#[derive(Debug, Clone)]
pub enum OobCommand {
    AddListener(ListenerSpec),
    RemoveListener(RemoveListenerCommand),
    HotReload(HotReloadCommand),
    Introspect,
    Shutdown,
}

impl OobCommand {
    /// Parse a command from its payload root tag and raw inner XML, per
    /// the fixed schema named in §4.8: `add-listener`, `remove-listener`,
    /// `hot-reload`, `introspect`, `shutdown`.
    ///
    /// # Errors
    ///
    /// Returns an error string if `root_tag` is not one of the five
    /// privileged shapes, or the inner XML doesn't match its command.
    pub fn parse(root_tag: &str, raw: &str) -> Result<Self, String> {
        match root_tag {
            "add-listener" => quick_xml::de::from_str(raw)
                .map(OobCommand::AddListener)
                .map_err(|e| e.to_string()),
            "remove-listener" => quick_xml::de::from_str(raw)
                .map(OobCommand::RemoveListener)
                .map_err(|e| e.to_string()),
            "hot-reload" => quick_xml::de::from_str(raw)
                .map(OobCommand::HotReload)
                .map_err(|e| e.to_string()),
            "introspect" => Ok(OobCommand::Introspect),
            "shutdown" => Ok(OobCommand::Shutdown),
            other => Err(format!("'{other}' is not a privileged command shape")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_listener_parses_peers_as_whitespace_separated() {
        let spec = ListenerSpec {
            name: "calculator.add".into(),
            root_tag: "add".into(),
            kind: ListenerKind::Tool,
            description: "adds".into(),
            peers: "result error".into(),
            token_share: None,
        };
        let record = spec.into_record();
        assert!(record.peers.contains("result"));
        assert!(record.peers.contains("error"));
    }

    #[test]
    fn unknown_root_tag_is_rejected() {
        assert!(OobCommand::parse("drop-table", "<x/>").is_err());
    }

    #[test]
    fn introspect_and_shutdown_need_no_payload() {
        assert!(matches!(
            OobCommand::parse("introspect", ""),
            Ok(OobCommand::Introspect)
        ));
        assert!(matches!(
            OobCommand::parse("shutdown", ""),
            Ok(OobCommand::Shutdown)
        ));
    }
}

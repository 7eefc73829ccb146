// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Bootstrap: wires the config-driven registry, schema store, path
//! registry, dispatcher, pump, meta handler, and OOB control plane into
//! one running organism. Split from `main.rs` so the wiring itself can
//! be exercised without an actual TCP listener.

use agentserver_auth::TotpVerifier;
use agentserver_config::{ListenerConfig, OrganismConfig};
use agentserver_core::{ListenerKind, ListenerRecord};
use agentserver_dispatch::{Dispatcher, Handler};
use agentserver_meta::MetaHandler;
use agentserver_path::PathRegistry;
use agentserver_pump::{Pump, SchedulingPolicy};
use agentserver_registry::ListenerRegistry;
use agentserver_telemetry::{DispatchMetrics, DispatchOutcomeKind, PumpMetrics};
use agentserver_tools::{Calculator, Echo, Operation};
use agentserver_transport::{EgressRouter, OobState};
use anyhow::{Context, Result};
use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, RwLock};

/// Default worker-pool concurrency cap (§4.6). Not presently exposed as
/// a config key; revisit if a deployment needs to tune it.
const DEFAULT_CONCURRENCY_CAP: usize = 64;
const DEFAULT_GLOBAL_TOKENS_PER_MINUTE: u64 = 1_000_000;
const PUMP_TICK: std::time::Duration = std::time::Duration::from_millis(50);

/// Every piece of shared state a running organism needs, assembled from
/// an [`OrganismConfig`].
pub struct Organism {
    pub config: OrganismConfig,
    pub registry: Arc<RwLock<ListenerRegistry>>,
    pub schemas: Arc<RwLock<agentserver_xml::SchemaStore>>,
    pub paths: Arc<RwLock<PathRegistry>>,
    pub dispatcher: Arc<Dispatcher>,
    pub pump: Arc<Pump>,
    pub router: Arc<EgressRouter>,
    pub totp: Arc<TotpVerifier>,
    pub meta: Arc<MetaHandler>,
    pub dispatch_metrics: Arc<DispatchMetrics>,
    pub pump_metrics: Arc<PumpMetrics>,
    pub identity: VerifyingKey,
}

/// Load, validate, and assemble a running organism's shared state from
/// a config file on disk.
///
/// # Errors
///
/// Returns an error chained with `.with_context` at every bootstrap
/// step a deployment might get wrong — config load, identity key read,
/// TLS material read — so the binary can print a single readable cause
/// string on exit code `1`.
pub async fn bootstrap(config_path: &Path) -> Result<Organism> {
    let config = OrganismConfig::load(config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;

    let mut registry = ListenerRegistry::new();
    for listener in &config.listeners {
        registry
            .register(listener_record(listener))
            .with_context(|| format!("register listener '{}'", listener.name))?;
    }
    for agent in &config.agents {
        registry
            .register(agent_record(agent))
            .with_context(|| format!("register agent '{}'", agent.name))?;
    }
    let registry = Arc::new(RwLock::new(registry));

    let mut schemas = agentserver_xml::SchemaStore::new("schemas");
    schemas.rehydrate().context("rehydrate cached schemas")?;
    for listener in &config.listeners {
        if schemas.get(&listener.name).is_err() {
            // No schema body travels through the config table (§6); a
            // freshly configured listener accepts any object payload
            // until an operator supplies a real one via hot-reload.
            schemas
                .register(&listener.name, permissive_schema())
                .with_context(|| format!("register placeholder schema for '{}'", listener.name))?;
        }
    }
    let schemas = Arc::new(RwLock::new(schemas));

    let dispatch_metrics = Arc::new(DispatchMetrics::new());
    let dispatcher = Arc::new(Dispatcher::new());
    for listener in &config.listeners {
        match built_in_handler(&listener.handler) {
            Some(handler) => {
                let metered = Arc::new(MeteredHandler {
                    inner: handler,
                    metrics: Arc::clone(&dispatch_metrics),
                });
                dispatcher.register_handler(listener.name.clone(), metered).await;
            }
            None => tracing::warn!(
                target: "organism.daemon",
                listener = %listener.name,
                handler = %listener.handler,
                "no built-in handler for this listener name, leaving unbound"
            ),
        }
    }

    let paths = Arc::new(RwLock::new(PathRegistry::new()));

    let global_tokens = config
        .agents
        .iter()
        .filter_map(|a| u64::from(a.token_share).checked_mul(1000))
        .sum::<u64>()
        .max(DEFAULT_GLOBAL_TOKENS_PER_MINUTE);

    let pump = Arc::new(Pump::new(
        Arc::clone(&registry),
        Arc::clone(&schemas),
        Arc::clone(&dispatcher),
        Arc::clone(&paths),
        DEFAULT_CONCURRENCY_CAP,
        global_tokens,
        scheduling_policy(config.thread_scheduling),
    ));

    let router = Arc::new(EgressRouter::new());
    let totp = Arc::new(TotpVerifier::new(config.organism.totp_secret.as_bytes().to_vec()));

    let mut prompts = HashMap::new();
    for agent in &config.agents {
        if let Ok(text) = tokio::fs::read_to_string(&agent.system_prompt_path).await {
            prompts.insert(agent.name.clone(), text);
        } else {
            tracing::warn!(
                target: "organism.daemon",
                agent = %agent.name,
                path = %agent.system_prompt_path,
                "system prompt file not found, meta prompt query will fail for this agent"
            );
        }
    }
    let meta = Arc::new(MetaHandler::new(
        config.meta.clone(),
        Arc::clone(&registry),
        Arc::clone(&schemas),
        prompts,
    ));

    let identity = load_identity(Path::new(&config.organism.identity))
        .with_context(|| format!("load identity key {}", config.organism.identity))?;

    Ok(Organism {
        config,
        registry,
        schemas,
        paths,
        dispatcher,
        pump,
        router,
        totp,
        meta,
        dispatch_metrics,
        pump_metrics: Arc::new(PumpMetrics::new()),
        identity,
    })
}

/// Build the OOB control-plane handler over the organism's registry.
/// Returns the handler plus the shutdown signal the daemon's main loop
/// watches, or `None` if the config disables the OOB channel.
#[must_use]
pub fn oob_handler(organism: &Organism) -> Option<(Arc<OobState>, watch::Receiver<bool>)> {
    if !organism.config.oob.enabled {
        return None;
    }
    let (handler, rx) = agentserver_oob::OobHandler::new(Arc::clone(&organism.registry));
    Some((
        Arc::new(OobState {
            handler,
            identity: organism.identity,
        }),
        rx,
    ))
}

/// Read a raw 32-byte Ed25519 public key from disk. No enrollment or
/// rotation tooling lives here — an operator supplies the bytes the
/// external identity-key generator produced.
fn load_identity(path: &Path) -> Result<VerifyingKey> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let array: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("identity key at {} is not 32 bytes", path.display()))?;
    VerifyingKey::from_bytes(&array).context("identity bytes are not a valid ed25519 public key")
}

fn permissive_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

fn scheduling_policy(policy: agentserver_config::ThreadScheduling) -> SchedulingPolicy {
    match policy {
        agentserver_config::ThreadScheduling::BreadthFirst => SchedulingPolicy::BreadthFirst,
        agentserver_config::ThreadScheduling::DepthFirst => SchedulingPolicy::DepthFirst,
    }
}

fn listener_record(listener: &ListenerConfig) -> ListenerRecord {
    ListenerRecord {
        name: listener.name.clone(),
        root_tag: listener.payload_type.clone(),
        kind: ListenerKind::Tool,
        description: listener.description.clone(),
        peers: BTreeSet::new(),
        token_share: None,
    }
}

fn agent_record(agent: &agentserver_config::AgentConfig) -> ListenerRecord {
    ListenerRecord {
        name: agent.name.clone(),
        root_tag: agent.name.clone(),
        kind: ListenerKind::Agent,
        description: format!("agent backed by {}", agent.system_prompt_path),
        peers: agent.peers.iter().cloned().collect(),
        token_share: Some(agent.token_share),
    }
}

/// Wraps a built-in [`Handler`] to record its duration and outcome into
/// [`DispatchMetrics`] without the dispatch crate itself taking a
/// telemetry dependency.
struct MeteredHandler {
    inner: Arc<dyn Handler>,
    metrics: Arc<DispatchMetrics>,
}

#[async_trait]
impl Handler for MeteredHandler {
    async fn handle(
        &self,
        payload: serde_json::Value,
        metadata: agentserver_dispatch::HandlerMetadata,
    ) -> anyhow::Result<Vec<u8>> {
        let start = Instant::now();
        let result = self.inner.handle(payload, metadata).await;
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let outcome = match &result {
            Ok(_) => DispatchOutcomeKind::Succeeded,
            Err(e) if is_throttle_signal(e) => DispatchOutcomeKind::Throttled,
            Err(_) => DispatchOutcomeKind::Failed,
        };
        self.metrics.record(elapsed_ms, outcome);
        result
    }
}

fn is_throttle_signal(err: &anyhow::Error) -> bool {
    let text = err.to_string().to_lowercase();
    text.contains("throttle") || text.contains("rate limit")
}

/// Resolve a configured listener's `handler` field against the built-in
/// tool registry. Unrecognized names are left unbound rather than
/// treated as a bootstrap failure — an operator can still fix the
/// config and hot-reload it.
fn built_in_handler(name: &str) -> Option<Arc<dyn Handler>> {
    match name {
        "calculator.add" => Some(Arc::new(Calculator::new(Operation::Add))),
        "calculator.subtract" => Some(Arc::new(Calculator::new(Operation::Subtract))),
        "calculator.multiply" => Some(Arc::new(Calculator::new(Operation::Multiply))),
        "calculator.divide" => Some(Arc::new(Calculator::new(Operation::Divide))),
        "echo" => Some(Arc::new(Echo)),
        _ => None,
    }
}

/// Spawn the pump loop and return its handle; the caller owns shutdown.
pub fn spawn_pump_loop(organism: &Organism) -> tokio::task::JoinHandle<()> {
    let pump = Arc::clone(&organism.pump);
    let paths = Arc::clone(&organism.paths);
    let router = Arc::clone(&organism.router);
    let metrics = Arc::clone(&organism.pump_metrics);
    tokio::spawn(async move {
        agentserver_transport::run_pump_loop(pump, paths, router, metrics, PUMP_TICK).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_identity(dir: &std::path::Path) -> std::path::PathBuf {
        let identity = agentserver_auth::generate_identity();
        let path = dir.join("identity.pub");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(identity.verifying_key().as_bytes()).unwrap();
        path
    }

    fn minimal_config(dir: &std::path::Path) -> std::path::PathBuf {
        let identity_path = write_identity(dir);
        let cert = dir.join("cert.pem");
        let key = dir.join("key.pem");
        std::fs::write(&cert, b"").unwrap();
        std::fs::write(&key, b"").unwrap();

        let yaml = format!(
            "organism:\n  name: test\n  identity: {}\n  port: 8443\n  totp_secret: shared-secret\n  tls:\n    cert_path: {}\n    key_path: {}\nlisteners:\n  - name: calculator.add\n    payload_type: add\n    handler: calculator.add\n    description: adds two numbers\n",
            identity_path.display(),
            cert.display(),
            key.display(),
        );
        let path = dir.join("organism.yaml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[tokio::test]
    async fn bootstraps_a_minimal_config_with_a_built_in_handler_bound() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = minimal_config(dir.path());
        let organism = bootstrap(&config_path).await.unwrap();
        assert_eq!(organism.registry.read().await.names(), vec!["calculator.add"]);
        assert!(organism.schemas.read().await.get("calculator.add").is_ok());
    }

    #[tokio::test]
    async fn unrecognized_handler_name_leaves_the_listener_registered_but_unbound() {
        let dir = tempfile::tempdir().unwrap();
        let identity_path = write_identity(dir.path());
        let yaml = format!(
            "organism:\n  name: test\n  identity: {}\n  port: 8443\n  totp_secret: shared-secret\n  tls:\n    cert_path: c\n    key_path: k\nlisteners:\n  - name: mystery\n    payload_type: mystery\n    handler: unknown-backend\n    description: not a built-in\n",
            identity_path.display(),
        );
        let config_path = dir.path().join("organism.yaml");
        std::fs::write(&config_path, yaml).unwrap();
        let organism = bootstrap(&config_path).await.unwrap();
        assert_eq!(organism.registry.read().await.names(), vec!["mystery"]);
    }

    #[tokio::test]
    async fn oob_handler_is_none_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = minimal_config(dir.path());
        let organism = bootstrap(&config_path).await.unwrap();
        assert!(oob_handler(&organism).is_none());
    }
}

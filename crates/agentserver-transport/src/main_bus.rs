// SPDX-License-Identifier: MIT OR Apache-2.0
//! Main bus ingress (§4, §6): a WSS endpoint clients authenticate to
//! with a TOTP code, then exchange envelope messages over for the
//! lifetime of the connection. Each connection owns one root thread;
//! the pump's egress is routed back to it by [`crate::egress::EgressRouter`].

use crate::egress::EgressRouter;
use agentserver_auth::TotpVerifier;
use agentserver_core::{ListenerKind, ListenerRecord, ThreadId};
use agentserver_error::{ErrorCode, SecurityEvent};
use agentserver_path::PathRegistry;
use agentserver_pipeline::{default_pipeline, run_system_pipeline, system_pipeline};
use agentserver_pump::Pump;
use agentserver_registry::ListenerRegistry;
use agentserver_xml::SchemaStore;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, RwLock};

/// Root tags reserved for OOB commands (§4.8). A message bearing one of
/// these on the main bus never reaches routing resolution — it is
/// logged as a security event and bounced straight to `<huh>`.
const PRIVILEGED_ROOT_TAGS: &[&str] =
    &["add-listener", "remove-listener", "hot-reload", "introspect", "shutdown"];

/// Shared state behind the main bus router.
pub struct MainBusState {
    pub pump: Arc<Pump>,
    pub registry: Arc<RwLock<ListenerRegistry>>,
    pub schemas: Arc<RwLock<SchemaStore>>,
    pub paths: Arc<RwLock<PathRegistry>>,
    pub router: Arc<EgressRouter>,
    pub totp: Arc<TotpVerifier>,
}

/// The main bus's single WebSocket route.
pub fn main_bus_router(state: Arc<MainBusState>) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(state)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<MainBusState>>,
) -> impl IntoResponse {
    let code = params.get("totp").and_then(|c| c.parse::<u32>().ok());
    let Some(code) = code else {
        SecurityEvent::log(ErrorCode::SignatureInvalid, "main bus connect missing totp code", None);
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if !state.totp.verify(code, unix_now()) {
        SecurityEvent::log(ErrorCode::SignatureInvalid, "main bus connect totp rejected", None);
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state)).into_response()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn client_sender(root: ThreadId) -> ListenerRecord {
    ListenerRecord {
        name: format!("client:{root}"),
        root_tag: String::new(),
        kind: ListenerKind::Tool,
        description: "main bus client connection".to_string(),
        peers: BTreeSet::new(),
        token_share: None,
    }
}

async fn handle_socket(mut socket: WebSocket, state: Arc<MainBusState>) {
    let root = state.paths.write().await.new_root("main-bus-client");
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    state.router.register(root, tx).await;

    if socket
        .send(Message::Text(format!("<hello><thread>{root}</thread></hello>").into()))
        .await
        .is_err()
    {
        state.router.deregister(root).await;
        return;
    }

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(bytes) = outgoing else { break };
                if socket.send(Message::Binary(bytes.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Binary(bytes))) => ingest(&state, root, bytes.to_vec()).await,
                    Some(Ok(Message::Text(text))) => ingest(&state, root, text.as_bytes().to_vec()).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.router.deregister(root).await;
    // No further messages can arrive on a closed socket and any
    // in-flight dispatches hold their own delegation-child thread, not
    // `root` — so `root` goes straight to terminal (§4.10) and its
    // path registry entry and listener-scoped storage are released.
    let mut paths = state.paths.write().await;
    if paths.mark_terminal(root).is_ok() {
        let _ = paths.prune(root);
    }
}

/// Run one inbound frame through routing resolution. Privileged shapes
/// are rejected before they ever reach the registry; anything else that
/// fails resolution is reduced to `<huh>` by the system pipeline rather
/// than silently dropped.
async fn ingest(state: &Arc<MainBusState>, root: ThreadId, bytes: Vec<u8>) {
    let sender = client_sender(root);

    if let Ok(tree) = agentserver_xml::repair_parse(&bytes) {
        if let Ok(envelope) = agentserver_xml::envelope::tree_to_envelope(&tree) {
            if PRIVILEGED_ROOT_TAGS.contains(&envelope.payload.root_tag.as_str()) {
                SecurityEvent::log(
                    ErrorCode::PrivilegedLeak,
                    format!(
                        "privileged shape '{}' arrived on main bus",
                        envelope.payload.root_tag
                    ),
                    Some(root.to_string()),
                );
                reduce_to_huh_and_deliver(state, sender, agentserver_core::MessageState::from_bytes(bytes)).await;
                return;
            }
        }
    }

    let mut msg = agentserver_core::MessageState::from_bytes(bytes);
    let pipeline = default_pipeline(sender.clone(), Arc::clone(&state.registry), Arc::clone(&state.schemas));
    pipeline.execute(&mut msg).await;

    if msg.has_failed() {
        reduce_to_huh_and_deliver(state, sender, msg).await;
        return;
    }

    state.pump.enqueue(msg).await;
}

async fn reduce_to_huh_and_deliver(
    state: &Arc<MainBusState>,
    sender: ListenerRecord,
    mut msg: agentserver_core::MessageState,
) {
    let pipeline = system_pipeline(sender, Arc::clone(&state.registry));
    run_system_pipeline(&pipeline, &mut msg).await;
    let paths = state.paths.read().await;
    state.router.deliver(&paths, msg).await;
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! OOB channel transport (§4.8): a loopback-bound WSS endpoint distinct
//! from the main bus. Every frame must carry a valid Ed25519 signature
//! over its envelope bytes before [`agentserver_oob::OobHandler`] ever
//! sees the command inside.

use agentserver_error::{ErrorCode, SecurityEvent};
use agentserver_oob::{parse_command, OobError, OobHandler, OobOutcome};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use ed25519_dalek::VerifyingKey;
use std::sync::Arc;

/// Shared state behind the OOB router.
pub struct OobState {
    pub handler: OobHandler,
    pub identity: VerifyingKey,
}

/// The OOB channel's single WebSocket route. Callers are responsible
/// for binding this router's listener to loopback or a local socket
/// (§4.8) — this module only defines the route.
pub fn oob_router(state: Arc<OobState>) -> Router {
    Router::new().route("/oob", get(upgrade)).with_state(state)
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<OobState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<OobState>) {
    while let Some(Ok(message)) = socket.recv().await {
        let frame = match message {
            Message::Binary(bytes) => bytes.to_vec(),
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Close(_) => break,
            _ => continue,
        };

        let reply = match parse_command(&frame, &state.identity) {
            Ok(command) => match state.handler.apply(command).await {
                Ok(OobOutcome::Applied) => "<ack/>".to_string(),
                Ok(OobOutcome::Listeners(names)) => {
                    format!("<listeners>{}</listeners>", names.join(","))
                }
                Ok(OobOutcome::ShuttingDown) => "<ack/>".to_string(),
                Err(e) => format!("<fault>{e}</fault>"),
            },
            Err(e @ OobError::SignatureInvalid(_)) => {
                SecurityEvent::log(ErrorCode::SignatureInvalid, e.to_string(), None);
                format!("<fault>{e}</fault>")
            }
            Err(e) => format!("<fault>{e}</fault>"),
        };

        if socket.send(Message::Text(reply.into())).await.is_err() {
            break;
        }
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Routes terminal payloads drained from the [`agentserver_pump::Pump`]
//! back to the client connection whose root thread produced them.

use agentserver_core::{MessageState, ThreadId};
use agentserver_path::PathRegistry;
use agentserver_pump::Pump;
use agentserver_telemetry::PumpMetrics;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Tracks one outbound channel per open main-bus connection, keyed by
/// the root thread id that connection's ingress created.
#[derive(Default)]
pub struct EgressRouter {
    routes: RwLock<HashMap<ThreadId, mpsc::UnboundedSender<Vec<u8>>>>,
}

impl EgressRouter {
    /// An empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound channel under its root thread id.
    pub async fn register(&self, root: ThreadId, tx: mpsc::UnboundedSender<Vec<u8>>) {
        self.routes.write().await.insert(root, tx);
    }

    /// Drop a connection's route once it disconnects.
    pub async fn deregister(&self, root: ThreadId) {
        self.routes.write().await.remove(&root);
    }

    /// Deliver one egressed state to the connection owning its root
    /// thread. Silently dropped if that connection has since closed —
    /// egress delivery is best-effort, matching the bus's at-most-once
    /// framing.
    pub async fn deliver(&self, paths: &PathRegistry, state: MessageState) {
        let Some(thread_id) = state.thread_id else {
            return;
        };
        let root = paths.root_of(thread_id);
        let routes = self.routes.read().await;
        if let Some(tx) = routes.get(&root) {
            let _ = tx.send(state.raw_bytes);
        }
    }
}

/// Drive the pump forever, ticking `run_once` every `interval`, recording
/// each round's outcome into `metrics`, and routing that iteration's
/// egress to its owning connection. Intended to be spawned once at
/// bootstrap.
pub async fn run_pump_loop(
    pump: Arc<Pump>,
    paths: Arc<RwLock<PathRegistry>>,
    router: Arc<EgressRouter>,
    metrics: Arc<PumpMetrics>,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let report = pump.run_once().await;
        metrics.record_round(report.admitted, report.starved_buckets, report.egressed);
        if report.admitted == 0 && report.egressed == 0 {
            continue;
        }
        let paths = paths.read().await;
        for state in pump.drain_egress().await {
            router.deliver(&paths, state).await;
        }
    }
}

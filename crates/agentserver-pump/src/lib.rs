// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Message Pump (§4.6): the long-running cooperative loop that drains
//! per-listener output buffers under weighted deficit round-robin,
//! admits messages against per-agent and global token budgets, fans
//! dispatch out to a concurrency-capped worker pool, and re-enqueues
//! post-processed responses. Token budgets are tracked per agent plus a
//! shared global pool (see [`budget`]).

pub mod budget;

use agentserver_core::{ListenerKind, ListenerRecord, MessageState, ThreadId};
use agentserver_dispatch::{DispatchOutcome, Dispatcher};
use agentserver_path::PathRegistry;
use agentserver_pipeline::{default_pipeline, run_system_pipeline, stages::HuhStage, system_pipeline, PipelineStage};
use agentserver_registry::ListenerRegistry;
use agentserver_xml::SchemaStore;
use budget::{bucket_key, AgentBudget, BudgetBook, GlobalBudget};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;

/// Defaults a newly-seen bucket's local budget starts at, absent an
/// explicit `token_share` on its agent's [`ListenerRecord`].
const DEFAULT_INITIAL_TOKENS: u64 = 10_000;
const DEFAULT_FLOOR_TOKENS: u64 = 1_000;
const DEFAULT_CEILING_TOKENS: u64 = 100_000;

/// Traversal order within a bucket's queue. Breadth-first drains the
/// oldest-enqueued message first (messages from a thread's earlier
/// turns before its children's replies); depth-first drains the
/// most-recently-enqueued message first (a child's reply before its
/// older siblings).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// Default: oldest message in a bucket first.
    BreadthFirst,
    /// Newest message in a bucket first.
    DepthFirst,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self::BreadthFirst
    }
}

/// Summary of one [`Pump::run_once`] iteration, for telemetry and tests.
#[derive(Debug, Default, Clone)]
pub struct PumpReport {
    /// Messages admitted and dispatched this iteration.
    pub admitted: usize,
    /// Messages skipped because no bucket had budget for its smallest
    /// queued message.
    pub starved_buckets: usize,
    /// Responses that had nowhere left to route and were queued for
    /// client egress.
    pub egressed: usize,
}

/// The cooperative scheduling loop over a fixed dispatcher and registry.
pub struct Pump {
    registry: Arc<RwLock<ListenerRegistry>>,
    schemas: Arc<RwLock<SchemaStore>>,
    dispatcher: Arc<Dispatcher>,
    paths: Arc<RwLock<PathRegistry>>,
    queues: Mutex<HashMap<String, VecDeque<MessageState>>>,
    budgets: Mutex<BudgetBook>,
    global: GlobalBudget,
    concurrency: Arc<Semaphore>,
    policy: SchedulingPolicy,
    egress: Mutex<Vec<MessageState>>,
}

impl Pump {
    /// Build a pump over shared registry/schema/path state, with a
    /// concurrency cap and global token pool.
    #[must_use]
    pub fn new(
        registry: Arc<RwLock<ListenerRegistry>>,
        schemas: Arc<RwLock<SchemaStore>>,
        dispatcher: Arc<Dispatcher>,
        paths: Arc<RwLock<PathRegistry>>,
        concurrency_cap: usize,
        global_tokens_per_minute: u64,
        policy: SchedulingPolicy,
    ) -> Self {
        Self {
            registry,
            schemas,
            dispatcher,
            paths,
            queues: Mutex::new(HashMap::new()),
            budgets: Mutex::new(HashMap::new()),
            global: GlobalBudget::new(global_tokens_per_minute),
            concurrency: Arc::new(Semaphore::new(concurrency_cap.max(1))),
            policy,
            egress: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue an already-routed message (post `resolve-routing`) into
    /// the bucket of each of its resolved targets. Unknown targets are
    /// dropped silently — routing resolution is responsible for
    /// rejecting those before they ever reach the pump.
    pub async fn enqueue(&self, state: MessageState) {
        let registry = self.registry.read().await;
        for target in &state.targets {
            let Some(record) = registry.lookup_by_name(target) else {
                continue;
            };
            let key = bucket_key(record);
            let mut per_target = state.clone();
            per_target.targets = vec![target.clone()];

            self.queues
                .lock()
                .await
                .entry(key.clone())
                .or_default()
                .push_back(per_target);

            self.budgets.lock().await.entry(key).or_insert_with(|| {
                let ceiling = record
                    .token_share
                    .map(u64::from)
                    .unwrap_or(DEFAULT_CEILING_TOKENS);
                AgentBudget::new(
                    ceiling.min(DEFAULT_INITIAL_TOKENS).max(DEFAULT_FLOOR_TOKENS),
                    DEFAULT_FLOOR_TOKENS.min(ceiling),
                    ceiling,
                )
            });
        }
    }

    /// Drain admission-ready messages from every bucket under weighted
    /// deficit round-robin (§4.6 steps 1-2).
    async fn admit(&self) -> (Vec<MessageState>, usize) {
        let mut queues = self.queues.lock().await;
        let mut budgets = self.budgets.lock().await;
        let mut ready = Vec::new();
        let mut starved = 0usize;

        let mut keys: Vec<String> = queues.keys().cloned().collect();
        keys.sort();

        for key in keys {
            let Some(queue) = queues.get_mut(&key) else {
                continue;
            };
            let Some(budget) = budgets.get_mut(&key) else {
                continue;
            };
            budget.accrue();

            loop {
                let Some(cost) = queue.front().map(|m| m.estimated_tokens.unwrap_or(1)) else {
                    break;
                };
                if cost > budget.deficit || !self.global.try_admit(cost) {
                    starved += 1;
                    break;
                }
                budget.deficit -= cost;
                let message = match self.policy {
                    SchedulingPolicy::BreadthFirst => queue.pop_front(),
                    SchedulingPolicy::DepthFirst => queue.pop_back(),
                };
                if let Some(message) = message {
                    ready.push(message);
                }
            }
        }
        (ready, starved)
    }

    /// Run one iteration: admit, dispatch concurrently up to the
    /// semaphore cap, consume responses in completion order,
    /// post-process, and re-enqueue or egress (§4.6 steps 3-6).
    pub async fn run_once(&self) -> PumpReport {
        let (ready, starved_buckets) = self.admit().await;
        let admitted = ready.len();
        let mut egressed = 0usize;

        // Each admitted message gets its own concurrency permit, held for
        // the lifetime of its dispatch (including the handler call), not
        // just the spawn — this is the global concurrency cap (§4.6 step 3).
        let mut wrappers = JoinSet::new();
        for state in ready {
            let semaphore = Arc::clone(&self.concurrency);
            let dispatcher = Arc::clone(&self.dispatcher);
            let registry = Arc::clone(&self.registry);
            let paths = Arc::clone(&self.paths);
            wrappers.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("pump semaphore closed");
                let registry = registry.read().await;
                let handles = dispatcher.dispatch(&state, &registry, &paths).await;
                drop(registry);
                let mut outcomes = Vec::with_capacity(handles.len());
                for handle in handles {
                    if let Ok(outcome) = handle.await {
                        outcomes.push(outcome);
                    }
                }
                outcomes
            });
        }

        // `JoinSet::join_next` resolves whichever spawned wrapper finishes
        // first, not admission order — a fast handler's response is
        // post-processed and re-enqueued before a slower one even if it
        // was admitted later (§4.6 step 4).
        while let Some(result) = wrappers.join_next().await {
            let Ok(outcomes) = result else {
                continue;
            };
            for outcome in outcomes {
                self.record_outcome(&outcome).await;
                egressed += self.postprocess_and_requeue(&outcome).await;
            }
        }

        tracing::debug!(admitted, starved_buckets, egressed, "pump iteration complete");
        PumpReport {
            admitted,
            starved_buckets,
            egressed,
        }
    }

    /// AIMD feedback (§4.6 step 5): a throttle signal in the handler's
    /// failure reason halves the bucket's local budget; any other
    /// outcome nudges it up.
    async fn record_outcome(&self, outcome: &DispatchOutcome) {
        let registry = self.registry.read().await;
        let Some(record) = registry.lookup_by_name(&outcome.context.executing_listener) else {
            return;
        };
        let key = bucket_key(record);
        drop(registry);

        let throttled = matches!(
            &outcome.raw_bytes,
            Err(e) if e.to_string().to_lowercase().contains("rate limit")
                || e.to_string().to_lowercase().contains("throttle")
        );

        let mut budgets = self.budgets.lock().await;
        if let Some(budget) = budgets.get_mut(&key) {
            if throttled {
                tracing::warn!(bucket = %key, "backend throttled, halving local budget");
                budget.record_throttle();
            } else {
                budget.record_success();
            }
        }
    }

    async fn postprocess_and_requeue(&self, outcome: &DispatchOutcome) -> usize {
        let responses = agentserver_postprocess::postprocess(outcome);
        // Every response shares the same truncated thread (§4.7) that
        // `agentserver_postprocess` bound its envelope to, regardless of
        // how many child payloads the handler emitted.
        let response_thread = outcome
            .context
            .parent_thread_id
            .unwrap_or(outcome.context.thread_id);
        let mut egressed = 0usize;
        for mut response in responses {
            egressed += self
                .route_or_egress(&mut response, &outcome.context.executing_listener, response_thread)
                .await;
        }
        // The one-shot delegation child this dispatch ran under (§4.7) is
        // done once its responses are built — truncate the path by
        // pruning it, releasing its entry (it carries no storage/history
        // of its own; both are kept against the stable conversation
        // thread, see `agentserver_dispatch::Dispatcher::dispatch`).
        let _ = self.paths.write().await.prune(outcome.context.thread_id);
        egressed
    }

    /// Decide where a freshly post-processed response goes next. A
    /// response whose thread has already been truncated back to a root
    /// (§4.7) has reached the original external client — the path
    /// registry, not routing resolution, is what detects this (§4.6
    /// step 6) — so it egresses as-is. Otherwise it is run through the
    /// producing listener's own per-listener pipeline to resolve the
    /// next hop, the same way a client-originated message is. Returns
    /// `1` if the response was egressed.
    ///
    /// A response that can't be routed onward — no sender record, or
    /// the pipeline itself failed — is reduced to a `<huh>` diagnostic
    /// before it reaches the client, the same way main-bus ingress
    /// failures are (`agentserver_transport::main_bus`).
    async fn route_or_egress(
        &self,
        state: &mut MessageState,
        executing_listener: &str,
        response_thread: ThreadId,
    ) -> usize {
        if self.paths.read().await.parent_of(response_thread).is_none() {
            self.egress.lock().await.push(state.clone());
            return 1;
        }

        let sender: Option<ListenerRecord> = {
            let registry = self.registry.read().await;
            registry.lookup_by_name(executing_listener).cloned()
        };
        let Some(sender) = sender else {
            state
                .diagnostic
                .get_or_insert_with(|| format!("no listener record for '{executing_listener}'"));
            let system_sender = ListenerRecord {
                name: "core".to_string(),
                root_tag: String::new(),
                kind: ListenerKind::Tool,
                description: "system pipeline".to_string(),
                peers: Default::default(),
                token_share: None,
            };
            let pipeline = system_pipeline(system_sender, Arc::clone(&self.registry));
            run_system_pipeline(&pipeline, state).await;
            self.egress.lock().await.push(state.clone());
            return 1;
        };

        let pipeline = default_pipeline(sender, Arc::clone(&self.registry), Arc::clone(&self.schemas));
        pipeline.execute(state).await;

        if state.has_failed() {
            let _ = HuhStage.process(state).await;
            self.egress.lock().await.push(state.clone());
            1
        } else if state.targets.is_empty() {
            self.egress.lock().await.push(state.clone());
            1
        } else {
            self.enqueue(state.clone()).await;
            0
        }
    }

    /// Drain and return every response currently queued for client
    /// egress (terminal payloads and undeliverable diagnostics).
    pub async fn drain_egress(&self) -> Vec<MessageState> {
        std::mem::take(&mut *self.egress.lock().await)
    }

    /// Snapshot of each bucket's current queue depth, for telemetry.
    pub async fn queue_depths(&self) -> HashMap<String, usize> {
        self.queues
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect()
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lock-free per-dispatch metrics: atomic counters plus a running
//! average duration, split across the message plane's three dispatch
//! outcomes (succeeded / failed / throttled).

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// How one dispatch ended, for metrics purposes only — this is a
/// coarser view than `agentserver_dispatch::DispatchOutcome`, which
/// this crate deliberately does not depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcomeKind {
    Succeeded,
    Failed,
    Throttled,
}

/// Atomic dispatch-level counters, safe to share across the pump's
/// spawned wrapper tasks.
pub struct DispatchMetrics {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    throttled: AtomicU64,
    cumulative_duration_ms: AtomicU64,
    average_duration_ms: AtomicU64,
}

impl DispatchMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            cumulative_duration_ms: AtomicU64::new(0),
            average_duration_ms: AtomicU64::new(0),
        }
    }

    /// Record the outcome of one dispatch.
    pub fn record(&self, duration_ms: u64, outcome: DispatchOutcomeKind) {
        let total = self.total.fetch_add(1, Relaxed) + 1;
        match outcome {
            DispatchOutcomeKind::Succeeded => self.succeeded.fetch_add(1, Relaxed),
            DispatchOutcomeKind::Failed => self.failed.fetch_add(1, Relaxed),
            DispatchOutcomeKind::Throttled => self.throttled.fetch_add(1, Relaxed),
        };
        let cumulative = self.cumulative_duration_ms.fetch_add(duration_ms, Relaxed) + duration_ms;
        self.average_duration_ms.store(cumulative / total, Relaxed);
    }

    /// Point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            total: self.total.load(Relaxed),
            succeeded: self.succeeded.load(Relaxed),
            failed: self.failed.load(Relaxed),
            throttled: self.throttled.load(Relaxed),
            average_duration_ms: self.average_duration_ms.load(Relaxed),
        }
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of [`DispatchMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct DispatchSnapshot {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub throttled: u64,
    pub average_duration_ms: u64,
}

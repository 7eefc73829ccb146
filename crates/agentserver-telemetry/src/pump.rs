// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lock-free per-round pump metrics (§4.6): how many messages were
//! admitted, how many buckets went a round without admitting anything
//! (an AIMD or starvation signal worth alerting on), and how many
//! terminal payloads were egressed to clients.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Atomic pump-round counters.
pub struct PumpMetrics {
    rounds: AtomicU64,
    admitted: AtomicU64,
    starved_rounds: AtomicU64,
    egressed: AtomicU64,
}

impl PumpMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rounds: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            starved_rounds: AtomicU64::new(0),
            egressed: AtomicU64::new(0),
        }
    }

    /// Record one pump round. `starved_buckets` is the number of
    /// buckets that had queued work but no deficit to spend this round;
    /// any non-zero value counts the round itself as starved.
    pub fn record_round(&self, admitted: usize, starved_buckets: usize, egressed: usize) {
        self.rounds.fetch_add(1, Relaxed);
        self.admitted.fetch_add(admitted as u64, Relaxed);
        self.egressed.fetch_add(egressed as u64, Relaxed);
        if starved_buckets > 0 {
            self.starved_rounds.fetch_add(1, Relaxed);
        }
    }

    /// Point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> PumpSnapshot {
        PumpSnapshot {
            rounds: self.rounds.load(Relaxed),
            admitted: self.admitted.load(Relaxed),
            starved_rounds: self.starved_rounds.load(Relaxed),
            egressed: self.egressed.load(Relaxed),
        }
    }
}

impl Default for PumpMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of [`PumpMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct PumpSnapshot {
    pub rounds: u64,
    pub admitted: u64,
    pub starved_rounds: u64,
    pub egressed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_round_with_a_starved_bucket_counts_as_one_starved_round() {
        let metrics = PumpMetrics::new();
        metrics.record_round(3, 1, 2);
        metrics.record_round(5, 0, 5);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rounds, 2);
        assert_eq!(snapshot.admitted, 8);
        assert_eq!(snapshot.starved_rounds, 1);
        assert_eq!(snapshot.egressed, 7);
    }
}

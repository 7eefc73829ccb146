// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Structured metrics for the dispatcher and message pump: lock-free
//! atomic counters with a running-average duration.

pub mod dispatch;
pub mod pump;

pub use dispatch::{DispatchMetrics, DispatchOutcomeKind, DispatchSnapshot};
pub use pump::{PumpMetrics, PumpSnapshot};

// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Example local tool listeners demonstrating the `tool` listener kind
//! (§3) against the [`agentserver_dispatch::Handler`] trait: a small
//! arithmetic calculator and an echo.

pub mod calculator;
pub mod echo;

pub use calculator::{Calculator, Operation};
pub use echo::Echo;

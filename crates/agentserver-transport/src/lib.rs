// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! WSS ingress/egress for the main bus and the OOB channel (§6), plus
//! TLS 1.3 setup. Wires the message plane (`agentserver-pump`,
//! `agentserver-pipeline`) and the privileged control plane
//! (`agentserver-oob`) onto axum `Router`s; binding sockets and
//! graceful shutdown are bootstrap concerns owned by the daemon binary.

pub mod egress;
pub mod main_bus;
pub mod oob;
pub mod tls;

pub use egress::{run_pump_loop, EgressRouter};
pub use main_bus::{main_bus_router, MainBusState};
pub use oob::{oob_router, OobState};
pub use tls::{server_config, TlsError};

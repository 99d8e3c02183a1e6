// SPDX-License-Identifier: BSD-3-Clause

//! The upstream multicast manager: the sender supervisor and configuration
//! façade built on top of the subnet pool, authorizer, shared sender
//! registry and client-address RPC service.

pub mod config;
pub mod entry;
pub mod manager;
pub mod reaper;
pub mod spawn;
pub mod vc;

pub use entry::{SenderEntry, VcEndpoint};
pub use manager::UpstreamManager;
pub use reaper::Reaper;

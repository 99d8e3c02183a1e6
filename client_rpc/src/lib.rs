// SPDX-License-Identifier: BSD-3-Clause

//! The loopback client-address RPC service.

pub mod client;
pub mod secret;
pub mod server;
pub mod wire;

pub use client::RpcClient;
pub use server::RpcServer;

// Copyright (C) 2025 The Forkscope contributors
// SPDX-License-Identifier: AGPL-3.0
//! Forkscope Forkd - Fork lifecycle management
//!
//! Maintains a bounded pool of local ports, supervises `anvil` child
//! processes bound to them, hands out opaque fork ids with auto-expiring
//! leases, and forwards raw JSON-RPC traffic to the right process. The
//! typed RPC client built on top wraps the JSON-RPC methods the rest of
//! Forkscope needs.

mod error;
pub mod manager;
pub mod registry;
pub mod rpc;
pub mod supervisor;

pub use error::ForkError;
pub use manager::ForkManager;
pub use registry::PortRegistry;
pub use rpc::ForkRpcClient;
pub use supervisor::{AnvilSupervisor, NodeSupervisor};

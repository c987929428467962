// Forkscope - EVM Transaction Debugger
// Copyright (C) 2025 The Forkscope contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Fork management error taxonomy.

use thiserror::Error;

/// Errors produced by the fork pool and the typed RPC client.
#[derive(Debug, Error)]
pub enum ForkError {
    /// Every port in the pool is already leased out.
    #[error("no available port")]
    NoPortAvailable,

    /// No registry row carries the given fork id.
    #[error("no fork with id {0}")]
    ForkNotFound(String),

    /// The fork id resolves to a released (inactive) port.
    #[error("fork is inactive: {0}")]
    ForkInactive(String),

    /// The supervisor holds no child process for the port.
    #[error("no child process on port {0}")]
    PortUnknown(u16),

    /// Spawning or killing the fork child process failed.
    #[error("fork process error: {0}")]
    Process(#[from] std::io::Error),

    /// The fork did not answer `eth_blockNumber` within the readiness window.
    #[error("fork {0} did not become ready in time")]
    NotReady(String),

    /// Transport failure talking to a fork.
    #[error("upstream RPC failure: {0}")]
    Upstream(#[from] reqwest::Error),

    /// The fork answered with a body we could not decode.
    #[error("failed to decode RPC response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The fork answered with a JSON-RPC error object.
    #[error("RPC error from fork: {0}")]
    Rpc(String),
}

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

//! Child-process supervision for local fork nodes.

use crate::ForkError;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    process::{Child, Command, Stdio},
};
use tracing::{info, warn};

/// Starts and stops fork node processes bound to local ports.
///
/// The supervisor does not probe readiness; callers poll the node's RPC
/// before issuing real traffic.
pub trait NodeSupervisor: Send + Sync {
    /// Spawns a fork of `upstream_rpc_url` listening on `port`, optionally
    /// pinned to `block_number`.
    fn start(
        &self,
        port: u16,
        upstream_rpc_url: &str,
        block_number: Option<u64>,
    ) -> Result<(), ForkError>;

    /// Kills the process bound to `port`. Unknown ports are an error.
    fn stop(&self, port: u16) -> Result<(), ForkError>;
}

/// [`NodeSupervisor`] backed by `anvil` child processes.
#[derive(Debug, Default)]
pub struct AnvilSupervisor {
    children: Mutex<HashMap<u16, Child>>,
}

impl AnvilSupervisor {
    /// New supervisor with no children.
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeSupervisor for AnvilSupervisor {
    fn start(
        &self,
        port: u16,
        upstream_rpc_url: &str,
        block_number: Option<u64>,
    ) -> Result<(), ForkError> {
        let mut cmd = Command::new("anvil");
        cmd.arg("--steps-tracing")
            .arg("--port")
            .arg(port.to_string())
            .arg("--host")
            .arg("0.0.0.0")
            .arg("--fork-url")
            .arg(upstream_rpc_url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if let Some(block) = block_number {
            cmd.arg("--fork-block-number").arg(block.to_string());
        }

        let child = cmd.spawn()?;
        info!("Spawned anvil on port {port} (pid {})", child.id());

        if let Some(mut old) = self.children.lock().insert(port, child) {
            // A stale handle here means a previous stop never ran.
            warn!("Replacing existing anvil handle on port {port}");
            let _ = old.kill();
        }

        Ok(())
    }

    fn stop(&self, port: u16) -> Result<(), ForkError> {
        let mut child =
            self.children.lock().remove(&port).ok_or(ForkError::PortUnknown(port))?;

        child.kill()?;
        child.wait()?;
        info!("Stopped anvil on port {port}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_on_unknown_port_is_an_error() {
        let supervisor = AnvilSupervisor::new();
        assert!(matches!(supervisor.stop(65000), Err(ForkError::PortUnknown(65000))));
    }
}

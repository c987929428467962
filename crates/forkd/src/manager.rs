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

//! Fork lifecycle manager.
//!
//! Composes the port registry and the node supervisor: allocates a port,
//! spawns a fork process on it, schedules lease expiry, and forwards raw
//! JSON-RPC bodies to the right process.

use crate::{registry::PortRegistry, ForkError, NodeSupervisor};
use reqwest::StatusCode;
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{info, warn};

// Readiness polling: exponential back-off from 100ms, capped per-step and
// overall. Replaces fixed post-spawn sleeps.
const READY_INITIAL_DELAY: Duration = Duration::from_millis(100);
const READY_MAX_DELAY: Duration = Duration::from_millis(1600);
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Manages the pool of local fork nodes.
pub struct ForkManager {
    registry: PortRegistry,
    supervisor: Arc<dyn NodeSupervisor>,
    upstream_rpc_url: String,
    fork_block_number: Option<u64>,
    client: reqwest::Client,
}

impl ForkManager {
    /// New manager forking `upstream_rpc_url`, optionally pinned to
    /// `fork_block_number`.
    pub fn new(
        supervisor: Arc<dyn NodeSupervisor>,
        upstream_rpc_url: impl Into<String>,
        fork_block_number: Option<u64>,
    ) -> Result<Self, ForkError> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(60)).build()?;

        Ok(Self {
            registry: PortRegistry::new(),
            supervisor,
            upstream_rpc_url: upstream_rpc_url.into(),
            fork_block_number,
            client,
        })
    }

    /// Seeds the port pool.
    pub fn allocate_ports(&self, ports: &[u16]) {
        self.registry.allocate_ports(ports);
    }

    /// Number of live fork leases.
    pub fn active_forks(&self) -> usize {
        self.registry.active_count()
    }

    /// Creates a fork and returns its lease id.
    ///
    /// Reserves a port, spawns the fork process, and schedules a deferred
    /// delete after `lease`. On spawn failure the port is released and the
    /// spawn error surfaces.
    pub fn create_fork(self: &Arc<Self>, lease: Duration) -> Result<String, ForkError> {
        let (port, fork_id) = self.registry.reserve()?;

        if let Err(spawn_err) =
            self.supervisor.start(port, &self.upstream_rpc_url, self.fork_block_number)
        {
            warn!("Fork creation failed: {spawn_err}");
            if let Err(release_err) = self.registry.release(&fork_id) {
                warn!("Failed releasing reserved port: {release_err}");
            }
            return Err(spawn_err);
        }

        // Lease expiry is best-effort: a fork already deleted by hand makes
        // this delete fail, which is logged and ignored.
        let manager = Arc::clone(self);
        let expiring_fork_id = fork_id.clone();
        tokio::spawn(async move {
            sleep(lease).await;
            if let Err(e) = manager.delete_fork(&expiring_fork_id) {
                warn!("Lease expiry for fork {expiring_fork_id}: {e}");
            }
        });

        info!("Created fork with id: {fork_id}");
        Ok(fork_id)
    }

    /// Stops the fork's process and releases its port.
    pub fn delete_fork(&self, fork_id: &str) -> Result<(), ForkError> {
        let port = self.registry.port_of(fork_id)?;

        if !self.registry.is_active(fork_id)? {
            warn!("Fork {fork_id} is not active!");
            return Err(ForkError::ForkInactive(fork_id.to_string()));
        }

        self.supervisor.stop(port)?;
        self.registry.release(fork_id)?;

        info!("Deleted fork with id: {fork_id}");
        Ok(())
    }

    /// Forwards a raw JSON-RPC body to the fork and returns the upstream
    /// status and body unchanged.
    pub async fn forward_rpc(
        &self,
        fork_id: &str,
        raw_body: Vec<u8>,
    ) -> Result<(StatusCode, Vec<u8>), ForkError> {
        let port = self.registry.port_of(fork_id)?;

        if !self.registry.is_active(fork_id)? {
            return Err(ForkError::ForkInactive(fork_id.to_string()));
        }

        let response = self
            .client
            .post(format!("http://0.0.0.0:{port}"))
            .header("Content-Type", "application/json")
            .body(raw_body)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?.to_vec();
        Ok((status, body))
    }

    /// Polls `eth_blockNumber` until the fork answers, with exponential
    /// back-off up to a ceiling.
    pub async fn wait_until_ready(&self, fork_id: &str) -> Result<(), ForkError> {
        let probe = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_blockNumber",
            "params": [],
        });
        let body = serde_json::to_vec(&probe)?;

        let started = tokio::time::Instant::now();
        let mut delay = READY_INITIAL_DELAY;

        loop {
            match self.forward_rpc(fork_id, body.clone()).await {
                Ok((status, response)) if status.is_success() => {
                    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&response) {
                        if value.get("result").is_some() {
                            return Ok(());
                        }
                    }
                }
                Ok(_) => {}
                // Inactive forks will never come up; connection errors may.
                Err(e @ (ForkError::ForkNotFound(_) | ForkError::ForkInactive(_))) => {
                    return Err(e);
                }
                Err(_) => {}
            }

            if started.elapsed() >= READY_TIMEOUT {
                return Err(ForkError::NotReady(fork_id.to_string()));
            }

            sleep(delay).await;
            delay = (delay * 2).min(READY_MAX_DELAY);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::method,
        Mock, MockServer, ResponseTemplate,
    };

    /// Supervisor stub that never spawns anything.
    #[derive(Default)]
    struct StubSupervisor;

    impl NodeSupervisor for StubSupervisor {
        fn start(&self, _: u16, _: &str, _: Option<u64>) -> Result<(), ForkError> {
            Ok(())
        }
        fn stop(&self, _: u16) -> Result<(), ForkError> {
            Ok(())
        }
    }

    /// Supervisor stub whose spawns always fail.
    struct FailingSupervisor;

    impl NodeSupervisor for FailingSupervisor {
        fn start(&self, _: u16, _: &str, _: Option<u64>) -> Result<(), ForkError> {
            Err(ForkError::Process(std::io::Error::other("anvil not found")))
        }
        fn stop(&self, _: u16) -> Result<(), ForkError> {
            Ok(())
        }
    }

    fn manager_with_ports(ports: &[u16]) -> Arc<ForkManager> {
        let manager = Arc::new(
            ForkManager::new(Arc::new(StubSupervisor), "http://upstream.invalid", None).unwrap(),
        );
        manager.allocate_ports(ports);
        manager
    }

    fn port_of_mock(server: &MockServer) -> u16 {
        server.address().port()
    }

    #[tokio::test]
    async fn create_twice_exhausts_a_single_port_pool() {
        let manager = manager_with_ports(&[18545]);

        let fork_id = manager.create_fork(Duration::from_secs(600)).unwrap();
        assert!(matches!(
            manager.create_fork(Duration::from_secs(600)),
            Err(ForkError::NoPortAvailable)
        ));

        manager.delete_fork(&fork_id).unwrap();
        manager.create_fork(Duration::from_secs(600)).unwrap();
        assert_eq!(manager.active_forks(), 1);
    }

    #[tokio::test]
    async fn spawn_failure_releases_the_port() {
        let manager = Arc::new(
            ForkManager::new(Arc::new(FailingSupervisor), "http://upstream.invalid", None)
                .unwrap(),
        );
        manager.allocate_ports(&[18546]);

        assert!(matches!(
            manager.create_fork(Duration::from_secs(600)),
            Err(ForkError::Process(_))
        ));
        assert_eq!(manager.active_forks(), 0);

        // The pool recovered; the port can be leased again.
        let supervisor_ok = manager_with_ports(&[18546]);
        supervisor_ok.create_fork(Duration::from_secs(600)).unwrap();
    }

    #[tokio::test]
    async fn lease_expiry_deactivates_the_fork() {
        let manager = manager_with_ports(&[18547]);

        let fork_id = manager.create_fork(Duration::from_millis(50)).unwrap();
        assert_eq!(manager.active_forks(), 1);

        sleep(Duration::from_millis(300)).await;
        assert_eq!(manager.active_forks(), 0);

        // A manual delete racing an expired lease observes the inactive row.
        assert!(matches!(manager.delete_fork(&fork_id), Err(ForkError::ForkInactive(_))));
    }

    #[tokio::test]
    async fn forward_rpc_round_trips_raw_bodies() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": "0x10"
            })))
            .mount(&mock)
            .await;

        let manager = manager_with_ports(&[port_of_mock(&mock)]);
        let fork_id = manager.create_fork(Duration::from_secs(600)).unwrap();

        let (status, body) = manager
            .forward_rpc(&fork_id, br#"{"jsonrpc":"2.0","id":1,"method":"eth_blockNumber"}"#.to_vec())
            .await
            .unwrap();

        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["result"], "0x10");
    }

    #[tokio::test]
    async fn forward_rpc_to_deleted_fork_is_rejected() {
        let manager = manager_with_ports(&[18548]);
        let fork_id = manager.create_fork(Duration::from_secs(600)).unwrap();
        manager.delete_fork(&fork_id).unwrap();

        assert!(matches!(
            manager.forward_rpc(&fork_id, b"{}".to_vec()).await,
            Err(ForkError::ForkInactive(_))
        ));
    }

    #[tokio::test]
    async fn wait_until_ready_succeeds_once_the_node_answers() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": "0x1234"
            })))
            .mount(&mock)
            .await;

        let manager = manager_with_ports(&[port_of_mock(&mock)]);
        let fork_id = manager.create_fork(Duration::from_secs(600)).unwrap();

        manager.wait_until_ready(&fork_id).await.unwrap();
    }
}

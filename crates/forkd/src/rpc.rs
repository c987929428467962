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

//! Typed JSON-RPC client over the fork pool.
//!
//! Every method builds a JSON-RPC 2.0 envelope, forwards it through the
//! fork manager, and decodes the typed result. Trace calls carry a
//! timestamp-derived request id so upstream caches never serve a stale
//! trace for a different call.

use crate::{ForkError, ForkManager};
use forkscope_common::{CallFrame, FlatCall, OpcodeTrace, TransactionReceipt};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::debug;

/// `keccak256("Error(string)")`, the topic of solidity's revert event.
const ERROR_STRING_TOPIC: &str =
    "0x08c379a0afcc32b1a39302f7cb8073359698411ab5fd6e3edb2c02c0b5fba8aa";

// 0x + 64 chars offset + 64 chars length + at least one data byte.
const MIN_ERROR_DATA_LEN: usize = 138;

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<Value>,
}

/// Typed wrappers over the JSON-RPC methods Forkscope uses.
#[derive(Clone)]
pub struct ForkRpcClient {
    manager: Arc<ForkManager>,
}

impl ForkRpcClient {
    /// New client forwarding through `manager`.
    pub fn new(manager: Arc<ForkManager>) -> Self {
        Self { manager }
    }

    /// The underlying fork manager.
    pub fn manager(&self) -> &Arc<ForkManager> {
        &self.manager
    }

    /// Raw passthrough used by the RPC forwarding endpoint and simulation.
    pub async fn send_raw(
        &self,
        fork_id: &str,
        raw_body: Vec<u8>,
    ) -> Result<(reqwest::StatusCode, Vec<u8>), ForkError> {
        self.manager.forward_rpc(fork_id, raw_body).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        fork_id: &str,
        request: Value,
    ) -> Result<T, ForkError> {
        let body = serde_json::to_vec(&request)?;
        let (_, response) = self.manager.forward_rpc(fork_id, body).await?;

        let envelope: Envelope<T> = serde_json::from_slice(&response)?;
        if let Some(error) = envelope.error {
            return Err(ForkError::Rpc(error.to_string()));
        }
        envelope.result.ok_or_else(|| ForkError::Rpc("missing result".to_string()))
    }

    async fn request_ignoring_result(
        &self,
        fork_id: &str,
        request: Value,
    ) -> Result<(), ForkError> {
        let body = serde_json::to_vec(&request)?;
        let (_, response) = self.manager.forward_rpc(fork_id, body).await?;

        let envelope: Envelope<Value> = serde_json::from_slice(&response)?;
        if let Some(error) = envelope.error {
            return Err(ForkError::Rpc(error.to_string()));
        }
        Ok(())
    }

    /// `eth_getBalance` at the latest block, as the raw hex string.
    pub async fn get_balance(&self, fork_id: &str, address: &str) -> Result<String, ForkError> {
        self.request(
            fork_id,
            json!({
                "jsonrpc": "2.0",
                "id": "2",
                "method": "eth_getBalance",
                "params": [address, "latest"],
            }),
        )
        .await
    }

    /// `anvil_setBalance`.
    pub async fn set_balance(
        &self,
        fork_id: &str,
        address: &str,
        balance: &str,
    ) -> Result<(), ForkError> {
        self.request_ignoring_result(
            fork_id,
            json!({
                "jsonrpc": "2.0",
                "id": "1",
                "method": "anvil_setBalance",
                "params": [address, balance],
            }),
        )
        .await
    }

    /// `anvil_setStorageAt`: writes `value` into `slot` of `token_address`.
    pub async fn set_storage_at(
        &self,
        fork_id: &str,
        token_address: &str,
        value: &str,
        slot: &str,
    ) -> Result<(), ForkError> {
        self.request_ignoring_result(
            fork_id,
            json!({
                "jsonrpc": "2.0",
                "id": "5",
                "method": "anvil_setStorageAt",
                "params": [token_address, slot, value],
            }),
        )
        .await
    }

    /// `evm_snapshot`, returning the snapshot id.
    pub async fn snapshot(&self, fork_id: &str) -> Result<String, ForkError> {
        self.request(
            fork_id,
            json!({
                "jsonrpc": "2.0",
                "id": "3",
                "method": "evm_snapshot",
            }),
        )
        .await
    }

    /// `evm_revert` to a previously taken snapshot.
    pub async fn revert_state(&self, fork_id: &str, snapshot: &str) -> Result<(), ForkError> {
        self.request_ignoring_result(
            fork_id,
            json!({
                "jsonrpc": "2.0",
                "id": "6",
                "method": "evm_revert",
                "params": [snapshot],
            }),
        )
        .await
    }

    /// `evm_mine` a single block.
    pub async fn mine(&self, fork_id: &str) -> Result<(), ForkError> {
        self.request_ignoring_result(
            fork_id,
            json!({
                "jsonrpc": "2.0",
                "id": "6",
                "method": "evm_mine",
            }),
        )
        .await
    }

    /// `eth_call` of `data` against `to` at the default block.
    pub async fn send_call(
        &self,
        fork_id: &str,
        to: &str,
        data: &str,
    ) -> Result<String, ForkError> {
        self.request(
            fork_id,
            json!({
                "jsonrpc": "2.0",
                "id": "4",
                "method": "eth_call",
                "params": [{ "to": to, "data": data }],
            }),
        )
        .await
    }

    /// `eth_getCode` at the latest block.
    pub async fn get_code(&self, fork_id: &str, address: &str) -> Result<String, ForkError> {
        self.request(
            fork_id,
            json!({
                "jsonrpc": "2.0",
                "id": "3",
                "method": "eth_getCode",
                "params": [address, "latest"],
            }),
        )
        .await
    }

    /// `debug_traceTransaction` with the default struct-logger.
    pub async fn get_opcode_trace(
        &self,
        fork_id: &str,
        tx_hash: &str,
    ) -> Result<OpcodeTrace, ForkError> {
        // Empty tracer config selects the struct-logger.
        self.request(
            fork_id,
            json!({
                "jsonrpc": "2.0",
                "id": trace_id("opcode"),
                "method": "debug_traceTransaction",
                "params": [tx_hash, {}],
            }),
        )
        .await
    }

    /// `debug_traceTransaction` with the call tracer, flattened in pre-order
    /// with depth attached (0 for the root).
    pub async fn get_call_trace(
        &self,
        fork_id: &str,
        tx_hash: &str,
    ) -> Result<Vec<FlatCall>, ForkError> {
        let root: CallFrame = self
            .request(
                fork_id,
                json!({
                    "jsonrpc": "2.0",
                    "id": trace_id("call"),
                    "method": "debug_traceTransaction",
                    "params": [tx_hash, { "tracer": "callTracer" }],
                }),
            )
            .await?;

        let flat = root.flatten();
        debug!("Flattened {} call-trace entries", flat.len());
        Ok(flat)
    }

    /// Extracts a revert reason from the transaction receipt.
    ///
    /// A successful transaction yields an empty string. A failed one is
    /// scanned for an `Error(string)` log, whose raw data field is returned
    /// undecoded; absent that, a generic failure marker.
    pub async fn get_error_message(
        &self,
        fork_id: &str,
        tx_hash: &str,
    ) -> Result<String, ForkError> {
        let body = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "id": "3",
            "method": "eth_getTransactionReceipt",
            "params": [tx_hash],
        }))?;
        let (_, response) = self.manager.forward_rpc(fork_id, body).await?;

        let envelope: Envelope<TransactionReceipt> = serde_json::from_slice(&response)?;
        if let Some(error) = envelope.error {
            return Err(ForkError::Rpc(error.to_string()));
        }
        let receipt = envelope.result.unwrap_or_default();

        if receipt.status == "0x1" {
            return Ok(String::new());
        }

        for log in &receipt.logs {
            if log.topics.first().map(String::as_str) == Some(ERROR_STRING_TOPIC)
                && log.data.len() > MIN_ERROR_DATA_LEN
            {
                return Ok(log.data.clone());
            }
        }

        Ok("Transaction Failed".to_string())
    }
}

fn trace_id(prefix: &str) -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    format!("{prefix}_{nanos}")
}

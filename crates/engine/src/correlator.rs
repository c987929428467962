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

//! The debug correlator.
//!
//! Joins the struct-log opcode trace, the call-tracer tree, and each touched
//! contract's recompiled source-map into a filtered, line-annotated trace.
//!
//! Ordering here is load-bearing: the opcode trace must be the FIRST call
//! against the primary fork (the upstream node corrupts fork state on
//! `debug_traceTransaction`, breaking later calls), and the call trace runs
//! on a short-lived helper fork for the same reason. Do not reorder.

use crate::{
    abi,
    source::{self, SourceStore, UNVERIFIED_FILE},
    srcmap::{decompress_source_map, line_number, pc_to_opcode_index},
    EtherscanClient,
};
use eyre::{bail, eyre, Result};
use forkscope_common::{
    ContractCalled, FlatCall, SourceMapEntry, StructLog, TraceStep,
};
use forkscope_forkd::ForkRpcClient;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Opcodes retained in the filtered trace.
const TARGET_OPCODES: &[&str] = &[
    "CALL", "DELEGATECALL", "STATICCALL", "CREATE", "CREATE2", "SLOAD", "SSTORE", "LOG0", "LOG1",
    "LOG2", "LOG3", "LOG4", "REVERT", "JUMP",
];

// Helper and simulation forks live one minute; long enough for the traces,
// short enough that a leaked fork frees its port quickly.
const EPHEMERAL_LEASE: Duration = Duration::from_secs(60);

fn is_target_opcode(op: &str) -> bool {
    TARGET_OPCODES.contains(&op)
}

/// Everything known about one contract while walking the trace.
struct ContractEntry {
    address: String,
    bytecode: String,
    sources: BTreeMap<String, String>,
    file_names: BTreeMap<String, String>,
    source_map: Vec<SourceMapEntry>,
}

/// Result of debugging one transaction.
#[derive(Debug, Clone, Serialize)]
pub struct DebugReport {
    /// Revert reason, or `"Transaction successful!"`.
    #[serde(rename = "RevertReason")]
    pub revert_reason: String,
    /// Source line of the last retained opcode.
    #[serde(rename = "LineNumber")]
    pub line_number: i64,
    /// The filtered, line-annotated trace.
    #[serde(rename = "DebugTrace")]
    pub trace: Vec<TraceStep>,
}

/// Result of simulating a raw transaction.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// One entry per call-tree node, with decoded call data.
    #[serde(rename = "ContractsCalled")]
    pub contracts_called: Vec<ContractCalled>,
    /// Source line of the last retained opcode.
    #[serde(rename = "LineNumber")]
    pub line_number: i64,
    /// Revert reason, or `"Transaction successful!"`.
    #[serde(rename = "RevertReason")]
    pub revert_reason: String,
    /// The filtered, line-annotated trace.
    #[serde(rename = "DebugTrace")]
    pub trace: Vec<TraceStep>,
}

/// Correlates traces with recompiled contract source.
#[derive(Clone)]
pub struct Debugger {
    rpc: ForkRpcClient,
    etherscan: Arc<EtherscanClient>,
    store: SourceStore,
}

impl Debugger {
    /// New debugger over the given collaborators.
    pub fn new(rpc: ForkRpcClient, etherscan: Arc<EtherscanClient>, store: SourceStore) -> Self {
        Self { rpc, etherscan, store }
    }

    /// The source store, for direct source-code lookups.
    pub fn store(&self) -> &SourceStore {
        &self.store
    }

    /// Debugs `tx_hash` against the fork `fork_id`.
    ///
    /// Returns the line of the last retained opcode, the revert reason, and
    /// the filtered trace.
    pub async fn debug_transaction(&self, fork_id: &str, tx_hash: &str) -> Result<DebugReport> {
        debug!("Debugging transaction {tx_hash} on fork {fork_id}");

        // Opcode trace FIRST; any earlier call on this fork would see
        // corrupted state afterwards.
        let opcode_trace = self.rpc.get_opcode_trace(fork_id, tx_hash).await?;
        debug!("Got opcode trace with {} struct logs", opcode_trace.struct_logs.len());

        let manager = self.rpc.manager();
        let helper_fork = manager.create_fork(EPHEMERAL_LEASE)?;
        manager.wait_until_ready(&helper_fork).await?;

        let trace = self.rpc.get_call_trace(&helper_fork, tx_hash).await?;
        if trace.is_empty() {
            bail!("no transaction trace");
        }

        let contract_map = self.build_contract_map(&helper_fork, &trace).await?;

        let revert_reason = self.rpc.get_error_message(fork_id, tx_hash).await?;

        if let Err(e) = manager.delete_fork(&helper_fork) {
            warn!("Failed to delete helper fork {helper_fork}: {e}");
        }

        let revert_reason = if revert_reason.is_empty() || revert_reason == "0x" {
            "Transaction successful!".to_string()
        } else {
            revert_reason
        };

        if opcode_trace.struct_logs.is_empty() {
            bail!("no debug trace detected");
        }

        let steps = walk_struct_logs(&opcode_trace.struct_logs, &contract_map)?;
        let Some(last) = steps.last() else {
            bail!("no debug trace detected");
        };
        let line_number = last.line_number;

        info!("Debugged {tx_hash}: {} trace entries", steps.len());
        Ok(DebugReport { line_number, revert_reason, trace: steps })
    }

    /// One [`ContractCalled`] per call-tree node, in pre-order.
    ///
    /// The trace itself runs against a fresh ephemeral fork; `fork_id` only
    /// identifies the debugging session for logging.
    pub async fn contracts_called(
        &self,
        fork_id: &str,
        tx_hash: &str,
    ) -> Result<Vec<ContractCalled>> {
        debug!("Resolving contracts called by {tx_hash} (session fork {fork_id})");

        let manager = self.rpc.manager();
        let trace_fork = manager.create_fork(EPHEMERAL_LEASE)?;
        manager.wait_until_ready(&trace_fork).await?;

        let trace = match self.rpc.get_call_trace(&trace_fork, tx_hash).await {
            Ok(trace) => trace,
            Err(e) => {
                if let Err(delete_err) = manager.delete_fork(&trace_fork) {
                    warn!("Failed to delete trace fork {trace_fork}: {delete_err}");
                }
                return Err(e.into());
            }
        };

        if let Err(e) = manager.delete_fork(&trace_fork) {
            warn!("Failed to delete trace fork {trace_fork}: {e}");
        }

        let mut contracts = Vec::with_capacity(trace.len());
        for call in &trace {
            contracts.push(self.resolve_contract_called(call).await);
        }
        Ok(contracts)
    }

    /// Simulates a raw JSON-RPC transaction body end-to-end: forward, mine,
    /// decode calls, debug.
    pub async fn simulate_raw_tx(&self, raw_body: Vec<u8>) -> Result<SimulationReport> {
        let manager = self.rpc.manager();
        let fork_id = manager.create_fork(EPHEMERAL_LEASE)?;
        manager.wait_until_ready(&fork_id).await?;

        let (_, response) = self.rpc.send_raw(&fork_id, raw_body).await?;
        let value: serde_json::Value = serde_json::from_slice(&response)?;
        let tx_hash = value
            .get("result")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| eyre!("raw transaction yielded no hash: {value}"))?
            .to_string();

        self.rpc.mine(&fork_id).await?;

        let contracts_called = self.contracts_called(&fork_id, &tx_hash).await?;
        let report = self.debug_transaction(&fork_id, &tx_hash).await?;

        manager.delete_fork(&fork_id)?;

        Ok(SimulationReport {
            contracts_called,
            line_number: report.line_number,
            revert_reason: report.revert_reason,
            trace: report.trace,
        })
    }

    /// Address of the last call-tree node of `tx_hash`.
    pub async fn last_address_called(&self, fork_id: &str, tx_hash: &str) -> Result<String> {
        let trace = self.rpc.get_call_trace(fork_id, tx_hash).await?;
        let last = trace.last().ok_or_else(|| eyre!("no transaction trace"))?;
        Ok(last.to.clone())
    }

    async fn build_contract_map(
        &self,
        fork_id: &str,
        trace: &[FlatCall],
    ) -> Result<BTreeMap<usize, ContractEntry>> {
        let mut contract_map = BTreeMap::new();

        for call in trace {
            let bytecode = self.rpc.get_code(fork_id, &call.to).await?;
            let sources = self.store.source_bundle(&call.to).await?;
            let compiled = self.store.compiled_contract(&call.to).await?;

            // Struct-log depth starts at 1; the flattened trace at 0.
            // Same-depth siblings overwrite each other here.
            contract_map.insert(
                call.depth + 1,
                ContractEntry {
                    address: call.to.clone(),
                    bytecode,
                    sources,
                    file_names: compiled.sources,
                    source_map: decompress_source_map(&compiled.srcmap),
                },
            );
        }

        Ok(contract_map)
    }

    async fn resolve_contract_called(&self, call: &FlatCall) -> ContractCalled {
        let unknown = || ContractCalled {
            contract_address: call.to.clone(),
            call_type: call.call_type.clone(),
            function_signature: "Unknown".to_string(),
            arguments: None,
        };

        if call.input == "0x" || call.input.len() < 10 {
            return unknown();
        }

        let abi_json = match self.etherscan.get_abi(&call.to).await {
            Ok(abi_json) => abi_json,
            Err(e) => {
                debug!("No ABI for {}: {e}", call.to);
                return unknown();
            }
        };

        match abi::decode_call(&abi_json, &call.input) {
            Ok((signature, arguments)) => ContractCalled {
                contract_address: call.to.clone(),
                call_type: call.call_type.clone(),
                function_signature: signature,
                arguments: Some(arguments),
            },
            Err(e) => {
                debug!("Failed decoding call to {}: {e}", call.to);
                unknown()
            }
        }
    }
}

fn walk_struct_logs(
    struct_logs: &[StructLog],
    contract_map: &BTreeMap<usize, ContractEntry>,
) -> Result<Vec<TraceStep>> {
    let mut steps: Vec<TraceStep> = Vec::new();

    for log in struct_logs {
        if !is_target_opcode(&log.op) {
            continue;
        }

        let Some(contract) = contract_map.get(&log.depth) else {
            steps.push(degraded_step(log, ""));
            continue;
        };

        if source::is_unverified_bundle(&contract.sources) {
            steps.push(TraceStep {
                opcode: log.op.clone(),
                line_number: 1,
                file: UNVERIFIED_FILE.to_string(),
                contract_address: contract.address.clone(),
                depth: log.depth,
            });
            continue;
        }

        let Ok(opcode_index) = pc_to_opcode_index(&contract.bytecode, log.pc) else {
            debug!("PC {} not found in bytecode of {}", log.pc, contract.address);
            steps.push(degraded_step(log, &contract.address));
            continue;
        };

        if opcode_index >= contract.source_map.len() {
            debug!(
                "Opcode index {opcode_index} out of source-map bounds ({}) for {}",
                contract.source_map.len(),
                contract.address
            );
            steps.push(degraded_step(log, &contract.address));
            continue;
        }

        let entry = &contract.source_map[opcode_index];

        // `-` marks a jump that is neither into nor out of a function.
        if log.op == "JUMP" && entry.jump_type == "-" {
            continue;
        }

        let Ok(file_id) = entry.file_id.parse::<usize>() else {
            continue;
        };
        if file_id >= contract.sources.len() {
            continue;
        }
        let Some(file_name) = contract.file_names.get(&entry.file_id) else {
            continue;
        };
        let Some(file_source) = contract.sources.get(file_name) else {
            continue;
        };

        let line = line_number(file_source, &entry.offset)?;

        // Collapse runs of steps on the same source line.
        if let Some(previous) = steps.last() {
            if previous.line_number == line && log.op != "RETURN" {
                continue;
            }
        }

        steps.push(TraceStep {
            opcode: log.op.clone(),
            line_number: line,
            file: file_name.clone(),
            contract_address: contract.address.clone(),
            depth: log.depth,
        });
    }

    Ok(steps)
}

fn degraded_step(log: &StructLog, address: &str) -> TraceStep {
    TraceStep {
        opcode: log.op.clone(),
        line_number: -1,
        file: "unknown".to_string(),
        contract_address: address.to_string(),
        depth: log.depth,
    }
}

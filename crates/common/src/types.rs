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

//! Wire and data types shared across Forkscope.
//!
//! The JSON shapes here mirror what anvil's `debug_*` namespace and the
//! block-explorer API actually emit; several numeric fields arrive as either
//! strings or numbers depending on the upstream node, so they are kept as
//! [`serde_json::Value`] where the service never interprets them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One step of the default struct-logger opcode trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructLog {
    /// Program counter, byte offset into the deployed bytecode.
    pub pc: u64,
    /// Opcode mnemonic, e.g. `SLOAD` or `PUSH1`.
    pub op: String,
    /// Call depth. Starts at 1 for the outermost frame.
    pub depth: usize,
    #[serde(default)]
    pub gas: u64,
    #[serde(default)]
    pub gas_cost: u64,
    /// Stack contents at this step. Untouched by the correlator.
    #[serde(default)]
    pub stack: Vec<Value>,
}

/// `debug_traceTransaction` result with the default struct-logger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpcodeTrace {
    #[serde(default)]
    pub failed: bool,
    /// String or number depending on the node.
    #[serde(default)]
    pub gas: Value,
    #[serde(default)]
    pub return_value: String,
    #[serde(default)]
    pub struct_logs: Vec<StructLog>,
}

/// One node of the `callTracer` tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    /// `CALL`, `DELEGATECALL`, `STATICCALL`, `CREATE`, ...
    #[serde(rename = "type", default)]
    pub call_type: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub gas: Option<Value>,
    #[serde(default)]
    pub gas_used: Option<Value>,
    #[serde(default)]
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<CallFrame>,
}

/// A [`CallFrame`] flattened out of the tree, annotated with its depth.
///
/// Depth starts at 0 for the root frame; the struct-log `depth` field starts
/// at 1, so consumers joining the two add one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatCall {
    #[serde(rename = "type")]
    pub call_type: String,
    pub from: String,
    pub to: String,
    pub value: Option<String>,
    pub input: String,
    pub output: Option<String>,
    pub error: Option<String>,
    pub revert_reason: Option<String>,
    pub depth: usize,
}

impl CallFrame {
    /// Flattens the call tree by pre-order traversal, attaching `depth`
    /// starting at 0 for the root.
    pub fn flatten(&self) -> Vec<FlatCall> {
        let mut out = Vec::new();
        self.flatten_into(&mut out, 0);
        out
    }

    fn flatten_into(&self, out: &mut Vec<FlatCall>, depth: usize) {
        out.push(FlatCall {
            call_type: self.call_type.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            value: self.value.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            error: self.error.clone(),
            revert_reason: self.revert_reason.clone(),
            depth,
        });
        for call in &self.calls {
            call.flatten_into(out, depth + 1);
        }
    }
}

/// Transaction receipt, reduced to the fields revert-reason extraction needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionReceipt {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub logs: Vec<ReceiptLog>,
}

/// A log entry of a [`TransactionReceipt`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiptLog {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
}

/// One decompressed source-map entry, covering exactly one opcode of the
/// deployed bytecode.
///
/// All fields are kept as the compiler emitted them (decimal strings, or `-`
/// markers); missing and empty fields inherit from the previous entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapEntry {
    pub offset: String,
    pub length: String,
    pub file_id: String,
    pub jump_type: String,
    pub modifier_depth: String,
}

/// Post-processed compiler output for one contract, persisted as
/// `compiledContracts/<address>.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompiledContract {
    /// Compressed runtime source-map.
    pub srcmap: String,
    /// File id (as a decimal string) to file path.
    pub sources: BTreeMap<String, String>,
}

/// Verified-source metadata returned by the block explorer.
#[derive(Debug, Clone, Default)]
pub struct SourceCodeInfo {
    pub source_code: String,
    pub contract_name: String,
    pub compiler_version: String,
    /// `"1"` when the original compilation had the optimizer on.
    pub optimization_used: String,
    pub runs: String,
    pub evm_version: String,
    /// True when the source blob was a standard-JSON bundle.
    pub is_standard_json: bool,
}

/// Standard-JSON compiler input, reduced to the source listing.
#[derive(Debug, Clone, Deserialize)]
pub struct StandardJsonInput {
    pub sources: BTreeMap<String, StandardJsonSource>,
}

/// One input file of a standard-JSON bundle.
#[derive(Debug, Clone, Deserialize)]
pub struct StandardJsonSource {
    pub content: String,
}

/// One line-annotated entry of the filtered opcode trace.
///
/// Serialized field names match the service's historical response shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TraceStep {
    pub opcode: String,
    /// 1-based source line, or -1 when the location could not be resolved.
    pub line_number: i64,
    pub file: String,
    pub contract_address: String,
    pub depth: usize,
}

/// One invoked contract with its decoded call, in call-tree pre-order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractCalled {
    pub contract_address: String,
    pub call_type: String,
    /// Full signature, or `"Unknown"` when the call-data could not be decoded.
    pub function_signature: String,
    pub arguments: Option<Vec<DecodedArgument>>,
}

/// A single decoded call argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedArgument {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_frame_flatten_is_preorder_with_depths() {
        let tree: CallFrame = serde_json::from_value(serde_json::json!({
            "type": "CALL",
            "from": "0xaaa",
            "to": "0xbbb",
            "input": "0x",
            "calls": [
                {
                    "type": "STATICCALL",
                    "from": "0xbbb",
                    "to": "0xccc",
                    "input": "0x",
                    "calls": [
                        { "type": "DELEGATECALL", "from": "0xccc", "to": "0xddd", "input": "0x" }
                    ]
                },
                { "type": "CALL", "from": "0xbbb", "to": "0xeee", "input": "0x" }
            ]
        }))
        .unwrap();

        let flat = tree.flatten();
        let got: Vec<(&str, usize)> =
            flat.iter().map(|c| (c.to.as_str(), c.depth)).collect();
        assert_eq!(got, vec![("0xbbb", 0), ("0xccc", 1), ("0xddd", 2), ("0xeee", 1)]);
    }

    #[test]
    fn struct_log_decodes_anvil_shape() {
        let log: StructLog = serde_json::from_str(
            r#"{"pc":7,"op":"SLOAD","gas":978040,"gasCost":2100,"depth":1,"stack":["0x0"]}"#,
        )
        .unwrap();
        assert_eq!(log.pc, 7);
        assert_eq!(log.op, "SLOAD");
        assert_eq!(log.gas_cost, 2100);
        assert_eq!(log.depth, 1);
    }

    #[test]
    fn trace_step_serializes_historical_field_names() {
        let step = TraceStep {
            opcode: "REVERT".into(),
            line_number: 12,
            file: "Token.sol".into(),
            contract_address: "0xabc".into(),
            depth: 1,
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["Opcode"], "REVERT");
        assert_eq!(json["LineNumber"], 12);
        assert_eq!(json["ContractAddress"], "0xabc");
    }
}

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

//! Call-data decoding against contract ABIs.

use alloy_dyn_abi::{DynSolValue, JsonAbiExt};
use alloy_json_abi::JsonAbi;
use alloy_primitives::hex;
use forkscope_common::DecodedArgument;
use thiserror::Error;

/// Errors from ABI decoding.
#[derive(Debug, Error)]
pub enum AbiError {
    /// The call data is empty or shorter than a selector.
    #[error("call data too short")]
    TooShort,

    /// No function in the ABI matches the 4-byte selector.
    #[error("no method matches selector {0}")]
    UnknownSelector(String),

    /// The argument tuple did not decode against the declared input types.
    #[error("failed to unpack arguments: {0}")]
    UnpackFailure(String),

    /// The ABI JSON itself did not parse.
    #[error("failed to parse ABI: {0}")]
    InvalidAbi(#[from] serde_json::Error),

    /// The call data is not valid hex.
    #[error("invalid call data: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Decodes `input` call-data against `abi_json`.
///
/// Returns the resolved function signature and one `(name, type, value)`
/// triple per argument; arguments without a declared name fall back to
/// positional `argN` names.
pub fn decode_call(
    abi_json: &str,
    input: &str,
) -> Result<(String, Vec<DecodedArgument>), AbiError> {
    if input == "0x" || input.len() < 10 {
        return Err(AbiError::TooShort);
    }

    let abi: JsonAbi = serde_json::from_str(abi_json)?;
    let data = hex::decode(input)?;
    if data.len() < 4 {
        return Err(AbiError::TooShort);
    }

    let selector = &data[..4];
    let function = abi
        .functions()
        .find(|f| f.selector().as_slice() == selector)
        .ok_or_else(|| AbiError::UnknownSelector(hex::encode_prefixed(selector)))?;

    let values = function
        .abi_decode_input(&data[4..])
        .map_err(|e| AbiError::UnpackFailure(e.to_string()))?;

    let arguments = values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let input = function.inputs.get(i);
            DecodedArgument {
                name: input
                    .map(|p| p.name.clone())
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| format!("arg{i}")),
                ty: input.map(|p| p.ty.clone()).unwrap_or_default(),
                value: format_value(value),
            }
        })
        .collect();

    Ok((function.signature(), arguments))
}

/// Decodes an ABI-encoded `Error(string)` blob into its message.
///
/// The blob is `selector(4) || offset(32) || length(32) || bytes`; the
/// literal marker `"EVM Revert"` passes through unchanged.
pub fn decode_revert_blob(blob: &str) -> Result<String, AbiError> {
    if blob == "EVM Revert" {
        return Ok(blob.to_string());
    }

    let bytes = hex::decode(blob)?;
    if bytes.len() < 68 {
        return Err(AbiError::UnpackFailure("revert blob shorter than header".to_string()));
    }

    let length = usize::try_from(alloy_primitives::U256::from_be_slice(&bytes[36..68]))
        .map_err(|_| AbiError::UnpackFailure("revert string length overflow".to_string()))?;
    let data = bytes
        .get(68..68 + length)
        .ok_or_else(|| AbiError::UnpackFailure("revert blob truncated".to_string()))?;

    String::from_utf8(data.to_vec())
        .map_err(|e| AbiError::UnpackFailure(e.to_string()))
}

fn format_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Address(address) => address.to_string(),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Bytes(bytes) => hex::encode_prefixed(bytes),
        DynSolValue::FixedBytes(word, size) => hex::encode_prefixed(&word[..*size]),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", inner.join(", "))
        }
        DynSolValue::Tuple(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("({})", inner.join(", "))
        }
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ERC20_ABI: &str = r#"[
        {
            "type": "function",
            "name": "transfer",
            "inputs": [
                { "name": "recipient", "type": "address" },
                { "name": "amount", "type": "uint256" }
            ],
            "outputs": [{ "name": "", "type": "bool" }],
            "stateMutability": "nonpayable"
        },
        {
            "type": "function",
            "name": "batch",
            "inputs": [{ "name": "", "type": "uint256[]" }],
            "outputs": [],
            "stateMutability": "nonpayable"
        }
    ]"#;

    // transfer(0x1111...11, 1 ether)
    const TRANSFER_INPUT: &str = concat!(
        "0xa9059cbb",
        "0000000000000000000000001111111111111111111111111111111111111111",
        "0000000000000000000000000000000000000000000000000de0b6b3a7640000",
    );

    #[test]
    fn transfer_call_decodes_into_named_triples() {
        let (signature, arguments) = decode_call(ERC20_ABI, TRANSFER_INPUT).unwrap();

        assert_eq!(signature, "transfer(address,uint256)");
        assert_eq!(arguments.len(), 2);
        assert_eq!(arguments[0].name, "recipient");
        assert_eq!(arguments[0].ty, "address");
        assert_eq!(
            arguments[0].value,
            "0x1111111111111111111111111111111111111111"
        );
        assert_eq!(arguments[1].name, "amount");
        assert_eq!(arguments[1].value, "1000000000000000000");
    }

    #[test]
    fn unnamed_arguments_get_positional_names() {
        // batch([7])
        let input = concat!(
            "0x252f7b01",
            "0000000000000000000000000000000000000000000000000000000000000020",
            "0000000000000000000000000000000000000000000000000000000000000001",
            "0000000000000000000000000000000000000000000000000000000000000007",
        );
        // Selector of batch(uint256[]) per the fixture ABI.
        let abi: JsonAbi = serde_json::from_str(ERC20_ABI).unwrap();
        let batch = abi.functions().find(|f| f.name == "batch").unwrap();
        let input = format!(
            "0x{}{}",
            alloy_primitives::hex::encode(batch.selector()),
            &input[10..]
        );

        let (signature, arguments) = decode_call(ERC20_ABI, &input).unwrap();
        assert_eq!(signature, "batch(uint256[])");
        assert_eq!(arguments[0].name, "arg0");
        assert_eq!(arguments[0].value, "[7]");
    }

    #[test]
    fn short_input_is_rejected() {
        assert!(matches!(decode_call(ERC20_ABI, "0x"), Err(AbiError::TooShort)));
        assert!(matches!(decode_call(ERC20_ABI, "0xa9059c"), Err(AbiError::TooShort)));
    }

    #[test]
    fn unknown_selector_is_rejected() {
        let input = format!("0xdeadbeef{}", "00".repeat(64));
        assert!(matches!(
            decode_call(ERC20_ABI, &input),
            Err(AbiError::UnknownSelector(_))
        ));
    }

    #[test]
    fn truncated_arguments_fail_to_unpack() {
        // Selector matches transfer but the tuple is cut short.
        let input = "0xa9059cbb0000000000000000000000001111111111111111111111111111111111111111";
        assert!(matches!(
            decode_call(ERC20_ABI, input),
            Err(AbiError::UnpackFailure(_))
        ));
    }

    #[test]
    fn revert_blob_decodes_the_error_string() {
        let message = "Insufficient balance";
        let mut blob = String::from("0x08c379a0");
        blob.push_str(&format!("{:064x}", 32));
        blob.push_str(&format!("{:064x}", message.len()));
        let mut data = hex::encode(message.as_bytes());
        data.push_str(&"0".repeat(64 - data.len()));
        blob.push_str(&data);

        assert_eq!(decode_revert_blob(&blob).unwrap(), message);
    }

    #[test]
    fn evm_revert_marker_passes_through() {
        assert_eq!(decode_revert_blob("EVM Revert").unwrap(), "EVM Revert");
    }

    #[test]
    fn truncated_revert_blob_is_rejected() {
        assert!(matches!(
            decode_revert_blob("0x08c379a0"),
            Err(AbiError::UnpackFailure(_))
        ));
    }
}

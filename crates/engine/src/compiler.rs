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

//! Version-pinned solc invocation and output post-processing.
//!
//! Compilation shells out to a pre-provisioned binary at
//! `solc/<compiler_version>` with the settings the explorer reported for
//! the original deployment, then boils the compiler output down to the
//! `{srcmap, sources}` record the correlator needs.

use forkscope_common::{CompiledContract, DataDir, SourceCodeInfo};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors from the compile step.
#[derive(Debug, Error)]
pub enum CompilerError {
    /// No binary is provisioned for the requested compiler version.
    #[error("compiler binary not found: {0}")]
    MissingBinary(String),

    /// The compiler exited nonzero.
    #[error("compiler failed ({status}): {stderr}")]
    Exit {
        /// Exit status as reported by the OS.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// Reading inputs or writing outputs failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The compiler output could not be decoded.
    #[error("failed to decode compiler output: {0}")]
    Decode(#[from] serde_json::Error),
}

// `--combined-json srcmap-runtime` output shape.
#[derive(Debug, Deserialize)]
struct CombinedJsonOutput {
    #[serde(default)]
    contracts: BTreeMap<String, CombinedJsonContract>,
}

#[derive(Debug, Deserialize)]
struct CombinedJsonContract {
    #[serde(rename = "srcmap-runtime", default)]
    srcmap_runtime: String,
}

// `--standard-json` output shape, reduced to what we read.
#[derive(Debug, Deserialize)]
struct StandardJsonOutput {
    #[serde(default)]
    contracts: BTreeMap<String, BTreeMap<String, StandardJsonContract>>,
    #[serde(default)]
    sources: BTreeMap<String, StandardJsonOutputSource>,
}

#[derive(Debug, Deserialize)]
struct StandardJsonContract {
    evm: StandardJsonEvm,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StandardJsonEvm {
    deployed_bytecode: StandardJsonDeployedBytecode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StandardJsonDeployedBytecode {
    #[serde(default)]
    source_map: String,
}

#[derive(Debug, Deserialize)]
struct StandardJsonOutputSource {
    id: u64,
}

/// Compiles the persisted source for `address` and writes the post-processed
/// `{srcmap, sources}` record into the compiled-contracts directory.
pub async fn compile_contract(
    dirs: &DataDir,
    info: &SourceCodeInfo,
    address: &str,
) -> Result<(), CompilerError> {
    let solc = dirs.solc_binary(&info.compiler_version);
    if !solc.is_file() {
        return Err(CompilerError::MissingBinary(solc.display().to_string()));
    }

    std::fs::create_dir_all(dirs.compiled_dir())?;
    let record_path = dirs.compiled_file(address);

    if info.is_standard_json {
        let mut cmd = Command::new(&solc);
        cmd.arg("--standard-json")
            .arg(dirs.source_file(address, true))
            .arg("-o")
            .arg(dirs.compiled_dir());
        push_evm_version(&mut cmd, info);

        debug!("Running {} --standard-json for {address}", solc.display());
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(CompilerError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        // Standard-JSON results land on stdout.
        let record = standard_json_record(&output.stdout, &info.contract_name)?;
        std::fs::write(&record_path, serde_json::to_vec_pretty(&record)?)?;
    } else {
        let mut cmd = Command::new(&solc);
        cmd.arg(dirs.source_file(address, false))
            .arg("-o")
            .arg(dirs.compiled_dir())
            .arg("--combined-json")
            .arg("srcmap-runtime");
        push_evm_version(&mut cmd, info);

        if info.optimization_used == "1" {
            cmd.arg("--optimize");
            if info.runs != "0" {
                cmd.arg("--optimize-runs").arg(&info.runs);
            }
        }

        debug!("Running {} for {address}", solc.display());
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(CompilerError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let combined_path = dirs.compiled_dir().join("combined.json");
        let raw = std::fs::read(&combined_path)?;
        std::fs::remove_file(&combined_path)?;

        let record = single_file_record(&raw, &info.contract_name, address)?;
        std::fs::write(&record_path, serde_json::to_vec_pretty(&record)?)?;
    }

    info!("Compiled {address} with {}", info.compiler_version);
    Ok(())
}

fn push_evm_version(cmd: &mut Command, info: &SourceCodeInfo) {
    // Same EVM target as the original compilation, when one was pinned.
    let evm_version = info.evm_version.to_lowercase();
    if !evm_version.is_empty() && evm_version != "default" {
        cmd.arg("--evm-version").arg(evm_version);
    }
}

/// Post-processes `--combined-json srcmap-runtime` output: the matching
/// contract's runtime source-map under the synthetic single-file id 0.
fn single_file_record(
    raw: &[u8],
    contract_name: &str,
    address: &str,
) -> Result<CompiledContract, CompilerError> {
    let output: CombinedJsonOutput = serde_json::from_slice(raw)?;

    let mut record = CompiledContract::default();
    for (key, contract) in output.contracts {
        // Keys look like `path/to/file.sol:ContractName`.
        let name = key.rsplit(':').next().unwrap_or_default();
        if name == contract_name {
            record.srcmap = contract.srcmap_runtime;
        }
    }

    record.sources.insert("0".to_string(), format!("{address}.sol"));
    Ok(record)
}

/// Post-processes `--standard-json` output: the deployed source-map of the
/// contract declared in `<contract_name>.sol`, plus the file-id table.
fn standard_json_record(
    raw: &[u8],
    contract_name: &str,
) -> Result<CompiledContract, CompilerError> {
    let output: StandardJsonOutput = serde_json::from_slice(raw)?;

    let mut record = CompiledContract::default();
    for (path, contracts) in output.contracts {
        let file_name = path.rsplit('/').next().unwrap_or_default();
        if file_name == format!("{contract_name}.sol") {
            if let Some(contract) = contracts.get(contract_name) {
                record.srcmap = contract.evm.deployed_bytecode.source_map.clone();
            }
        }
    }

    for (path, source) in output.sources {
        record.sources.insert(source.id.to_string(), path);
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn single_file_output_selects_the_declared_contract() {
        let raw = serde_json::json!({
            "contracts": {
                "output/sourceCodeInfos/0xabc.sol:Helper": { "srcmap-runtime": "1:1:0" },
                "output/sourceCodeInfos/0xabc.sol:Token": { "srcmap-runtime": "0:45:0:-:0;5" }
            },
            "version": "0.8.19+commit.7dd6d404"
        })
        .to_string();

        let record = single_file_record(raw.as_bytes(), "Token", "0xabc").unwrap();
        assert_eq!(record.srcmap, "0:45:0:-:0;5");
        assert_eq!(record.sources.get("0").unwrap(), "0xabc.sol");
    }

    #[test]
    fn standard_json_output_maps_file_ids_to_paths() {
        let raw = serde_json::json!({
            "contracts": {
                "contracts/Token.sol": {
                    "Token": {
                        "evm": { "deployedBytecode": { "sourceMap": "7:2:1" } }
                    }
                },
                "lib/SafeMath.sol": {
                    "SafeMath": {
                        "evm": { "deployedBytecode": { "sourceMap": "0:1:0" } }
                    }
                }
            },
            "sources": {
                "contracts/Token.sol": { "id": 1 },
                "lib/SafeMath.sol": { "id": 0 }
            }
        })
        .to_string();

        let record = standard_json_record(raw.as_bytes(), "Token").unwrap();
        assert_eq!(record.srcmap, "7:2:1");
        assert_eq!(record.sources.get("0").unwrap(), "lib/SafeMath.sol");
        assert_eq!(record.sources.get("1").unwrap(), "contracts/Token.sol");
    }

    #[tokio::test]
    async fn missing_binary_is_reported_without_running_anything() {
        let tmp = TempDir::new().unwrap();
        let dirs = DataDir::new(Some(tmp.path()));
        let info = SourceCodeInfo {
            compiler_version: "v0.8.19+commit.7dd6d404".into(),
            ..Default::default()
        };

        let err = compile_contract(&dirs, &info, "0xabc").await.unwrap_err();
        assert!(matches!(err, CompilerError::MissingBinary(path) if path.contains("v0.8.19")));
    }
}

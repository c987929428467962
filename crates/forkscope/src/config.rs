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

//! Command-line and environment configuration.

use clap::Parser;
use forkscope_common::env;
use forkscope_engine::etherscan::DEFAULT_API_URL;

/// Command-line interface for the Forkscope service.
#[derive(Debug, Parser)]
#[command(name = "forkscope")]
#[command(about = "EVM transaction debugger and simulation service")]
#[command(version)]
pub struct Cli {
    /// Ports available to the fork pool, comma-separated.
    #[arg(long, env = env::PORTS, value_delimiter = ',', required = true)]
    pub ports: Vec<u16>,

    /// Upstream JSON-RPC endpoint to fork from.
    #[arg(long, env = env::RPC_URL)]
    pub rpc_url: String,

    /// Block number to pin forks to (default: latest).
    #[arg(long)]
    pub fork_block_number: Option<u64>,

    /// Block explorer API key.
    #[arg(long, env = env::ETHERSCAN_API_KEY, default_value = "")]
    pub etherscan_api_key: String,

    /// Block explorer API endpoint.
    #[arg(long, env = env::ETHERSCAN_API_URL, default_value = DEFAULT_API_URL)]
    pub etherscan_api_url: String,

    /// Chain id passed to the block explorer.
    #[arg(long, default_value = "1")]
    pub chain_id: u64,

    /// Root directory for sources, compiled records, and solc binaries.
    #[arg(long, env = env::DATA_DIR)]
    pub data_dir: Option<String>,

    /// Port the HTTP surface listens on.
    #[arg(long, default_value = "8080")]
    pub http_port: u16,
}

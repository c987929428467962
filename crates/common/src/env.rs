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

//! Environment variable names used by Forkscope.

/// Comma-separated list of local ports available to the fork pool.
pub const PORTS: &str = "PORTS";

/// Upstream JSON-RPC endpoint forks are created from.
pub const RPC_URL: &str = "RPC_URL";

/// API key for the block explorer.
pub const ETHERSCAN_API_KEY: &str = "ETHERSCAN_API_KEY";

/// Block explorer API endpoint; defaults to the public Etherscan v2 API.
pub const ETHERSCAN_API_URL: &str = "ETHERSCAN_API_URL";

/// Root directory for fetched sources, compiled records, and solc binaries.
pub const DATA_DIR: &str = "FORKSCOPE_DATA_DIR";

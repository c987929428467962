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

//! Forkscope - EVM transaction debugger and simulation service.

use clap::Parser;
use eyre::Result;
use forkscope_common::{logging, DataDir};
use forkscope_engine::{BalanceProbe, Debugger, EtherscanClient, SourceStore};
use forkscope_forkd::{AnvilSupervisor, ForkManager, ForkRpcClient};
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

mod config;
mod server;

use config::Cli;
use server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    logging::init_logging("forkscope", true)?;

    let dirs = DataDir::new(cli.data_dir.as_deref());
    dirs.ensure_layout()?;

    let supervisor = Arc::new(AnvilSupervisor::new());
    let manager = Arc::new(ForkManager::new(
        supervisor,
        cli.rpc_url.clone(),
        cli.fork_block_number,
    )?);
    manager.allocate_ports(&cli.ports);
    info!("Allocated {} ports to the fork pool", cli.ports.len());

    let rpc = ForkRpcClient::new(Arc::clone(&manager));
    let probe = BalanceProbe::new(rpc.clone());

    let etherscan = Arc::new(EtherscanClient::new(
        cli.etherscan_api_url.clone(),
        cli.chain_id,
        cli.etherscan_api_key.clone(),
    )?);
    let store = SourceStore::new(dirs, Arc::clone(&etherscan));
    let debugger = Debugger::new(rpc.clone(), etherscan, store);

    let state = AppState { manager, rpc, probe, debugger };
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.http_port));

    tokio::select! {
        result = server::serve(state, addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    Ok(())
}

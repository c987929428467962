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

//! ERC-20 balance forcing by storage-slot brute force.
//!
//! Token contracts keep balances in a `mapping(address => uint256)` whose
//! storage slot is not discoverable from the outside. The probe walks
//! candidate slots: snapshot, write the target balance into
//! `keccak256(pad32(holder) || pad32(slot))`, read `balanceOf`, and revert
//! unless the read came back changed.

use alloy_primitives::{hex, keccak256, Address, U256};
use forkscope_forkd::{ForkError, ForkRpcClient};
use thiserror::Error;
use tracing::{debug, info};

/// Candidate mapping slots tried before giving up.
const MAX_PROBE_SLOTS: u64 = 100;

/// Errors from the balance probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// No candidate slot moved `balanceOf`; the token stores balances
    /// somewhere unusual (packed, proxied, or rebased).
    #[error("mapping slot for given address not found")]
    MappingSlotNotFound,

    /// The holder or token address did not parse.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// Underlying fork RPC failure.
    #[error(transparent)]
    Fork(#[from] ForkError),
}

/// Forces and reads ERC-20 balances on a fork.
#[derive(Clone)]
pub struct BalanceProbe {
    rpc: ForkRpcClient,
}

impl BalanceProbe {
    /// New probe speaking through `rpc`.
    pub fn new(rpc: ForkRpcClient) -> Self {
        Self { rpc }
    }

    /// Sets `user`'s balance of `token` to `balance` (a 32-byte hex word).
    ///
    /// Both sides of the success check are the raw `eth_call` hex strings;
    /// callers wanting numeric equality must pass the token's canonical
    /// zero-padded form.
    pub async fn set_erc20_balance(
        &self,
        fork_id: &str,
        user: &str,
        token: &str,
        balance: &str,
    ) -> Result<(), ProbeError> {
        for slot_number in 0..MAX_PROBE_SLOTS {
            let snapshot = self.rpc.snapshot(fork_id).await?;

            let balance_slot = balance_slot(user, slot_number)?;
            debug!("Probing slot {slot_number} ({balance_slot}) of {token}");

            self.rpc.set_storage_at(fork_id, token, balance, &balance_slot).await?;

            let current = self.get_erc20_balance(fork_id, token, user).await?;
            if current == balance {
                info!("Found balance mapping of {token} at slot {slot_number}");
                return Ok(());
            }

            self.rpc.revert_state(fork_id, &snapshot).await?;
        }

        Err(ProbeError::MappingSlotNotFound)
    }

    /// Reads `balanceOf(user)` on `token`, returning the raw hex result.
    pub async fn get_erc20_balance(
        &self,
        fork_id: &str,
        token: &str,
        user: &str,
    ) -> Result<String, ProbeError> {
        let data = encode_balance_of(user)?;
        Ok(self.rpc.send_call(fork_id, token, &data).await?)
    }
}

/// Storage slot of `mapping(address => uint256)[account]` when the mapping
/// itself sits in `slot_number`.
fn balance_slot(account: &str, slot_number: u64) -> Result<String, ProbeError> {
    let address = parse_address(account)?;

    let mut preimage = [0u8; 64];
    preimage[12..32].copy_from_slice(address.as_slice());
    preimage[32..64].copy_from_slice(&U256::from(slot_number).to_be_bytes::<32>());

    Ok(hex::encode_prefixed(keccak256(preimage)))
}

/// Call data for `balanceOf(address)`.
fn encode_balance_of(account: &str) -> Result<String, ProbeError> {
    let address = parse_address(account)?;

    let selector = &keccak256(b"balanceOf(address)")[..4];
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(selector);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(address.as_slice());

    Ok(hex::encode_prefixed(data))
}

fn parse_address(account: &str) -> Result<Address, ProbeError> {
    account.parse().map_err(|_| ProbeError::InvalidAddress(account.to_string()))
}

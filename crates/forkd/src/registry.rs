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

//! In-memory port registry.
//!
//! One row per pooled port. A row with `active == true` belongs to a live
//! fork lease and its `fork_id` is the lease id; an inactive row keeps its
//! last fork id as a tombstone until the next reservation overwrites it.

use crate::ForkError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{error, info};
use uuid::Uuid;

/// One registry row.
#[derive(Debug, Clone)]
pub struct PortRow {
    /// The local port this row manages.
    pub port: u16,
    /// Whether a child process currently holds the port.
    pub active: bool,
    /// Current lease id, or a placeholder/tombstone when inactive.
    pub fork_id: String,
}

/// Registry of pooled ports, serialized by a single mutex.
///
/// Selection order for [`reserve`](Self::reserve) is deterministic by
/// ascending port number.
#[derive(Debug, Default)]
pub struct PortRegistry {
    rows: Mutex<BTreeMap<u16, PortRow>>,
}

impl PortRegistry {
    /// New empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the registry with `ports`, each inactive with a fresh
    /// placeholder fork id. Duplicate seeds are reported and skipped
    /// without aborting the call.
    pub fn allocate_ports(&self, ports: &[u16]) {
        let mut rows = self.rows.lock();
        for &port in ports {
            if rows.contains_key(&port) {
                error!("Failed allocating port {port}: already allocated");
                continue;
            }
            rows.insert(
                port,
                PortRow { port, active: false, fork_id: Uuid::new_v4().to_string() },
            );
        }
    }

    /// Marks the lowest-numbered free port active under a fresh fork id and
    /// returns both.
    pub fn reserve(&self) -> Result<(u16, String), ForkError> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.values_mut().find(|row| !row.active) else {
            error!("No available port!");
            return Err(ForkError::NoPortAvailable);
        };

        row.active = true;
        row.fork_id = Uuid::new_v4().to_string();

        info!("Allocated port {} to fork {}", row.port, row.fork_id);
        Ok((row.port, row.fork_id.clone()))
    }

    /// Marks the row leased to `fork_id` inactive. The fork id stays in
    /// place as a tombstone.
    pub fn release(&self, fork_id: &str) -> Result<(), ForkError> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.values_mut().find(|row| row.fork_id == fork_id) else {
            return Err(ForkError::ForkNotFound(fork_id.to_string()));
        };

        row.active = false;
        info!("Released port {} from fork {}", row.port, fork_id);
        Ok(())
    }

    /// Resolves the port leased to `fork_id`.
    pub fn port_of(&self, fork_id: &str) -> Result<u16, ForkError> {
        let rows = self.rows.lock();
        rows.values()
            .find(|row| row.fork_id == fork_id)
            .map(|row| row.port)
            .ok_or_else(|| ForkError::ForkNotFound(fork_id.to_string()))
    }

    /// Whether the row carrying `fork_id` is active.
    pub fn is_active(&self, fork_id: &str) -> Result<bool, ForkError> {
        let rows = self.rows.lock();
        rows.values()
            .find(|row| row.fork_id == fork_id)
            .map(|row| row.active)
            .ok_or_else(|| ForkError::ForkNotFound(fork_id.to_string()))
    }

    /// Number of active rows.
    pub fn active_count(&self) -> usize {
        self.rows.lock().values().filter(|row| row.active).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_picks_ascending_ports() {
        let registry = PortRegistry::new();
        registry.allocate_ports(&[8547, 8545, 8546]);

        let (first, _) = registry.reserve().unwrap();
        let (second, _) = registry.reserve().unwrap();
        let (third, _) = registry.reserve().unwrap();
        assert_eq!((first, second, third), (8545, 8546, 8547));
    }

    #[test]
    fn reserve_fails_when_pool_is_exhausted() {
        let registry = PortRegistry::new();
        registry.allocate_ports(&[8545]);

        registry.reserve().unwrap();
        assert!(matches!(registry.reserve(), Err(ForkError::NoPortAvailable)));
    }

    #[test]
    fn release_keeps_the_fork_id_as_tombstone() {
        let registry = PortRegistry::new();
        registry.allocate_ports(&[8545]);

        let (port, fork_id) = registry.reserve().unwrap();
        registry.release(&fork_id).unwrap();

        // The tombstone still resolves, but is inactive.
        assert_eq!(registry.port_of(&fork_id).unwrap(), port);
        assert!(!registry.is_active(&fork_id).unwrap());

        // The next reservation overwrites it.
        let (port_again, new_fork_id) = registry.reserve().unwrap();
        assert_eq!(port_again, port);
        assert_ne!(new_fork_id, fork_id);
        assert!(matches!(registry.port_of(&fork_id), Err(ForkError::ForkNotFound(_))));
    }

    #[test]
    fn duplicate_seeds_do_not_abort_allocation() {
        let registry = PortRegistry::new();
        registry.allocate_ports(&[8545, 8545, 8546]);

        registry.reserve().unwrap();
        registry.reserve().unwrap();
        assert!(matches!(registry.reserve(), Err(ForkError::NoPortAvailable)));
    }

    #[test]
    fn unknown_fork_ids_are_reported() {
        let registry = PortRegistry::new();
        registry.allocate_ports(&[8545]);

        assert!(matches!(registry.port_of("missing"), Err(ForkError::ForkNotFound(_))));
        assert!(matches!(registry.is_active("missing"), Err(ForkError::ForkNotFound(_))));
        assert!(matches!(registry.release("missing"), Err(ForkError::ForkNotFound(_))));
    }
}

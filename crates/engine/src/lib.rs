// Copyright (C) 2025 The Forkscope contributors
// SPDX-License-Identifier: AGPL-3.0
//! Forkscope Engine - Trace-to-source correlation
//!
//! Turns raw `debug_traceTransaction` output into line-annotated traces:
//! fetches verified source from the block explorer, recompiles it with a
//! version-pinned solc to recover the runtime source-map, walks deployed
//! bytecode to translate program counters into source locations, and
//! decodes call-data against contract ABIs. Also hosts the ERC-20
//! balance-slot probe built on snapshot/mutate/call/revert iteration.

pub mod abi;
pub mod balance;
pub mod compiler;
pub mod correlator;
pub mod etherscan;
pub mod source;
pub mod srcmap;

pub use abi::AbiError;
pub use balance::{BalanceProbe, ProbeError};
pub use compiler::CompilerError;
pub use correlator::{DebugReport, Debugger, SimulationReport};
pub use etherscan::{EtherscanClient, ExplorerError};
pub use source::SourceStore;
pub use srcmap::SourceMapError;

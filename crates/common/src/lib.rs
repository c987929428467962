// Copyright (C) 2025 The Forkscope contributors
// SPDX-License-Identifier: AGPL-3.0
//! Forkscope Common - Shared functionality for Forkscope components
//!
//! This crate provides the pieces every other Forkscope crate leans on:
//! wire types for traces and compiler output, the on-disk data layout,
//! logging setup, and environment variable names.

pub mod cache;
pub mod env;
pub mod logging;
pub mod types;

pub use cache::DataDir;
pub use types::*;

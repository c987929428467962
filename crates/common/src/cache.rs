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

//! On-disk data layout.
//!
//! Fetched source bundles and post-processed compiler records are cached on
//! disk indefinitely; writes are idempotent per address, and readers require
//! a successful decode before using a file, so concurrent overwrites of
//! identical content are harmless.

use eyre::Result;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Root of Forkscope's working data.
///
/// Layout under the root:
/// - `output/sourceCodeInfos/<address>.sol` or `.json`: fetched source
/// - `output/compiledContracts/<address>.json`: `{srcmap, sources}` record
/// - `solc/<compiler_version>`: version-pinned compiler binaries
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl Default for DataDir {
    fn default() -> Self {
        Self { root: PathBuf::from(".") }
    }
}

impl DataDir {
    /// New data dir rooted at `root`; `None` means the working directory.
    pub fn new(root: Option<impl Into<PathBuf>>) -> Self {
        root.map(Into::into).map(|root| Self { root }).unwrap_or_default()
    }

    /// Returns the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding fetched source files.
    pub fn sources_dir(&self) -> PathBuf {
        self.root.join("output").join("sourceCodeInfos")
    }

    /// Directory holding post-processed compiler records.
    pub fn compiled_dir(&self) -> PathBuf {
        self.root.join("output").join("compiledContracts")
    }

    /// Directory holding the version-pinned compiler binaries.
    pub fn solc_dir(&self) -> PathBuf {
        self.root.join("solc")
    }

    /// Path of the persisted source for `address`.
    ///
    /// Standard-JSON bundles are stored as `.json`, plain Solidity as `.sol`.
    pub fn source_file(&self, address: &str, standard_json: bool) -> PathBuf {
        let ext = if standard_json { "json" } else { "sol" };
        self.sources_dir().join(format!("{address}.{ext}"))
    }

    /// Path of the persisted compiled-contract record for `address`.
    pub fn compiled_file(&self, address: &str) -> PathBuf {
        self.compiled_dir().join(format!("{address}.json"))
    }

    /// Path of the compiler binary for `version`.
    pub fn solc_binary(&self, version: &str) -> PathBuf {
        self.solc_dir().join(version)
    }

    /// True when a source file (of either flavor) is already cached.
    pub fn has_source(&self, address: &str) -> bool {
        self.source_file(address, false).is_file() || self.source_file(address, true).is_file()
    }

    /// Creates the output directories.
    pub fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(self.sources_dir())?;
        fs::create_dir_all(self.compiled_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn paths_follow_the_layout() {
        let dirs = DataDir::new(Some("/data"));
        assert_eq!(
            dirs.source_file("0xab", false),
            PathBuf::from("/data/output/sourceCodeInfos/0xab.sol")
        );
        assert_eq!(
            dirs.source_file("0xab", true),
            PathBuf::from("/data/output/sourceCodeInfos/0xab.json")
        );
        assert_eq!(
            dirs.compiled_file("0xab"),
            PathBuf::from("/data/output/compiledContracts/0xab.json")
        );
        assert_eq!(dirs.solc_binary("v0.8.19+commit.7dd6d404"), PathBuf::from("/data/solc/v0.8.19+commit.7dd6d404"));
    }

    #[test]
    fn has_source_sees_either_extension() {
        let tmp = TempDir::new().unwrap();
        let dirs = DataDir::new(Some(tmp.path()));
        dirs.ensure_layout().unwrap();
        assert!(!dirs.has_source("0xab"));

        fs::write(dirs.source_file("0xab", true), "{}").unwrap();
        assert!(dirs.has_source("0xab"));

        fs::write(dirs.source_file("0xcd", false), "contract A {}").unwrap();
        assert!(dirs.has_source("0xcd"));
    }
}

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

//! Contract source acquisition and on-disk caching.
//!
//! The first request for an address fetches verified source from the
//! explorer, persists it, and compiles it; every later request reads the
//! cached files. Addresses the explorer cannot verify degrade to a
//! placeholder bundle instead of failing the request.

use crate::{compiler, EtherscanClient};
use eyre::Result;
use forkscope_common::{CompiledContract, DataDir, SourceCodeInfo, StandardJsonInput};
use std::{collections::BTreeMap, fs, sync::Arc};
use tracing::{info, warn};

/// File name used for contracts without verified source.
pub const UNVERIFIED_FILE: &str = "unverified.sol";

/// Placeholder contents for contracts without verified source.
pub const UNVERIFIED_NOTICE: &str = "// No source code available - contract is not verified";

/// Fetch-or-cache access to contract sources and compiled records.
#[derive(Debug, Clone)]
pub struct SourceStore {
    dirs: DataDir,
    etherscan: Arc<EtherscanClient>,
}

impl SourceStore {
    /// New store over `dirs`, fetching through `etherscan`.
    pub fn new(dirs: DataDir, etherscan: Arc<EtherscanClient>) -> Self {
        Self { dirs, etherscan }
    }

    /// The data layout this store reads and writes.
    pub fn dirs(&self) -> &DataDir {
        &self.dirs
    }

    /// Returns the source bundle for `address`: file path to contents.
    ///
    /// Unverified contracts yield the placeholder bundle; no error.
    pub async fn source_bundle(&self, address: &str) -> Result<BTreeMap<String, String>> {
        if !self.dirs.has_source(address) {
            match self.fetch_and_compile(address).await? {
                Fetched::Verified => {}
                Fetched::Unverified => return Ok(unverified_bundle()),
            }
        }

        self.read_source_bundle(address)
    }

    /// Returns the `{srcmap, sources}` record for `address`.
    ///
    /// Unverified contracts yield a placeholder record pointing at the
    /// placeholder bundle.
    pub async fn compiled_contract(&self, address: &str) -> Result<CompiledContract> {
        if !self.dirs.has_source(address) {
            match self.fetch_and_compile(address).await? {
                Fetched::Verified => {}
                Fetched::Unverified => return Ok(unverified_record()),
            }
        }

        let path = self.dirs.compiled_file(address);
        let Ok(raw) = fs::read(&path) else {
            // Source was cached by an older run that never finished the
            // compile step; treat the record as absent.
            warn!("No compiled record for {address} at {}", path.display());
            return Ok(CompiledContract::default());
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn fetch_and_compile(&self, address: &str) -> Result<Fetched> {
        let info = match self.etherscan.get_source_code_info(address).await {
            Ok(info) => info,
            Err(e) => {
                info!("Treating {address} as unverified: {e}");
                return Ok(Fetched::Unverified);
            }
        };

        self.save_source_code(&info, address)?;
        compiler::compile_contract(&self.dirs, &info, address).await?;
        Ok(Fetched::Verified)
    }

    fn save_source_code(&self, info: &SourceCodeInfo, address: &str) -> Result<()> {
        fs::create_dir_all(self.dirs.sources_dir())?;
        let path = self.dirs.source_file(address, info.is_standard_json);
        fs::write(&path, &info.source_code)?;
        info!("Saved source for {address} to {}", path.display());
        Ok(())
    }

    fn read_source_bundle(&self, address: &str) -> Result<BTreeMap<String, String>> {
        let standard_json_path = self.dirs.source_file(address, true);

        if standard_json_path.is_file() {
            let raw = fs::read(&standard_json_path)?;
            let input: StandardJsonInput = serde_json::from_slice(&raw)?;
            return Ok(input
                .sources
                .into_iter()
                .map(|(path, source)| (path, source.content))
                .collect());
        }

        let source = fs::read_to_string(self.dirs.source_file(address, false))?;
        Ok(BTreeMap::from([(format!("{address}.sol"), source)]))
    }
}

enum Fetched {
    Verified,
    Unverified,
}

/// The placeholder bundle served for unverified contracts.
pub fn unverified_bundle() -> BTreeMap<String, String> {
    BTreeMap::from([(UNVERIFIED_FILE.to_string(), UNVERIFIED_NOTICE.to_string())])
}

/// The placeholder compiled record served for unverified contracts.
pub fn unverified_record() -> CompiledContract {
    CompiledContract {
        srcmap: String::new(),
        sources: BTreeMap::from([("0".to_string(), UNVERIFIED_FILE.to_string())]),
    }
}

/// True when `bundle` is the unverified placeholder.
pub fn is_unverified_bundle(bundle: &BTreeMap<String, String>) -> bool {
    bundle.len() == 1
        && bundle
            .get(UNVERIFIED_FILE)
            .is_some_and(|content| content.contains("No source code available"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

    async fn store_with_failing_explorer(tmp: &TempDir) -> (SourceStore, MockServer) {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "0",
                "message": "NOTOK",
                "result": "Contract source code not verified"
            })))
            .mount(&mock)
            .await;

        let etherscan = Arc::new(EtherscanClient::new(mock.uri(), 1, "key").unwrap());
        (SourceStore::new(DataDir::new(Some(tmp.path())), etherscan), mock)
    }

    #[tokio::test]
    async fn unverified_lookup_degrades_to_the_placeholder() {
        let tmp = TempDir::new().unwrap();
        let (store, _explorer) = store_with_failing_explorer(&tmp).await;

        let bundle = store.source_bundle("0xdead").await.unwrap();
        assert_eq!(bundle, unverified_bundle());
        assert!(is_unverified_bundle(&bundle));

        let record = store.compiled_contract("0xdead").await.unwrap();
        assert_eq!(record.srcmap, "");
        assert_eq!(record.sources.get("0").unwrap(), UNVERIFIED_FILE);
    }

    #[tokio::test]
    async fn cached_single_file_source_is_read_back() {
        let tmp = TempDir::new().unwrap();
        let (store, _explorer) = store_with_failing_explorer(&tmp).await;
        store.dirs().ensure_layout().unwrap();

        fs::write(store.dirs().source_file("0xc0de", false), "contract A {}").unwrap();

        let bundle = store.source_bundle("0xc0de").await.unwrap();
        assert_eq!(bundle.get("0xc0de.sol").unwrap(), "contract A {}");
    }

    #[tokio::test]
    async fn cached_standard_json_source_is_split_per_file() {
        let tmp = TempDir::new().unwrap();
        let (store, _explorer) = store_with_failing_explorer(&tmp).await;
        store.dirs().ensure_layout().unwrap();

        let input = json!({
            "language": "Solidity",
            "sources": {
                "contracts/Token.sol": { "content": "contract Token {}" },
                "lib/Math.sol": { "content": "library Math {}" }
            }
        });
        fs::write(store.dirs().source_file("0xbeef", true), input.to_string()).unwrap();

        let bundle = store.source_bundle("0xbeef").await.unwrap();
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.get("contracts/Token.sol").unwrap(), "contract Token {}");
        assert_eq!(bundle.get("lib/Math.sol").unwrap(), "library Math {}");
    }

    #[tokio::test]
    async fn cached_source_without_record_yields_an_empty_record() {
        let tmp = TempDir::new().unwrap();
        let (store, _explorer) = store_with_failing_explorer(&tmp).await;
        store.dirs().ensure_layout().unwrap();

        fs::write(store.dirs().source_file("0xc0de", false), "contract A {}").unwrap();

        let record = store.compiled_contract("0xc0de").await.unwrap();
        assert_eq!(record.srcmap, "");
        assert!(record.sources.is_empty());
    }
}

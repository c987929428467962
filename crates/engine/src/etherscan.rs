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

//! Block-explorer client for verified source and ABI lookup.
//!
//! Rate limiting shows up either as HTTP 429 or as the literal result text
//! `"Max rate limit reached"`; both are retried transparently after a short
//! back-off, so callers only ever see genuine failures.

use forkscope_common::SourceCodeInfo;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Default public endpoint of the Etherscan v2 API.
pub const DEFAULT_API_URL: &str = "https://api.etherscan.io/v2/api";

const RATE_LIMIT_MARKER: &str = "Max rate limit reached";
const RATE_LIMIT_BACKOFF: Duration = Duration::from_millis(500);

/// Errors from the block-explorer client.
#[derive(Debug, Error)]
pub enum ExplorerError {
    /// The explorer reported a non-OK status (rate limiting excluded, which
    /// is retried internally).
    #[error("explorer request failed: {0}")]
    Failed(String),

    /// Transport failure reaching the explorer.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

// Internal-only marker so the retry loop can tell back-off from failure.
#[derive(Debug)]
enum FetchError {
    RateLimited,
    Other(ExplorerError),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Other(e.into())
    }
}

#[derive(Debug, Deserialize)]
struct SourceCodeResponse {
    status: String,
    message: String,
    result: Vec<SourceCodeResult>,
}

#[derive(Debug, Deserialize)]
struct SourceCodeResult {
    #[serde(rename = "SourceCode", default)]
    source_code: String,
    #[serde(rename = "ContractName", default)]
    contract_name: String,
    #[serde(rename = "CompilerVersion", default)]
    compiler_version: String,
    #[serde(rename = "OptimizationUsed", default)]
    optimization_used: String,
    #[serde(rename = "Runs", default)]
    runs: String,
    #[serde(rename = "EVMVersion", default)]
    evm_version: String,
}

// Shape the explorer uses for errors and for `getabi` responses.
#[derive(Debug, Deserialize)]
struct TextResponse {
    status: String,
    message: String,
    #[serde(default)]
    result: String,
}

/// HTTP client for the block-explorer contract API.
#[derive(Debug, Clone)]
pub struct EtherscanClient {
    client: reqwest::Client,
    api_url: String,
    chain_id: u64,
    api_key: String,
}

impl EtherscanClient {
    /// New client against `api_url` for `chain_id`.
    pub fn new(
        api_url: impl Into<String>,
        chain_id: u64,
        api_key: impl Into<String>,
    ) -> Result<Self, ExplorerError> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, api_url: api_url.into(), chain_id, api_key: api_key.into() })
    }

    /// Fetches the verified-source bundle and compiler settings for
    /// `address`, retrying through rate limits.
    pub async fn get_source_code_info(
        &self,
        address: &str,
    ) -> Result<SourceCodeInfo, ExplorerError> {
        loop {
            match self.fetch_source_code(address).await {
                Ok(info) => return Ok(info),
                Err(FetchError::RateLimited) => {
                    debug!("Explorer rate limit hit, backing off");
                    sleep(RATE_LIMIT_BACKOFF).await;
                }
                Err(FetchError::Other(e)) => return Err(e),
            }
        }
    }

    /// Fetches the ABI JSON for `address`, retrying through rate limits.
    pub async fn get_abi(&self, address: &str) -> Result<String, ExplorerError> {
        loop {
            match self.fetch_abi(address).await {
                Ok(abi) => return Ok(abi),
                Err(FetchError::RateLimited) => {
                    debug!("Explorer rate limit hit, backing off");
                    sleep(RATE_LIMIT_BACKOFF).await;
                }
                Err(FetchError::Other(e)) => return Err(e),
            }
        }
    }

    fn action_url(&self, action: &str, address: &str) -> String {
        format!(
            "{}?chainid={}&module=contract&action={}&address={}&apikey={}",
            self.api_url, self.chain_id, action, address, self.api_key
        )
    }

    async fn fetch_source_code(&self, address: &str) -> Result<SourceCodeInfo, FetchError> {
        let response = self.client.get(self.action_url("getsourcecode", address)).send().await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        let body = response.text().await?;

        let parsed: SourceCodeResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            // Errors come back with a plain-string result; sniff those
            // before giving up on the body.
            Err(_) => {
                let error: TextResponse = serde_json::from_str(&body)
                    .map_err(|e| FetchError::Other(ExplorerError::Failed(e.to_string())))?;
                if error.result == RATE_LIMIT_MARKER {
                    return Err(FetchError::RateLimited);
                }
                return Err(FetchError::Other(ExplorerError::Failed(error.result)));
            }
        };

        let Some(first) = parsed.result.first() else {
            return Err(FetchError::Other(ExplorerError::Failed(
                "failed to get source code".to_string(),
            )));
        };

        if parsed.status != "1" || parsed.message != "OK" || first.source_code.is_empty() {
            warn!("Explorer returned no verified source for {address}");
            return Err(FetchError::Other(ExplorerError::Failed(
                "failed to get source code".to_string(),
            )));
        }

        // Standard-JSON blobs arrive wrapped in an extra pair of braces.
        let mut source_code = first.source_code.clone();
        let mut is_standard_json = false;
        if source_code.starts_with('{') && source_code.len() >= 2 {
            source_code = source_code[1..source_code.len() - 1].to_string();
            is_standard_json = true;
        }

        Ok(SourceCodeInfo {
            source_code,
            contract_name: first.contract_name.clone(),
            compiler_version: first.compiler_version.clone(),
            optimization_used: first.optimization_used.clone(),
            runs: first.runs.clone(),
            evm_version: first.evm_version.clone(),
            is_standard_json,
        })
    }

    async fn fetch_abi(&self, address: &str) -> Result<String, FetchError> {
        let response = self.client.get(self.action_url("getabi", address)).send().await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }

        let parsed: TextResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Other(ExplorerError::Failed(e.to_string())))?;

        if parsed.status != "1" || parsed.message != "OK" {
            if parsed.result == RATE_LIMIT_MARKER {
                return Err(FetchError::RateLimited);
            }
            return Err(FetchError::Other(ExplorerError::Failed(parsed.result)));
        }

        Ok(parsed.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{method, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn client_for(mock: &MockServer) -> EtherscanClient {
        EtherscanClient::new(mock.uri(), 1, "test-key").unwrap()
    }

    #[tokio::test]
    async fn single_file_source_is_returned_verbatim() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("action", "getsourcecode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "1",
                "message": "OK",
                "result": [{
                    "SourceCode": "contract Token {}",
                    "ContractName": "Token",
                    "CompilerVersion": "v0.8.19+commit.7dd6d404",
                    "OptimizationUsed": "1",
                    "Runs": "200",
                    "EVMVersion": "Default"
                }]
            })))
            .mount(&mock)
            .await;

        let info = client_for(&mock).get_source_code_info("0xabc").await.unwrap();
        assert_eq!(info.source_code, "contract Token {}");
        assert_eq!(info.contract_name, "Token");
        assert!(!info.is_standard_json);
    }

    #[tokio::test]
    async fn standard_json_blob_loses_its_outer_braces() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "1",
                "message": "OK",
                "result": [{
                    "SourceCode": "{{\"language\":\"Solidity\",\"sources\":{}}}",
                    "ContractName": "Token",
                    "CompilerVersion": "v0.8.19+commit.7dd6d404",
                    "OptimizationUsed": "0",
                    "Runs": "0",
                    "EVMVersion": "Default"
                }]
            })))
            .mount(&mock)
            .await;

        let info = client_for(&mock).get_source_code_info("0xabc").await.unwrap();
        assert!(info.is_standard_json);
        assert_eq!(info.source_code, "{\"language\":\"Solidity\",\"sources\":{}}");
    }

    #[tokio::test]
    async fn rate_limited_requests_are_retried() {
        let mock = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "0",
                "message": "NOTOK",
                "result": "Max rate limit reached"
            })))
            .up_to_n_times(2)
            .mount(&mock)
            .await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "1",
                "message": "OK",
                "result": "[]"
            })))
            .mount(&mock)
            .await;

        let abi = client_for(&mock).get_abi("0xabc").await.unwrap();
        assert_eq!(abi, "[]");
    }

    #[tokio::test]
    async fn http_429_counts_as_rate_limiting() {
        let mock = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&mock)
            .await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "1",
                "message": "OK",
                "result": "[]"
            })))
            .mount(&mock)
            .await;

        let abi = client_for(&mock).get_abi("0xabc").await.unwrap();
        assert_eq!(abi, "[]");
    }

    #[tokio::test]
    async fn unverified_contracts_fail_with_the_explorer_text() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "0",
                "message": "NOTOK",
                "result": "Contract source code not verified"
            })))
            .mount(&mock)
            .await;

        let err = client_for(&mock).get_abi("0xabc").await.unwrap_err();
        assert!(matches!(err, ExplorerError::Failed(msg) if msg.contains("not verified")));
    }

    #[tokio::test]
    async fn empty_source_is_a_failure() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "1",
                "message": "OK",
                "result": [{
                    "SourceCode": "",
                    "ContractName": "",
                    "CompilerVersion": "",
                    "OptimizationUsed": "",
                    "Runs": "",
                    "EVMVersion": ""
                }]
            })))
            .mount(&mock)
            .await;

        assert!(client_for(&mock).get_source_code_info("0xabc").await.is_err());
    }
}

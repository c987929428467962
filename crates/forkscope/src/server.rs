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

//! Thin HTTP surface.
//!
//! Parameter parsing and delegation only; all behavior lives in the forkd
//! and engine crates.

use alloy_primitives::U256;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use eyre::Result;
use forkscope_engine::{BalanceProbe, Debugger};
use forkscope_forkd::{ForkManager, ForkRpcClient};
use serde::Serialize;
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

const DEFAULT_FORK_DURATION_MINUTES: u64 = 30;

/// Service components shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Fork pool manager.
    pub manager: Arc<ForkManager>,
    /// Typed RPC client over the pool.
    pub rpc: ForkRpcClient,
    /// ERC-20 balance probe.
    pub probe: BalanceProbe,
    /// Trace-to-source debugger.
    pub debugger: Debugger,
}

#[derive(Debug, Serialize)]
struct HttpError {
    message: String,
    status: u16,
}

fn http_error(status: StatusCode, message: &str) -> Response {
    let body = HttpError { message: message.to_string(), status: status.as_u16() };
    (status, Json(body)).into_response()
}

/// Builds the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/fork", post(create_fork))
        .route("/fork/{fork_id}", delete(delete_fork))
        .route("/fork/rpc/{fork_id}", post(forward_rpc))
        .route("/fork/getBalance/{fork_id}", post(get_balance))
        .route("/fork/setBalance/{fork_id}", post(set_balance))
        .route("/fork/getERC20Balance/{fork_id}", post(get_erc20_balance))
        .route("/fork/setERC20Balance/{fork_id}", post(set_erc20_balance))
        .route("/debug/getSourceCode", get(get_source_code))
        .route("/debug/contractsCalled/{fork_id}", get(contracts_called))
        .route("/debug/debugTransaction/{fork_id}", get(debug_transaction))
        .route("/simulate/simulateRawTx", post(simulate_raw_tx))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .with_state(state)
}

/// Serves the HTTP surface until the listener fails.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Forkscope listening on {addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn create_fork(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let minutes = match params.get("forkDuration") {
        None => DEFAULT_FORK_DURATION_MINUTES,
        Some(raw) => match raw.parse::<u64>() {
            Ok(minutes) => minutes,
            Err(_) => return http_error(StatusCode::BAD_REQUEST, "Invalid fork duration"),
        },
    };

    let fork_id = match state.manager.create_fork(Duration::from_secs(minutes * 60)) {
        Ok(fork_id) => fork_id,
        Err(e) => {
            warn!("Fork creation failed: {e}");
            return http_error(StatusCode::INTERNAL_SERVER_ERROR, "Fork creation failed");
        }
    };

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");

    (
        StatusCode::CREATED,
        Json(json!({
            "forkId": fork_id,
            "rpcUrl": format!("http://{host}/fork/rpc/{fork_id}"),
        })),
    )
        .into_response()
}

async fn delete_fork(State(state): State<AppState>, Path(fork_id): Path<String>) -> Response {
    match state.manager.delete_fork(&fork_id) {
        Ok(()) => Json(format!("Successfully deleted fork: {fork_id}")).into_response(),
        Err(e) => {
            warn!("Fork deletion failed: {e}");
            http_error(StatusCode::INTERNAL_SERVER_ERROR, "Fork deletion failed")
        }
    }
}

async fn forward_rpc(
    State(state): State<AppState>,
    Path(fork_id): Path<String>,
    body: Bytes,
) -> Response {
    match state.rpc.send_raw(&fork_id, body.to_vec()).await {
        Ok((status, body)) => {
            let status = StatusCode::from_u16(status.as_u16())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        Err(e) => {
            warn!("RPC forwarding failed: {e}");
            http_error(StatusCode::INTERNAL_SERVER_ERROR, "Error forwarding request")
        }
    }
}

async fn get_balance(
    State(state): State<AppState>,
    Path(fork_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(address) = params.get("address") else {
        return http_error(StatusCode::BAD_REQUEST, "Missing address");
    };

    let balance_hex = match state.rpc.get_balance(&fork_id, address).await {
        Ok(balance_hex) => balance_hex,
        Err(e) => {
            warn!("Balance lookup failed: {e}");
            return http_error(StatusCode::INTERNAL_SERVER_ERROR, "Error getting balance");
        }
    };

    let Ok(balance) = U256::from_str_radix(balance_hex.trim_start_matches("0x"), 16) else {
        return http_error(StatusCode::INTERNAL_SERVER_ERROR, "Error parsing balance");
    };

    // A bare decimal integer is a valid JSON document.
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        balance.to_string(),
    )
        .into_response()
}

async fn set_balance(
    State(state): State<AppState>,
    Path(fork_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let (Some(address), Some(balance)) = (params.get("address"), params.get("balance")) else {
        return http_error(StatusCode::BAD_REQUEST, "Missing address or balance");
    };

    match state.rpc.set_balance(&fork_id, address, balance).await {
        Ok(()) => Json("Balance changed successfully!").into_response(),
        Err(e) => {
            warn!("Balance update failed: {e}");
            http_error(StatusCode::INTERNAL_SERVER_ERROR, "Error setting balance")
        }
    }
}

async fn get_erc20_balance(
    State(state): State<AppState>,
    Path(fork_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let (Some(address), Some(token)) = (params.get("address"), params.get("tokenAddress")) else {
        return http_error(StatusCode::BAD_REQUEST, "Missing address or tokenAddress");
    };

    match state.probe.get_erc20_balance(&fork_id, token, address).await {
        Ok(balance) => Json(balance).into_response(),
        Err(e) => {
            warn!("ERC20 balance lookup failed: {e}");
            http_error(StatusCode::INTERNAL_SERVER_ERROR, "Error getting ERC20 balance")
        }
    }
}

async fn set_erc20_balance(
    State(state): State<AppState>,
    Path(fork_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let (Some(address), Some(token), Some(balance)) =
        (params.get("address"), params.get("tokenAddress"), params.get("balance"))
    else {
        return http_error(StatusCode::BAD_REQUEST, "Missing address, tokenAddress, or balance");
    };

    match state.probe.set_erc20_balance(&fork_id, address, token, balance).await {
        Ok(()) => Json(format!("Balance successfully changed to: {balance}")).into_response(),
        Err(e) => {
            warn!("ERC20 balance update failed: {e}");
            http_error(StatusCode::INTERNAL_SERVER_ERROR, "Error setting ERC20 balance")
        }
    }
}

async fn get_source_code(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(address) = params.get("contractAddress") else {
        return http_error(StatusCode::BAD_REQUEST, "Missing contractAddress");
    };

    match state.debugger.store().source_bundle(address).await {
        Ok(bundle) => Json(bundle).into_response(),
        Err(e) => {
            warn!("Source lookup failed: {e}");
            http_error(StatusCode::INTERNAL_SERVER_ERROR, "Error getting source code")
        }
    }
}

async fn contracts_called(
    State(state): State<AppState>,
    Path(fork_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(tx_hash) = params.get("txHash") else {
        return http_error(StatusCode::BAD_REQUEST, "Missing txHash");
    };

    match state.debugger.contracts_called(&fork_id, tx_hash).await {
        Ok(contracts) => Json(contracts).into_response(),
        Err(e) => {
            warn!("Contracts-called resolution failed: {e}");
            http_error(StatusCode::INTERNAL_SERVER_ERROR, "Error getting contracts called")
        }
    }
}

async fn debug_transaction(
    State(state): State<AppState>,
    Path(fork_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(tx_hash) = params.get("txHash") else {
        return http_error(StatusCode::BAD_REQUEST, "Missing txHash");
    };

    match state.debugger.debug_transaction(&fork_id, tx_hash).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            warn!("Transaction debugging failed: {e}");
            http_error(StatusCode::INTERNAL_SERVER_ERROR, "Error debugging transaction")
        }
    }
}

async fn simulate_raw_tx(State(state): State<AppState>, body: Bytes) -> Response {
    match state.debugger.simulate_raw_tx(body.to_vec()).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            warn!("Raw transaction simulation failed: {e}");
            http_error(StatusCode::INTERNAL_SERVER_ERROR, "Error simulating raw transaction")
        }
    }
}

// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use url::Url;

pub fn init_for_testing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Serves `router` on an ephemeral loopback port and returns its base url.
pub async fn run_mock_server(router: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tracing::info!("Starting mock server at {}", address);
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{address}/").parse().unwrap()
}

/// Signer service answering every `sign_and_submit` with `status` and `body`.
/// `account` always reports `0xa11ce`.
pub fn signer_router(status: u16, body: Value) -> Router {
    let status = StatusCode::from_u16(status).unwrap();
    Router::new()
        .route(
            "/sign_and_submit",
            post(move |Json(_payload): Json<Value>| {
                let body = body.clone();
                async move { (status, Json(body)) }
            }),
        )
        .route(
            "/account",
            get(|| async { Json(json!({"address": "0xa11ce"})) }),
        )
}

type ViewResponse = Result<Value, (u16, Value)>;

#[derive(Default)]
struct MockLedgerNodeInner {
    views: HashMap<String, ViewResponse>,
    view_requests: Vec<Value>,
    // None answers 404; the last entry repeats
    transactions: HashMap<String, VecDeque<Option<Value>>>,
    account_transactions: HashMap<String, Vec<Value>>,
    mint_requests: Vec<(String, u64)>,
}

/// Ledger REST node with scripted responses.
#[derive(Clone, Default)]
pub struct MockLedgerNode {
    inner: Arc<Mutex<MockLedgerNodeInner>>,
}

impl MockLedgerNode {
    pub fn set_view(&self, function: &str, response: ViewResponse) {
        self.inner
            .lock()
            .unwrap()
            .views
            .insert(function.to_string(), response);
    }

    pub fn push_transaction(&self, hash: &str, response: Option<Value>) {
        self.inner
            .lock()
            .unwrap()
            .transactions
            .entry(hash.to_string())
            .or_default()
            .push_back(response);
    }

    /// Transactions listed for `address`, oldest first.
    pub fn set_account_transactions(&self, address: &str, transactions: Vec<Value>) {
        self.inner
            .lock()
            .unwrap()
            .account_transactions
            .insert(address.to_string(), transactions);
    }

    pub fn mint_requests(&self) -> Vec<(String, u64)> {
        self.inner.lock().unwrap().mint_requests.clone()
    }

    pub fn view_requests(&self) -> Vec<Value> {
        self.inner.lock().unwrap().view_requests.clone()
    }

    fn view(&self, request: Value) -> Response {
        let mut inner = self.inner.lock().unwrap();
        let function = request["function"]
            .as_str()
            .and_then(|f| f.rsplit("::").next())
            .unwrap_or_default()
            .to_string();
        inner.view_requests.push(request);
        match inner.views.get(&function) {
            Some(Ok(value)) => Json(value.clone()).into_response(),
            Some(Err((status, body))) => {
                (StatusCode::from_u16(*status).unwrap(), Json(body.clone())).into_response()
            }
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({"message": format!("function {function} not found")})),
            )
                .into_response(),
        }
    }

    fn account_transactions(&self, address: &str, limit: usize) -> Response {
        let inner = self.inner.lock().unwrap();
        match inner.account_transactions.get(address) {
            Some(txns) => {
                let skip = txns.len().saturating_sub(limit);
                Json(Value::Array(txns[skip..].to_vec())).into_response()
            }
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({"message": format!("account {address} not found")})),
            )
                .into_response(),
        }
    }

    // Every mint commits right away
    fn mint(&self, address: String, amount: u64) -> Response {
        let mut inner = self.inner.lock().unwrap();
        let hash = format!("0xf00d{:x}", inner.mint_requests.len());
        inner.mint_requests.push((address, amount));
        inner.transactions.insert(
            hash.clone(),
            VecDeque::from([Some(json!({
                "type": "user_transaction",
                "hash": hash,
                "version": "1001",
                "success": true,
                "vm_status": "Executed successfully"
            }))]),
        );
        Json(json!([hash])).into_response()
    }

    fn transaction(&self, hash: &str) -> Response {
        let mut inner = self.inner.lock().unwrap();
        let next = match inner.transactions.get_mut(hash) {
            Some(queue) if queue.len() > 1 => queue.pop_front().flatten(),
            Some(queue) => queue.front().cloned().flatten(),
            None => None,
        };
        match next {
            Some(txn) => Json(txn).into_response(),
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({"message": format!("transaction {hash} not found")})),
            )
                .into_response(),
        }
    }
}

pub fn ledger_router(node: MockLedgerNode) -> Router {
    Router::new()
        .route(
            "/v1",
            get(|| async {
                Json(json!({
                    "chain_id": 4,
                    "ledger_version": "1000",
                    "block_height": "77",
                    "ledger_timestamp": "1700000000000000"
                }))
            }),
        )
        .route(
            "/v1/view",
            post(|State(node): State<MockLedgerNode>, Json(request): Json<Value>| async move {
                node.view(request)
            }),
        )
        .route(
            "/v1/transactions/by_hash/:hash",
            get(|State(node): State<MockLedgerNode>, Path(hash): Path<String>| async move {
                node.transaction(&hash)
            }),
        )
        .route(
            "/v1/accounts/:address/transactions",
            get(
                |State(node): State<MockLedgerNode>,
                 Path(address): Path<String>,
                 Query(query): Query<HashMap<String, String>>| async move {
                    let limit = query
                        .get("limit")
                        .and_then(|l| l.parse().ok())
                        .unwrap_or(25);
                    node.account_transactions(&address, limit)
                },
            ),
        )
        .route(
            "/mint",
            post(
                |State(node): State<MockLedgerNode>,
                 Query(query): Query<HashMap<String, String>>| async move {
                    let address = query.get("address").cloned().unwrap_or_default();
                    let amount = query
                        .get("amount")
                        .and_then(|a| a.parse().ok())
                        .unwrap_or_default();
                    node.mint(address, amount)
                },
            ),
        )
        .with_state(node)
}

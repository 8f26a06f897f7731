// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! REST client for the ledger node. Views go to `POST v1/view`, confirmations are
//! polled from `GET v1/transactions/by_hash/{hash}`, writes go through the signer.

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::LedgerGateway;
use crate::signer::TransactionSigner;
use crate::types::{
    value_as_u64, AccountAddress, AccountTransaction, Confirmation, EntryFunctionPayload,
    FunctionId, LedgerInfo, TransactionHandle,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const COIN_BALANCE_FUNCTION: &str = "0x1::coin::balance";
const NATIVE_COIN_TYPE: &str = "0x1::aptos_coin::AptosCoin";

#[derive(Debug, Deserialize)]
struct LedgerErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    vm_error_code: Option<u64>,
}

#[derive(Clone)]
pub struct RestLedgerClient {
    http_client: reqwest::Client,
    base_url: Url,
    module_address: AccountAddress,
    signer: Option<Arc<dyn TransactionSigner>>,
    poll_interval: Duration,
}

impl std::fmt::Debug for RestLedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestLedgerClient")
            .field("base_url", &self.base_url.as_str())
            .field("module_address", &self.module_address)
            .field("has_signer", &self.signer.is_some())
            .finish()
    }
}

impl RestLedgerClient {
    pub fn new(
        base_url: Url,
        module_address: AccountAddress,
        request_timeout: Duration,
    ) -> GatewayResult<Self> {
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(16)
            .connect_timeout(Duration::from_secs(2))
            .timeout(request_timeout)
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http_client,
            base_url: with_trailing_slash(base_url),
            module_address,
            signer: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_signer(mut self, signer: Arc<dyn TransactionSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn signer(&self) -> Option<&Arc<dyn TransactionSigner>> {
        self.signer.as_ref()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> GatewayResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::InvalidResponse(format!("bad ledger url: {e}")))
    }

    async fn ledger_error(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if is_transient_status(status) {
            return GatewayError::Network(format!("ledger node returned {status}: {text}"));
        }
        match serde_json::from_str::<LedgerErrorBody>(&text) {
            Ok(body) => GatewayError::Ledger {
                message: body.message,
                error_code: body.error_code,
                vm_error_code: body.vm_error_code,
            },
            Err(_) => GatewayError::Ledger {
                message: format!("{status}: {text}"),
                error_code: None,
                vm_error_code: None,
            },
        }
    }

    /// Chain id, ledger version, block height and timestamp of the node.
    pub async fn ledger_info(&self) -> GatewayResult<LedgerInfo> {
        let url = self.endpoint("v1")?;
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::ledger_error(response).await);
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        parse_ledger_info(&body)
    }

    /// Native coin balance of `address`, in the coin's smallest unit.
    pub async fn account_balance(&self, address: &AccountAddress) -> GatewayResult<u64> {
        let request = EntryFunctionPayload {
            function: COIN_BALANCE_FUNCTION.to_string(),
            type_arguments: vec![NATIVE_COIN_TYPE.to_string()],
            arguments: vec![Value::String(address.to_string())],
        };
        let values = self.post_view(&request, "balance").await?;
        values.first().and_then(value_as_u64).ok_or_else(|| {
            GatewayError::InvalidResponse(format!("balance returned {values:?}"))
        })
    }

    /// Most recent transactions sent by `address`, oldest first, at most `limit`.
    pub async fn account_transactions(
        &self,
        address: &AccountAddress,
        limit: u16,
    ) -> GatewayResult<Vec<AccountTransaction>> {
        let mut url = self.endpoint(&format!("v1/accounts/{address}/transactions"))?;
        url.query_pairs_mut().append_pair("limit", &limit.to_string());
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        // Accounts that never sent anything are unknown to the node
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }
        if !response.status().is_success() {
            return Err(Self::ledger_error(response).await);
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let listed = body.as_array().ok_or_else(|| {
            GatewayError::InvalidResponse("account transactions is not a list".to_string())
        })?;
        Ok(listed.iter().filter_map(AccountTransaction::from_json).collect())
    }

    async fn post_view(&self, request: &EntryFunctionPayload, label: &str) -> GatewayResult<Vec<Value>> {
        let url = self.endpoint("v1/view")?;
        let response = self
            .http_client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::ledger_error(response).await);
        }
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(values)) => Ok(values),
            Ok(other) => Err(GatewayError::InvalidResponse(format!(
                "view {label} returned a non-array result: {other}"
            ))),
            Err(e) => Err(GatewayError::InvalidResponse(format!(
                "view {label} returned invalid json: {e}"
            ))),
        }
    }

    /// Logs the node we are talking to. Failures are only logged.
    pub async fn describe(&self) {
        match self.ledger_info().await {
            Ok(info) => tracing::info!(
                url = %self.base_url,
                chain_id = info.chain_id,
                ledger_version = info.ledger_version,
                block_height = info.block_height,
                "Connected to ledger node"
            ),
            Err(e) => tracing::warn!(url = %self.base_url, "Failed to read ledger info: {e}"),
        }
    }

    // None while the transaction is unknown or still pending
    async fn fetch_transaction(&self, hash: &str) -> GatewayResult<Option<Value>> {
        let url = self.endpoint(&format!("v1/transactions/by_hash/{hash}"))?;
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::ledger_error(response).await);
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        if body.get("type").and_then(Value::as_str) == Some("pending_transaction") {
            return Ok(None);
        }
        Ok(Some(body))
    }

    async fn poll_until_committed(&self, hash: &str) -> GatewayResult<Confirmation> {
        loop {
            match self.fetch_transaction(hash).await {
                Ok(Some(txn)) => return confirmation_from_transaction(hash, &txn),
                Ok(None) => {}
                // The node may drop a poll; keep going until the deadline
                Err(e) if e.is_transient() => {
                    tracing::debug!(hash, "Transient error while polling transaction: {e}");
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn parse_ledger_info(body: &Value) -> GatewayResult<LedgerInfo> {
    let field = |name: &str| {
        body.get(name)
            .and_then(value_as_u64)
            .ok_or_else(|| GatewayError::InvalidResponse(format!("ledger info missing {name}")))
    };
    let chain_id = field("chain_id")?;
    Ok(LedgerInfo {
        chain_id: u8::try_from(chain_id)
            .map_err(|_| GatewayError::InvalidResponse(format!("chain id {chain_id} out of range")))?,
        ledger_version: field("ledger_version")?,
        block_height: field("block_height")?,
        ledger_timestamp_usecs: field("ledger_timestamp")?,
    })
}

fn confirmation_from_transaction(hash: &str, txn: &Value) -> GatewayResult<Confirmation> {
    let vm_status = txn
        .get("vm_status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match txn.get("success").and_then(Value::as_bool) {
        Some(true) => Ok(Confirmation {
            hash: hash.to_string(),
            version: txn.get("version").and_then(value_as_u64),
            gas_used: txn.get("gas_used").and_then(value_as_u64),
            vm_status,
        }),
        Some(false) => Err(GatewayError::ExecutionFailed {
            hash: hash.to_string(),
            vm_status,
        }),
        None => Err(GatewayError::InvalidResponse(format!(
            "transaction {hash} has no success flag"
        ))),
    }
}

#[async_trait]
impl LedgerGateway for RestLedgerClient {
    fn module_address(&self) -> &AccountAddress {
        &self.module_address
    }

    async fn read_view(&self, function: &FunctionId, args: Vec<Value>) -> GatewayResult<Vec<Value>> {
        let request = EntryFunctionPayload::new(function, args);
        self.post_view(&request, function.function.name()).await
    }

    async fn submit(
        &self,
        function: &FunctionId,
        args: Vec<Value>,
    ) -> GatewayResult<TransactionHandle> {
        let signer = self.signer.as_ref().ok_or(GatewayError::SignerUnavailable)?;
        let payload = EntryFunctionPayload::new(function, args);
        let handle = signer.sign_and_submit(&payload).await?;
        tracing::info!(function = %function.function.name(), hash = %handle.hash, "Submitted transaction");
        Ok(handle)
    }

    async fn await_confirmation(
        &self,
        handle: &TransactionHandle,
        timeout: Duration,
    ) -> GatewayResult<Confirmation> {
        match tokio::time::timeout(timeout, self.poll_until_committed(&handle.hash)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::TimedOut(handle.hash.clone())),
        }
    }
}

// Server errors, rate limiting and request timeouts say nothing about the request itself
pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

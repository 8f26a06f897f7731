// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Test network faucet. Funding returns the mint transactions, which are then
//! confirmed like any other write.

use crate::error::{GatewayError, GatewayResult};
use crate::rest_client::is_transient_status;
use crate::types::{AccountAddress, TransactionHandle};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// One coin, in the smallest unit.
pub const DEFAULT_FUND_AMOUNT: u64 = 100_000_000;

#[derive(Clone, Debug)]
pub struct FaucetClient {
    http_client: reqwest::Client,
    base_url: Url,
}

impl FaucetClient {
    pub fn new(base_url: Url, request_timeout: Duration) -> GatewayResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Mints `amount` to `address`, creating the account if needed.
    pub async fn fund(
        &self,
        address: &AccountAddress,
        amount: u64,
    ) -> GatewayResult<Vec<TransactionHandle>> {
        let mut url = self
            .base_url
            .join("mint")
            .map_err(|e| GatewayError::InvalidResponse(format!("bad faucet url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("amount", &amount.to_string())
            .append_pair("address", address.as_str());
        let response = self
            .http_client
            .post(url)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("faucet returned {status}: {text}");
            return Err(if is_transient_status(status) {
                GatewayError::Network(message)
            } else {
                GatewayError::Ledger {
                    message,
                    error_code: None,
                    vm_error_code: None,
                }
            });
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("faucet response: {e}")))?;
        let hashes = body
            .as_array()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("faucet returned {body}")))?;
        let handles: Vec<TransactionHandle> = hashes
            .iter()
            .filter_map(Value::as_str)
            .map(|hash| TransactionHandle {
                hash: hash.to_string(),
            })
            .collect();
        tracing::info!(address = %address.short(), amount, txns = handles.len(), "Faucet funded account");
        Ok(handles)
    }
}

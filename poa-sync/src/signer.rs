// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! External signing. Private keys never enter this process; a signer service
//! (wallet bridge) signs and submits the payload on the user's behalf.

use crate::error::{GatewayError, GatewayResult};
use crate::rest_client::is_transient_status;
use crate::types::{AccountAddress, EntryFunctionPayload, TransactionHandle};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Signs `payload` as the connected account and submits it to the ledger.
    async fn sign_and_submit(&self, payload: &EntryFunctionPayload)
        -> GatewayResult<TransactionHandle>;

    /// Account currently connected in the signer.
    async fn account_address(&self) -> GatewayResult<AccountAddress>;
}

#[derive(Debug, Deserialize)]
struct SignerErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignerAccount {
    address: String,
}

/// Talks to a signer service over HTTP:
/// `POST {url}/sign_and_submit` and `GET {url}/account`.
#[derive(Clone, Debug)]
pub struct HttpSigner {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpSigner {
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

    fn endpoint(&self, path: &str) -> GatewayResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::InvalidResponse(format!("bad signer url: {e}")))
    }

    async fn error_from_response(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: Option<SignerErrorBody> = serde_json::from_str(&text).ok();
        let (message, error_code) = match body {
            Some(body) => (body.message, body.error_code),
            None => (text, None),
        };
        if error_code.as_deref() == Some("USER_REJECTED")
            || message.to_ascii_lowercase().contains("user rejected")
        {
            return GatewayError::UserRejected;
        }
        if is_transient_status(status) {
            return GatewayError::Network(format!("signer returned {status}: {message}"));
        }
        GatewayError::Ledger {
            message,
            error_code,
            vm_error_code: None,
        }
    }
}

#[async_trait]
impl TransactionSigner for HttpSigner {
    async fn sign_and_submit(
        &self,
        payload: &EntryFunctionPayload,
    ) -> GatewayResult<TransactionHandle> {
        let url = self.endpoint("sign_and_submit")?;
        tracing::debug!(function = %payload.function, "Sending payload to signer");
        let response = self
            .http_client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        response
            .json::<TransactionHandle>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("signer response: {e}")))
    }

    async fn account_address(&self) -> GatewayResult<AccountAddress> {
        let url = self.endpoint("account")?;
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        let account = response
            .json::<SignerAccount>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("signer account: {e}")))?;
        account
            .address
            .parse()
            .map_err(|e| GatewayError::InvalidResponse(format!("signer account: {e}")))
    }
}

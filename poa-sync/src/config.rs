// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::budget::RequestBudget;
use crate::controller::SyncController;
use crate::faucet::FaucetClient;
use crate::metered_gateway::MeteredGateway;
use crate::metrics::SyncMetrics;
use crate::rest_client::RestLedgerClient;
use crate::signer::{HttpSigner, TransactionSigner};
use crate::types::AccountAddress;
use anyhow::{anyhow, Context};
use poa_config::Config;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

pub const MAX_CONCURRENT_REQUESTS_LIMIT: usize = 32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Devnet,
    Testnet,
    Mainnet,
    // Requires an explicit ledger-rpc-url
    Local,
}

impl Network {
    pub fn default_rpc_url(&self) -> Option<&'static str> {
        match self {
            Network::Devnet => Some("https://fullnode.devnet.aptoslabs.com"),
            Network::Testnet => Some("https://fullnode.testnet.aptoslabs.com"),
            Network::Mainnet => Some("https://fullnode.mainnet.aptoslabs.com"),
            Network::Local => None,
        }
    }

    // Only devnet runs an open faucet
    pub fn default_faucet_url(&self) -> Option<&'static str> {
        match self {
            Network::Devnet => Some("https://faucet.devnet.aptoslabs.com"),
            Network::Testnet | Network::Mainnet | Network::Local => None,
        }
    }
}

fn default_max_concurrent_requests() -> usize {
    crate::budget::DEFAULT_MAX_CONCURRENT_REQUESTS
}

fn default_confirmation_timeout_secs() -> u64 {
    30
}

fn default_confirmation_poll_interval_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    10
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SyncClientConfig {
    #[serde(default)]
    pub network: Network,
    // Overrides the network's default node url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_rpc_url: Option<String>,
    // Address the ProofOfAttendance module is published under
    pub module_address: String,
    // Wallet bridge that signs and submits transactions. Read-only without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_url: Option<String>,
    // Overrides the network's default faucet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faucet_url: Option<String>,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_confirmation_poll_interval_ms")]
    pub confirmation_poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    // Periodic refresh for the watch loop, off when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_secs: Option<u64>,
}

impl Config for SyncClientConfig {}

pub type ClientGateway = MeteredGateway<RestLedgerClient>;

pub struct LoadedSyncConfig {
    pub client: RestLedgerClient,
    pub signer: Option<Arc<HttpSigner>>,
    pub faucet: Option<FaucetClient>,
    pub gateway: Arc<ClientGateway>,
    pub controller: SyncController<ClientGateway>,
    pub refresh_interval: Option<Duration>,
    pub confirmation_timeout: Duration,
}

impl SyncClientConfig {
    pub fn template() -> Self {
        Self {
            network: Network::Devnet,
            ledger_rpc_url: None,
            module_address: "0x1".to_string(),
            signer_url: Some("http://127.0.0.1:9100".to_string()),
            faucet_url: None,
            max_concurrent_requests: default_max_concurrent_requests(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            confirmation_poll_interval_ms: default_confirmation_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            refresh_interval_secs: Some(60),
        }
    }

    pub fn ledger_url(&self) -> anyhow::Result<Url> {
        let raw = match (&self.ledger_rpc_url, self.network.default_rpc_url()) {
            (Some(url), _) => url.as_str(),
            (None, Some(url)) => url,
            (None, None) => {
                return Err(anyhow!(
                    "ledger-rpc-url is required for network {:?}",
                    self.network
                ))
            }
        };
        parse_http_url(raw).context("Invalid ledger-rpc-url")
    }

    /// Checks the config and wires up the client, gateway and controller. Makes no network calls.
    pub fn validate(&self, metrics: Arc<SyncMetrics>) -> anyhow::Result<LoadedSyncConfig> {
        if !(1..=MAX_CONCURRENT_REQUESTS_LIMIT).contains(&self.max_concurrent_requests) {
            return Err(anyhow!(
                "max-concurrent-requests must be between 1 and {}, got {}",
                MAX_CONCURRENT_REQUESTS_LIMIT,
                self.max_concurrent_requests
            ));
        }
        if self.confirmation_timeout_secs == 0 {
            return Err(anyhow!("confirmation-timeout-secs must be positive"));
        }
        if self.confirmation_poll_interval_ms == 0 {
            return Err(anyhow!("confirmation-poll-interval-ms must be positive"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request-timeout-secs must be positive"));
        }
        if self.refresh_interval_secs == Some(0) {
            return Err(anyhow!("refresh-interval-secs must be positive when set"));
        }
        let module_address: AccountAddress = self
            .module_address
            .parse()
            .with_context(|| format!("Invalid module-address {}", self.module_address))?;
        let ledger_url = self.ledger_url()?;
        let request_timeout = Duration::from_secs(self.request_timeout_secs);

        let mut client = RestLedgerClient::new(ledger_url, module_address, request_timeout)?
            .with_poll_interval(Duration::from_millis(self.confirmation_poll_interval_ms));
        let signer = match &self.signer_url {
            Some(raw) => {
                let url = parse_http_url(raw).context("Invalid signer-url")?;
                let signer = Arc::new(HttpSigner::new(url, request_timeout)?);
                client = client.with_signer(signer.clone() as Arc<dyn TransactionSigner>);
                Some(signer)
            }
            None => None,
        };
        let faucet = match self
            .faucet_url
            .as_deref()
            .or(self.network.default_faucet_url())
        {
            Some(raw) => {
                let url = parse_http_url(raw).context("Invalid faucet-url")?;
                Some(FaucetClient::new(url, request_timeout)?)
            }
            None => None,
        };
        info!(
            network = ?self.network,
            url = %client.base_url(),
            signer = signer.is_some(),
            faucet = faucet.is_some(),
            "Validated sync client config"
        );

        let gateway = Arc::new(MeteredGateway::new(client.clone(), metrics.clone()));
        let confirmation_timeout = Duration::from_secs(self.confirmation_timeout_secs);
        let controller = SyncController::new(
            gateway.clone(),
            RequestBudget::new(self.max_concurrent_requests),
            confirmation_timeout,
            metrics,
        );
        Ok(LoadedSyncConfig {
            client,
            signer,
            faucet,
            gateway,
            controller,
            refresh_interval: self.refresh_interval_secs.map(Duration::from_secs),
            confirmation_timeout,
        })
    }
}

// Trailing slash keeps relative joins under the configured path
fn parse_http_url(raw: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(raw)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!("unsupported url scheme {}", url.scheme()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

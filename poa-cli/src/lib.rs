// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::{anyhow, Context};
use clap::*;
use poa_config::Config;
use poa_sync::config::{LoadedSyncConfig, SyncClientConfig};
use poa_sync::faucet::DEFAULT_FUND_AMOUNT;
use poa_sync::metrics::SyncMetrics;
use poa_sync::signer::TransactionSigner;
use poa_sync::snapshot::Snapshot;
use poa_sync::types::{AccountAddress, AccountTransaction};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[clap(name = "poa", rename_all = "kebab-case")]
pub struct Args {
    #[clap(subcommand)]
    pub command: PoaCommand,
}

#[derive(Parser, Debug, PartialEq, Eq)]
#[clap(rename_all = "kebab-case")]
pub enum PoaCommand {
    #[clap(name = "create-config-template")]
    CreateConfigTemplate { path: PathBuf },
    // Print the node the config points at
    #[clap(name = "info")]
    Info {
        #[clap(long = "config-path")]
        config_path: PathBuf,
    },
    // List every registered event, newest first
    #[clap(name = "events")]
    Events {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        // Account to check attendance for. Defaults to the signer's account.
        #[clap(long = "user")]
        user: Option<AccountAddress>,
        #[clap(long, default_value = "false")]
        json: bool,
    },
    // Events the user has attended
    #[clap(name = "history")]
    History {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        #[clap(long = "user")]
        user: Option<AccountAddress>,
        #[clap(long, default_value = "false")]
        json: bool,
    },
    #[clap(name = "create-event")]
    CreateEvent {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        #[clap(long = "name")]
        name: String,
    },
    #[clap(name = "claim")]
    Claim {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        #[clap(long = "organizer")]
        organizer: AccountAddress,
    },
    // Native coin balance of the account
    #[clap(name = "balance")]
    Balance {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        #[clap(long = "user")]
        user: Option<AccountAddress>,
    },
    // Fund the account from the network faucet and wait for the mint to commit
    #[clap(name = "fund")]
    Fund {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        #[clap(long = "user")]
        user: Option<AccountAddress>,
        #[clap(long = "amount", default_value_t = DEFAULT_FUND_AMOUNT)]
        amount: u64,
    },
    // Recent transactions sent by the account
    #[clap(name = "transactions")]
    Transactions {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        #[clap(long = "user")]
        user: Option<AccountAddress>,
        #[clap(long = "limit", default_value_t = 10)]
        limit: u16,
    },
    // Keep the snapshot in sync and print every new generation until ctrl-c
    #[clap(name = "watch")]
    Watch {
        #[clap(long = "config-path")]
        config_path: PathBuf,
        #[clap(long = "user")]
        user: Option<AccountAddress>,
        // Overrides refresh-interval-secs from the config
        #[clap(long = "interval-secs")]
        interval_secs: Option<u64>,
    },
}

pub fn generate_config_template_and_write_to_file(path: &Path) -> anyhow::Result<()> {
    SyncClientConfig::template()
        .save(path)
        .with_context(|| format!("Failed to write config template to {}", path.display()))
}

pub fn load_config(path: &Path, metrics: Arc<SyncMetrics>) -> anyhow::Result<LoadedSyncConfig> {
    let config = SyncClientConfig::load(path)
        .with_context(|| format!("Couldn't load config from {}", path.display()))?;
    config.validate(metrics)
}

/// `--user` wins, then the signer's account. Read-only configs without a
/// signer browse anonymously.
pub async fn resolve_user(
    explicit: Option<AccountAddress>,
    loaded: &LoadedSyncConfig,
) -> anyhow::Result<Option<AccountAddress>> {
    if explicit.is_some() {
        return Ok(explicit);
    }
    match &loaded.signer {
        Some(signer) => signer
            .account_address()
            .await
            .map(Some)
            .map_err(|e| anyhow!("Failed to read signer account: {e}")),
        None => Ok(None),
    }
}

/// Like `resolve_user` but writes need a wallet.
pub async fn require_wallet(loaded: &LoadedSyncConfig) -> anyhow::Result<AccountAddress> {
    resolve_user(None, loaded)
        .await?
        .ok_or_else(|| anyhow!("signer-url must be set in the config to submit transactions"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventLine {
    pub organizer: String,
    pub name: String,
    pub attendance_count: u64,
    pub created_at: u64,
    pub claimed: bool,
    pub claimable: bool,
    pub degraded: bool,
}

pub fn event_lines(snapshot: &Snapshot) -> Vec<EventLine> {
    snapshot
        .events_newest_first()
        .into_iter()
        .map(|event| EventLine {
            organizer: event.organizer.to_string(),
            name: event.name.clone(),
            attendance_count: event.attendance_count,
            created_at: event.created_at,
            claimed: snapshot.has_claimed(&event.organizer),
            claimable: snapshot.is_claimable(&event.organizer),
            degraded: snapshot.degraded.contains(&event.organizer),
        })
        .collect()
}

pub fn render_events(snapshot: &Snapshot) -> String {
    let lines = event_lines(snapshot);
    if lines.is_empty() {
        return "No events registered yet".to_string();
    }
    let mut out = String::new();
    for line in lines {
        let status = if line.claimed {
            "claimed"
        } else if line.claimable {
            "claimable"
        } else {
            "-"
        };
        let marker = if line.degraded { " (stale)" } else { "" };
        out.push_str(&format!(
            "{:<14} {:<9} {:>6} attendees  created {}  {}{}\n",
            short_address(&line.organizer),
            status,
            line.attendance_count,
            line.created_at,
            line.name,
            marker
        ));
    }
    out
}

pub fn render_history(snapshot: &Snapshot) -> String {
    let Some(user) = &snapshot.user else {
        return "No account selected, pass --user or configure a signer".to_string();
    };
    let summary = snapshot.attendance_summary();
    let mut out = format!("{} has {} badge(s)", user.short(), summary.total_badges);
    if let Some(latest) = summary.latest_created_at {
        out.push_str(&format!(", latest event created at {latest}"));
    }
    out.push('\n');
    for event in snapshot.attended_events() {
        out.push_str(&format!(
            "{:<14} {}\n",
            event.organizer.short(),
            event.name
        ));
    }
    out
}

/// Account reads need an address, from `--user` or the signer.
pub async fn require_account(
    explicit: Option<AccountAddress>,
    loaded: &LoadedSyncConfig,
) -> anyhow::Result<AccountAddress> {
    resolve_user(explicit, loaded)
        .await?
        .ok_or_else(|| anyhow!("pass --user or set signer-url in the config"))
}

/// Formats an amount in the smallest unit as whole coins with 8 decimals.
pub fn format_coins(amount: u64) -> String {
    format!("{}.{:08}", amount / DEFAULT_FUND_AMOUNT, amount % DEFAULT_FUND_AMOUNT)
}

pub fn render_transactions(transactions: &[AccountTransaction]) -> String {
    if transactions.is_empty() {
        return "No transactions".to_string();
    }
    let mut out = String::new();
    for txn in transactions.iter().rev() {
        out.push_str(&format!(
            "{:>10} {:<7} {} {}\n",
            txn.version.map(|v| v.to_string()).unwrap_or_default(),
            if txn.success { "ok" } else { "failed" },
            txn.hash,
            txn.function.as_deref().unwrap_or("-"),
        ));
    }
    out
}

fn short_address(raw: &str) -> String {
    raw.parse::<AccountAddress>()
        .map(|a| a.short())
        .unwrap_or_else(|_| raw.to_string())
}

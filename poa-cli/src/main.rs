// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::anyhow;
use clap::*;
use poa_cli::{
    event_lines, format_coins, generate_config_template_and_write_to_file, load_config,
    render_events, render_history, render_transactions, require_account, require_wallet,
    resolve_user, Args, PoaCommand,
};
use poa_sync::config::LoadedSyncConfig;
use poa_sync::metrics::SyncMetrics;
use poa_sync::{LedgerGateway, RefreshOutcome, SubmissionError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    match args.command {
        PoaCommand::CreateConfigTemplate { path } => {
            generate_config_template_and_write_to_file(&path)?;
            println!("Config template written to {}", path.display());
        }
        PoaCommand::Info { config_path } => {
            let loaded = load(&config_path)?;
            let info = loaded
                .client
                .ledger_info()
                .await
                .map_err(|e| anyhow!("Failed to read ledger info: {e}"))?;
            println!("Node:            {}", loaded.client.base_url());
            println!("Chain id:        {}", info.chain_id);
            println!("Ledger version:  {}", info.ledger_version);
            println!("Block height:    {}", info.block_height);
            println!("Ledger time:     {}", info.ledger_timestamp_usecs);
            match resolve_user(None, &loaded).await {
                Ok(Some(account)) => println!("Signer account:  {account}"),
                Ok(None) => println!("Signer account:  <read-only>"),
                Err(e) => println!("Signer account:  <unavailable: {e}>"),
            }
        }
        PoaCommand::Events {
            config_path,
            user,
            json,
        } => {
            let loaded = load(&config_path)?;
            let user = resolve_user(user, &loaded).await?;
            let snapshot = published(loaded.controller.connect_wallet(user).await)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&event_lines(&snapshot))?);
            } else {
                print!("{}", render_events(&snapshot));
            }
        }
        PoaCommand::History {
            config_path,
            user,
            json,
        } => {
            let loaded = load(&config_path)?;
            let user = resolve_user(user, &loaded).await?;
            let snapshot = published(loaded.controller.connect_wallet(user).await)?;
            if json {
                let attended: Vec<_> = snapshot.attended_events().into_iter().cloned().collect();
                println!("{}", serde_json::to_string_pretty(&attended)?);
            } else {
                print!("{}", render_history(&snapshot));
            }
        }
        PoaCommand::CreateEvent { config_path, name } => {
            let loaded = load(&config_path)?;
            let wallet = require_wallet(&loaded).await?;
            loaded.controller.set_wallet(Some(wallet));
            let confirmed = loaded
                .controller
                .create_event(&name)
                .await
                .map_err(report_submission_error)?;
            println!(
                "Event created in transaction {}",
                confirmed.confirmation.hash
            );
        }
        PoaCommand::Claim {
            config_path,
            organizer,
        } => {
            let loaded = load(&config_path)?;
            let wallet = require_wallet(&loaded).await?;
            // Claim checks run against a snapshot for this wallet
            published(loaded.controller.connect_wallet(Some(wallet)).await)?;
            let confirmed = loaded
                .controller
                .claim_attendance(&organizer)
                .await
                .map_err(report_submission_error)?;
            println!(
                "Attendance claimed for {} in transaction {}",
                organizer.short(),
                confirmed.confirmation.hash
            );
        }
        PoaCommand::Balance { config_path, user } => {
            let loaded = load(&config_path)?;
            let account = require_account(user, &loaded).await?;
            let balance = loaded
                .client
                .account_balance(&account)
                .await
                .map_err(|e| anyhow!("Failed to read balance: {e}"))?;
            println!("{} has {}", account.short(), format_coins(balance));
        }
        PoaCommand::Fund {
            config_path,
            user,
            amount,
        } => {
            let loaded = load(&config_path)?;
            let faucet = loaded
                .faucet
                .as_ref()
                .ok_or_else(|| anyhow!("No faucet for this network, set faucet-url in the config"))?;
            let account = require_account(user, &loaded).await?;
            let handles = faucet
                .fund(&account, amount)
                .await
                .map_err(|e| anyhow!("Faucet request failed: {e}"))?;
            for handle in &handles {
                loaded
                    .client
                    .await_confirmation(handle, loaded.confirmation_timeout)
                    .await
                    .map_err(|e| anyhow!("Funding transaction {} failed: {e}", handle.hash))?;
            }
            println!("Funded {} with {}", account.short(), format_coins(amount));
        }
        PoaCommand::Transactions {
            config_path,
            user,
            limit,
        } => {
            let loaded = load(&config_path)?;
            let account = require_account(user, &loaded).await?;
            let transactions = loaded
                .client
                .account_transactions(&account, limit)
                .await
                .map_err(|e| anyhow!("Failed to read transactions: {e}"))?;
            print!("{}", render_transactions(&transactions));
        }
        PoaCommand::Watch {
            config_path,
            user,
            interval_secs,
        } => {
            let loaded = load(&config_path)?;
            loaded.client.describe().await;
            let user = resolve_user(user, &loaded).await?;
            loaded.controller.set_wallet(user);
            let interval = interval_secs
                .map(Duration::from_secs)
                .or(loaded.refresh_interval);

            let cancel = CancellationToken::new();
            let mut generations = loaded.controller.subscribe();
            let handle = loaded.controller.spawn(cancel.clone(), interval);
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        cancel.cancel();
                        break;
                    }
                    changed = generations.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = loaded.controller.snapshot();
                        println!("-- generation {} --", snapshot.generation);
                        print!("{}", render_events(&snapshot));
                    }
                }
            }
            handle.await?;
        }
    }
    Ok(())
}

fn load(config_path: &Path) -> anyhow::Result<LoadedSyncConfig> {
    let registry = prometheus::Registry::new();
    load_config(config_path, Arc::new(SyncMetrics::new(&registry)))
}

fn published(outcome: RefreshOutcome) -> anyhow::Result<Arc<poa_sync::Snapshot>> {
    match outcome {
        RefreshOutcome::Published(snapshot) => {
            if !snapshot.degraded.is_empty() {
                tracing::warn!(
                    "{} event(s) could not be fully read and may be stale",
                    snapshot.degraded.len()
                );
            }
            Ok(snapshot)
        }
        RefreshOutcome::Discarded => Err(anyhow!("Refresh was superseded, please retry")),
        RefreshOutcome::Failed(e) => Err(anyhow!("Failed to load events: {e}")),
    }
}

fn report_submission_error(e: SubmissionError) -> anyhow::Error {
    tracing::debug!(error_type = e.error_type(), "Submission failed: {e}");
    if e.is_retryable() {
        anyhow!("{} ({e}). You can retry.", e.user_message())
    } else {
        anyhow!("{} ({e})", e.user_message())
    }
}

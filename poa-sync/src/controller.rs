// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Orchestrates refresh cycles and owns the published snapshot.
//!
//! A cycle runs discovery, then reconciliation for the connected wallet, then
//! publishes once. Refresh requests made while a cycle for the same wallet and
//! invalidation state is running join that cycle instead of starting another.

use crate::budget::RequestBudget;
use crate::error::{GatewayError, SubmissionResult};
use crate::gateway::LedgerGateway;
use crate::metrics::SyncMetrics;
use crate::reconciler::AttendanceReconciler;
use crate::registry_reader::EventRegistryReader;
use crate::snapshot::{carry_forward, CycleKey, CycleResult, Snapshot, SnapshotStore};
use crate::submitter::{ClaimSubmitter, ConfirmedWrite};
use crate::types::AccountAddress;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshTrigger {
    Startup,
    WalletChanged,
    ClaimConfirmed,
    Periodic,
    Manual,
}

impl RefreshTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTrigger::Startup => "startup",
            RefreshTrigger::WalletChanged => "wallet_changed",
            RefreshTrigger::ClaimConfirmed => "claim_confirmed",
            RefreshTrigger::Periodic => "periodic",
            RefreshTrigger::Manual => "manual",
        }
    }
}

#[derive(Clone, Debug)]
pub enum RefreshOutcome {
    Published(Arc<Snapshot>),
    /// The wallet changed while the cycle ran, or a newer cycle already published.
    Discarded,
    /// Enumeration failed; the previous snapshot stays in place.
    Failed(GatewayError),
}

impl RefreshOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Published(_) => "published",
            RefreshOutcome::Discarded => "discarded",
            RefreshOutcome::Failed(_) => "failed",
        }
    }

    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        match self {
            RefreshOutcome::Published(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

type SharedCycle = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    id: u64,
    key: CycleKey,
    cycle: SharedCycle,
}

struct ControllerInner<G> {
    store: Arc<SnapshotStore>,
    reader: EventRegistryReader<G>,
    reconciler: AttendanceReconciler<G>,
    submitter: ClaimSubmitter<G>,
    in_flight: Mutex<Option<InFlight>>,
    next_cycle_id: AtomicU64,
    loop_running: AtomicBool,
    metrics: Arc<SyncMetrics>,
}

pub struct SyncController<G> {
    inner: Arc<ControllerInner<G>>,
}

impl<G> Clone for SyncController<G> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<G: LedgerGateway> SyncController<G> {
    pub fn new(
        gateway: Arc<G>,
        budget: RequestBudget,
        confirmation_timeout: Duration,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        let store = Arc::new(SnapshotStore::new());
        let reader = EventRegistryReader::new(gateway.clone(), budget.clone(), metrics.clone());
        let reconciler = AttendanceReconciler::new(gateway.clone(), budget, metrics.clone());
        let submitter = ClaimSubmitter::new(
            gateway,
            store.clone(),
            confirmation_timeout,
            metrics.clone(),
        );
        Self {
            inner: Arc::new(ControllerInner {
                store,
                reader,
                reconciler,
                submitter,
                in_flight: Mutex::new(None),
                next_cycle_id: AtomicU64::new(0),
                loop_running: AtomicBool::new(false),
                metrics,
            }),
        }
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.store.load()
    }

    /// Notified with the new generation every time a snapshot is published.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.store.subscribe()
    }

    pub fn wallet(&self) -> Option<AccountAddress> {
        self.inner.store.wallet()
    }

    pub fn submitter(&self) -> &ClaimSubmitter<G> {
        &self.inner.submitter
    }

    pub fn pending_claims(&self) -> BTreeSet<AccountAddress> {
        self.inner.submitter.pending_claims().snapshot()
    }

    /// Switches the connected wallet without refreshing. Cycles started for the
    /// previous wallet are discarded when they finish.
    pub fn set_wallet(&self, wallet: Option<AccountAddress>) -> bool {
        let changed = self.inner.store.set_wallet(wallet.clone());
        if changed {
            info!(
                "Wallet changed to {}",
                wallet.map(|w| w.short()).unwrap_or_else(|| "<none>".to_string())
            );
        }
        changed
    }

    /// Switches the wallet and refreshes for it.
    pub async fn connect_wallet(&self, wallet: Option<AccountAddress>) -> RefreshOutcome {
        self.set_wallet(wallet);
        self.refresh(RefreshTrigger::WalletChanged).await
    }

    /// Runs a refresh cycle, or joins the one in flight for the same wallet and
    /// invalidation state.
    pub async fn refresh(&self, trigger: RefreshTrigger) -> RefreshOutcome {
        let key = self.inner.store.cycle_key();
        let cycle = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let joined = slot
                .as_ref()
                .filter(|in_flight| in_flight.key == key)
                .map(|in_flight| in_flight.cycle.clone());
            match joined {
                Some(cycle) => {
                    debug!(trigger = trigger.as_str(), "Joining in-flight refresh");
                    self.inner.metrics.refresh_coalesced.inc();
                    cycle
                }
                None => {
                    let id = self.inner.next_cycle_id.fetch_add(1, Ordering::Relaxed);
                    let inner = self.inner.clone();
                    // Runs to completion even when every caller stops waiting
                    let handle = tokio::spawn(async move {
                        let slot = InFlightSlot { inner: &inner, id };
                        let outcome = inner.run_cycle(key, trigger).await;
                        drop(slot);
                        outcome
                    });
                    let cycle = handle.map(cycle_outcome).boxed().shared();
                    *slot = Some(InFlight {
                        id,
                        key,
                        cycle: cycle.clone(),
                    });
                    cycle
                }
            }
        };
        cycle.await
    }

    /// Creates an event and, once confirmed, refreshes.
    pub async fn create_event(&self, name: &str) -> SubmissionResult<ConfirmedWrite> {
        let confirmed = self.inner.submitter.create_event(name).await?;
        self.refresh(RefreshTrigger::ClaimConfirmed).await;
        Ok(confirmed)
    }

    /// Claims attendance and, once confirmed, refreshes.
    pub async fn claim_attendance(
        &self,
        organizer: &AccountAddress,
    ) -> SubmissionResult<ConfirmedWrite> {
        let confirmed = self.inner.submitter.claim_attendance(organizer).await?;
        self.refresh(RefreshTrigger::ClaimConfirmed).await;
        Ok(confirmed)
    }

    /// Refreshes on startup, then on every wallet change, confirmed write and
    /// optional periodic tick until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken, refresh_interval: Option<Duration>) {
        if self.inner.loop_running.swap(true, Ordering::SeqCst) {
            warn!("Sync controller loop is already running");
            return;
        }
        let _running = LoopRunning(&self.inner.loop_running);
        let mut wallet_rx = self.inner.store.subscribe_wallet();
        let _ = wallet_rx.borrow_and_update();
        let mut invalidation_rx = self.inner.store.subscribe_invalidation();
        let _ = invalidation_rx.borrow_and_update();
        let mut ticker = refresh_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        info!("Starting sync controller loop");
        self.refresh_unless_cancelled(&cancel, RefreshTrigger::Startup)
            .await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = wallet_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.refresh_unless_cancelled(&cancel, RefreshTrigger::WalletChanged).await;
                }
                changed = invalidation_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let invalidation = *invalidation_rx.borrow_and_update();
                    debug!(invalidation, "Write confirmed");
                    self.refresh_unless_cancelled(&cancel, RefreshTrigger::ClaimConfirmed).await;
                }
                _ = next_tick(&mut ticker) => {
                    self.refresh_unless_cancelled(&cancel, RefreshTrigger::Periodic).await;
                }
            }
        }
        info!("Sync controller loop stopped");
    }

    pub fn spawn(
        &self,
        cancel: CancellationToken,
        refresh_interval: Option<Duration>,
    ) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move { controller.run(cancel, refresh_interval).await })
    }

    async fn refresh_unless_cancelled(&self, cancel: &CancellationToken, trigger: RefreshTrigger) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.refresh(trigger) => {}
        }
    }
}

fn cycle_outcome(joined: Result<RefreshOutcome, JoinError>) -> RefreshOutcome {
    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        // Runtime shutting down
        Err(_) => RefreshOutcome::Discarded,
    }
}

// Frees the in-flight slot once its cycle is done, before the outcome is visible
struct InFlightSlot<'a, G> {
    inner: &'a ControllerInner<G>,
    id: u64,
}

impl<G> Drop for InFlightSlot<'_, G> {
    fn drop(&mut self) {
        let mut slot = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|in_flight| in_flight.id == self.id) {
            *slot = None;
        }
    }
}

struct LoopRunning<'a>(&'a AtomicBool);

impl Drop for LoopRunning<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl<G: LedgerGateway> ControllerInner<G> {
    async fn run_cycle(&self, key: CycleKey, trigger: RefreshTrigger) -> RefreshOutcome {
        let user = self.store.wallet();
        let outcome = self.cycle(key, user.as_ref()).await;
        self.metrics
            .refresh_cycles
            .with_label_values(&[trigger.as_str(), outcome.as_str()])
            .inc();
        match &outcome {
            RefreshOutcome::Published(snapshot) => {
                self.metrics
                    .snapshot_generation
                    .set(snapshot.generation as i64);
                self.metrics.snapshot_events.set(snapshot.events.len() as i64);
                info!(
                    trigger = trigger.as_str(),
                    generation = snapshot.generation,
                    events = snapshot.events.len(),
                    claimed = snapshot.claimed.len(),
                    degraded = snapshot.degraded.len(),
                    "Published snapshot"
                );
            }
            RefreshOutcome::Discarded => {
                info!(trigger = trigger.as_str(), "Discarded superseded refresh")
            }
            RefreshOutcome::Failed(e) => warn!(
                trigger = trigger.as_str(),
                error_type = e.error_type(),
                "Refresh failed, keeping previous snapshot: {e}"
            ),
        }
        outcome
    }

    async fn cycle(&self, key: CycleKey, user: Option<&AccountAddress>) -> RefreshOutcome {
        let discovery = match self.reader.discover_events().await {
            Ok(discovery) => discovery,
            Err(e) => return RefreshOutcome::Failed(e),
        };
        if self.store.cycle_key().wallet_epoch != key.wallet_epoch {
            return RefreshOutcome::Discarded;
        }

        let mut degraded: BTreeSet<AccountAddress> = discovery
            .events
            .failed
            .iter()
            .map(|f| f.id.clone())
            .collect();
        let previous = self.store.load();
        let (events, _) = carry_forward(
            &previous,
            user,
            &discovery.organizers,
            discovery.events.succeeded,
            BTreeSet::new(),
        );

        let report = self.reconciler.reconcile(user, &events).await;
        degraded.extend(report.unknown().into_iter().map(|f| f.id.clone()));

        let result = CycleResult {
            organizers: discovery.organizers,
            events,
            claimed: report.claimed(),
            degraded,
        };
        match self.store.publish(key, result) {
            Some(snapshot) => RefreshOutcome::Published(snapshot),
            None => RefreshOutcome::Discarded,
        }
    }
}

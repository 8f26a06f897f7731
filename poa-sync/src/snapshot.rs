// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The published view of the registry and the store that swaps it atomically.

use crate::types::{AccountAddress, EventRecord};
use arc_swap::ArcSwap;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Immutable view produced by one refresh cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub generation: u64,
    pub user: Option<AccountAddress>,
    /// At most one record per organizer, in discovery order.
    pub events: Vec<EventRecord>,
    /// Organizers the user has claimed; each one has a record in `events`.
    pub claimed: BTreeSet<AccountAddress>,
    /// Organizers whose details or attendance could not be read this cycle.
    pub degraded: BTreeSet<AccountAddress>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttendanceSummary {
    pub total_badges: usize,
    pub latest_created_at: Option<u64>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            generation: 0,
            user: None,
            events: vec![],
            claimed: BTreeSet::new(),
            degraded: BTreeSet::new(),
        }
    }

    /// Builds a snapshot, keeping the first record per organizer and dropping
    /// claims that have no record.
    pub fn new(
        generation: u64,
        user: Option<AccountAddress>,
        events: Vec<EventRecord>,
        claimed: BTreeSet<AccountAddress>,
        degraded: BTreeSet<AccountAddress>,
    ) -> Self {
        let mut seen = HashSet::new();
        let events: Vec<EventRecord> = events
            .into_iter()
            .filter(|e| seen.insert(e.organizer.clone()))
            .collect();
        let claimed = if user.is_some() {
            claimed.into_iter().filter(|o| seen.contains(o)).collect()
        } else {
            BTreeSet::new()
        };
        Self {
            generation,
            user,
            events,
            claimed,
            degraded,
        }
    }

    pub fn event(&self, organizer: &AccountAddress) -> Option<&EventRecord> {
        self.events.iter().find(|e| &e.organizer == organizer)
    }

    pub fn has_claimed(&self, organizer: &AccountAddress) -> bool {
        self.claimed.contains(organizer)
    }

    /// Whether the connected user may still try to claim `organizer`.
    pub fn is_claimable(&self, organizer: &AccountAddress) -> bool {
        match &self.user {
            Some(user) => {
                user != organizer
                    && self.event(organizer).is_some()
                    && !self.has_claimed(organizer)
            }
            None => false,
        }
    }

    pub fn events_newest_first(&self) -> Vec<&EventRecord> {
        let mut events: Vec<&EventRecord> = self.events.iter().collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events
    }

    /// Events the user attended, newest first.
    pub fn attended_events(&self) -> Vec<&EventRecord> {
        self.events_newest_first()
            .into_iter()
            .filter(|e| self.claimed.contains(&e.organizer))
            .collect()
    }

    pub fn attendance_summary(&self) -> AttendanceSummary {
        let attended = self.attended_events();
        AttendanceSummary {
            total_badges: attended.len(),
            latest_created_at: attended.first().map(|e| e.created_at),
        }
    }
}

/// Folds the previous snapshot into a fresh cycle result. Events are never
/// deleted and claims are permanent, so an organizer that is still enumerated
/// keeps its previous record when its details could not be read, attendance
/// counts never go down, and claims seen for the same user are kept.
pub fn carry_forward(
    previous: &Snapshot,
    user: Option<&AccountAddress>,
    organizers: &[AccountAddress],
    fetched: Vec<EventRecord>,
    claimed: BTreeSet<AccountAddress>,
) -> (Vec<EventRecord>, BTreeSet<AccountAddress>) {
    let mut fetched: HashMap<AccountAddress, EventRecord> = fetched
        .into_iter()
        .map(|e| (e.organizer.clone(), e))
        .collect();
    let mut events = Vec::with_capacity(organizers.len());
    for organizer in organizers {
        let prior = previous.event(organizer);
        match (fetched.remove(organizer), prior) {
            (Some(mut record), Some(prior)) => {
                record.attendance_count = record.attendance_count.max(prior.attendance_count);
                events.push(record);
            }
            (Some(record), None) => events.push(record),
            (None, Some(prior)) => events.push(prior.clone()),
            (None, None) => {}
        }
    }
    let mut claimed = claimed;
    if user.is_some() && previous.user.as_ref() == user {
        claimed.extend(previous.claimed.iter().cloned());
    }
    (events, claimed)
}

/// Everything a refresh cycle hands to the store.
#[derive(Clone, Debug, Default)]
pub struct CycleResult {
    pub organizers: Vec<AccountAddress>,
    pub events: Vec<EventRecord>,
    pub claimed: BTreeSet<AccountAddress>,
    pub degraded: BTreeSet<AccountAddress>,
}

/// Identifies the world a refresh cycle started in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleKey {
    pub wallet_epoch: u64,
    pub invalidation: u64,
}

#[derive(Debug)]
struct StoreMeta {
    wallet_epoch: u64,
    wallet: Option<AccountAddress>,
    invalidation: u64,
    // Invalidation counter of the cycle behind the current snapshot
    published_invalidation: u64,
    generation: u64,
}

/// Holds the current snapshot. Readers load it lock-free; publishing and wallet
/// changes serialize on a small mutex that is never held across an await.
pub struct SnapshotStore {
    current: ArcSwap<Snapshot>,
    meta: Mutex<StoreMeta>,
    generation_tx: watch::Sender<u64>,
    wallet_tx: watch::Sender<Option<AccountAddress>>,
    invalidation_tx: watch::Sender<u64>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (generation_tx, _) = watch::channel(0);
        let (wallet_tx, _) = watch::channel(None);
        let (invalidation_tx, _) = watch::channel(0);
        Self {
            current: ArcSwap::from_pointee(Snapshot::empty()),
            meta: Mutex::new(StoreMeta {
                wallet_epoch: 0,
                wallet: None,
                invalidation: 0,
                published_invalidation: 0,
                generation: 0,
            }),
            generation_tx,
            wallet_tx,
            invalidation_tx,
        }
    }

    pub fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn wallet(&self) -> Option<AccountAddress> {
        self.meta
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .wallet
            .clone()
    }

    pub fn cycle_key(&self) -> CycleKey {
        let meta = self.meta.lock().unwrap_or_else(PoisonError::into_inner);
        CycleKey {
            wallet_epoch: meta.wallet_epoch,
            invalidation: meta.invalidation,
        }
    }

    /// Sets the connected wallet. Returns false when it did not change.
    ///
    /// The previous user's claims are withdrawn right away by publishing the
    /// current events with an empty claim set for the new wallet.
    pub fn set_wallet(&self, wallet: Option<AccountAddress>) -> bool {
        let mut meta = self.meta.lock().unwrap_or_else(PoisonError::into_inner);
        if meta.wallet == wallet {
            return false;
        }
        meta.wallet = wallet.clone();
        meta.wallet_epoch += 1;
        meta.generation += 1;
        let previous = self.current.load();
        let snapshot = Snapshot {
            generation: meta.generation,
            user: wallet.clone(),
            events: previous.events.clone(),
            claimed: BTreeSet::new(),
            degraded: previous.degraded.clone(),
        };
        self.current.store(Arc::new(snapshot));
        self.generation_tx.send_replace(meta.generation);
        self.wallet_tx.send_replace(wallet);
        true
    }

    /// Marks in-flight cycles as outdated, e.g. after a confirmed write.
    pub fn invalidate(&self) {
        let mut meta = self.meta.lock().unwrap_or_else(PoisonError::into_inner);
        meta.invalidation += 1;
        self.invalidation_tx.send_replace(meta.invalidation);
    }

    /// Publishes the result of the cycle holding `key`, folded into the current
    /// snapshot with [`carry_forward`]. Returns `None` without publishing when the
    /// wallet changed since the cycle started, or when a cycle started after a
    /// later invalidation already published.
    pub fn publish(&self, key: CycleKey, result: CycleResult) -> Option<Arc<Snapshot>> {
        let mut meta = self.meta.lock().unwrap_or_else(PoisonError::into_inner);
        if meta.wallet_epoch != key.wallet_epoch || key.invalidation < meta.published_invalidation {
            return None;
        }
        let previous = self.current.load();
        let (events, claimed) = carry_forward(
            &previous,
            meta.wallet.as_ref(),
            &result.organizers,
            result.events,
            result.claimed,
        );
        meta.generation += 1;
        meta.published_invalidation = key.invalidation;
        let snapshot = Arc::new(Snapshot::new(
            meta.generation,
            meta.wallet.clone(),
            events,
            claimed,
            result.degraded,
        ));
        self.current.store(snapshot.clone());
        self.generation_tx.send_replace(meta.generation);
        Some(snapshot)
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }

    /// Notified with the invalidation counter. Invalidations that land before
    /// the receiver looks collapse into one change.
    pub fn subscribe_invalidation(&self) -> watch::Receiver<u64> {
        self.invalidation_tx.subscribe()
    }

    pub fn subscribe_wallet(&self) -> watch::Receiver<Option<AccountAddress>> {
        self.wallet_tx.subscribe()
    }
}

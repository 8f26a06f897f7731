// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Create-event and claim-attendance submissions.
//!
//! Every submission walks `Idle -> Validating -> Submitting ->
//! AwaitingConfirmation -> {Confirmed | Failed}`. Validation is purely local.
//! A claim holds a pending marker for its organizer from the moment it starts
//! submitting until it reaches a terminal state, so a second claim for the same
//! organizer is rejected without reaching the ledger.

use crate::error::{SubmissionError, SubmissionResult, ValidationError};
use crate::gateway::LedgerGateway;
use crate::metrics::SyncMetrics;
use crate::snapshot::SnapshotStore;
use crate::types::{AccountAddress, Confirmation, LedgerFunction, MAX_EVENT_NAME_CHARS};
use prometheus::IntGauge;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    Validating,
    Submitting,
    AwaitingConfirmation,
    Confirmed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteKind {
    CreateEvent { name: String },
    ClaimAttendance { organizer: AccountAddress },
}

impl WriteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteKind::CreateEvent { .. } => "create_event",
            WriteKind::ClaimAttendance { .. } => "claim_attendance",
        }
    }
}

/// A write that reached the ledger and committed successfully.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmedWrite {
    pub sender: AccountAddress,
    pub kind: WriteKind,
    pub confirmation: Confirmation,
}

/// Organizers with a claim in flight.
#[derive(Clone)]
pub struct PendingClaims {
    inner: Arc<Mutex<HashSet<AccountAddress>>>,
    gauge: IntGauge,
}

impl PendingClaims {
    pub fn new(gauge: IntGauge) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashSet::new())),
            gauge,
        }
    }

    pub fn contains(&self, organizer: &AccountAddress) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(organizer)
    }

    pub fn snapshot(&self) -> BTreeSet<AccountAddress> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Marks `organizer` pending. Returns `None` when it already is.
    pub fn try_begin(&self, organizer: &AccountAddress) -> Option<PendingClaimGuard> {
        let mut set = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(organizer.clone()) {
            return None;
        }
        self.gauge.set(set.len() as i64);
        Some(PendingClaimGuard {
            claims: self.clone(),
            organizer: organizer.clone(),
        })
    }
}

/// Clears the pending marker when dropped, including when the owning future is cancelled.
pub struct PendingClaimGuard {
    claims: PendingClaims,
    organizer: AccountAddress,
}

impl Drop for PendingClaimGuard {
    fn drop(&mut self) {
        let mut set = self
            .claims
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        set.remove(&self.organizer);
        self.claims.gauge.set(set.len() as i64);
    }
}

pub struct ClaimSubmitter<G> {
    gateway: Arc<G>,
    store: Arc<SnapshotStore>,
    pending: PendingClaims,
    confirmation_timeout: Duration,
    metrics: Arc<SyncMetrics>,
}

impl<G> Clone for ClaimSubmitter<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            store: self.store.clone(),
            pending: self.pending.clone(),
            confirmation_timeout: self.confirmation_timeout,
            metrics: self.metrics.clone(),
        }
    }
}

impl<G: LedgerGateway> ClaimSubmitter<G> {
    pub fn new(
        gateway: Arc<G>,
        store: Arc<SnapshotStore>,
        confirmation_timeout: Duration,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            gateway,
            store,
            pending: PendingClaims::new(metrics.pending_claims.clone()),
            confirmation_timeout,
            metrics,
        }
    }

    pub fn pending_claims(&self) -> &PendingClaims {
        &self.pending
    }

    fn transition(&self, kind: &WriteKind, from: SubmissionState, to: SubmissionState) {
        debug!(kind = kind.as_str(), "Submission {:?} -> {:?}", from, to);
    }

    fn fail(&self, kind: &WriteKind, from: SubmissionState, err: SubmissionError) -> SubmissionError {
        self.transition(kind, from, SubmissionState::Failed);
        self.metrics
            .submission_failures
            .with_label_values(&[kind.as_str(), err.error_type()])
            .inc();
        match &err {
            SubmissionError::Validation(_) | SubmissionError::UserRejected => {
                info!(kind = kind.as_str(), "Submission failed: {err}")
            }
            SubmissionError::Timeout { hash } => warn!(
                kind = kind.as_str(),
                hash = %hash,
                "Submission outcome unknown, refresh before retrying: {err}"
            ),
            _ => warn!(kind = kind.as_str(), "Submission failed: {err}"),
        }
        err
    }

    fn connected_wallet(&self) -> Result<AccountAddress, ValidationError> {
        self.store.wallet().ok_or(ValidationError::WalletNotConnected)
    }

    /// Registers an event named `name` (trimmed) for the connected account.
    pub async fn create_event(&self, name: &str) -> SubmissionResult<ConfirmedWrite> {
        let name = name.trim().to_string();
        let kind = WriteKind::CreateEvent { name: name.clone() };
        self.transition(&kind, SubmissionState::Idle, SubmissionState::Validating);

        let sender = match validate_event_name(&name).and_then(|_| self.connected_wallet()) {
            Ok(sender) => sender,
            Err(e) => return Err(self.fail(&kind, SubmissionState::Validating, e.into())),
        };
        let args = vec![json!(name.as_bytes())];
        self.submit_and_confirm(sender, kind, LedgerFunction::CreateEvent, args)
            .await
    }

    /// Claims attendance at `organizer`'s event for the connected account.
    pub async fn claim_attendance(
        &self,
        organizer: &AccountAddress,
    ) -> SubmissionResult<ConfirmedWrite> {
        let kind = WriteKind::ClaimAttendance {
            organizer: organizer.clone(),
        };
        self.transition(&kind, SubmissionState::Idle, SubmissionState::Validating);

        let (sender, _guard) = match self.validate_claim(organizer) {
            Ok(validated) => validated,
            Err(e) => return Err(self.fail(&kind, SubmissionState::Validating, e.into())),
        };
        let args = vec![json!(organizer.as_str())];
        self.submit_and_confirm(sender, kind, LedgerFunction::ClaimAttendance, args)
            .await
    }

    fn validate_claim(
        &self,
        organizer: &AccountAddress,
    ) -> Result<(AccountAddress, PendingClaimGuard), ValidationError> {
        let user = self.connected_wallet()?;
        if self.pending.contains(organizer) {
            return Err(ValidationError::ClaimPending(organizer.clone()));
        }
        if &user == organizer {
            return Err(ValidationError::SelfClaim);
        }
        let snapshot = self.store.load();
        if snapshot.user.as_ref() == Some(&user) && snapshot.has_claimed(organizer) {
            return Err(ValidationError::AlreadyClaimed(organizer.clone()));
        }
        let guard = self
            .pending
            .try_begin(organizer)
            .ok_or_else(|| ValidationError::ClaimPending(organizer.clone()))?;
        Ok((user, guard))
    }

    async fn submit_and_confirm(
        &self,
        sender: AccountAddress,
        kind: WriteKind,
        function: LedgerFunction,
        args: Vec<Value>,
    ) -> SubmissionResult<ConfirmedWrite> {
        self.transition(&kind, SubmissionState::Validating, SubmissionState::Submitting);
        self.metrics
            .submissions
            .with_label_values(&[kind.as_str()])
            .inc();
        let function_id = self.gateway.function(function);
        let handle = match self.gateway.submit(&function_id, args).await {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail(&kind, SubmissionState::Submitting, e.into())),
        };

        self.transition(
            &kind,
            SubmissionState::Submitting,
            SubmissionState::AwaitingConfirmation,
        );
        let confirmation = match self
            .gateway
            .await_confirmation(&handle, self.confirmation_timeout)
            .await
        {
            Ok(confirmation) => confirmation,
            Err(e) => {
                return Err(self.fail(&kind, SubmissionState::AwaitingConfirmation, e.into()))
            }
        };

        self.transition(
            &kind,
            SubmissionState::AwaitingConfirmation,
            SubmissionState::Confirmed,
        );
        self.metrics
            .confirmed_writes
            .with_label_values(&[kind.as_str()])
            .inc();
        info!(
            kind = kind.as_str(),
            sender = %sender.short(),
            hash = %confirmation.hash,
            "Transaction confirmed"
        );
        // Wakes the background loop, if any, and outdates in-flight cycles
        self.store.invalidate();
        Ok(ConfirmedWrite {
            sender,
            kind,
            confirmation,
        })
    }
}

fn validate_event_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    let len = name.chars().count();
    if len > MAX_EVENT_NAME_CHARS {
        return Err(ValidationError::NameTooLong { len });
    }
    Ok(())
}

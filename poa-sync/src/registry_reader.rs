// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Discovers registered events: one enumeration call for the organizer list,
//! then concurrent per-organizer detail fetches under the shared request budget.

use crate::budget::RequestBudget;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::LedgerGateway;
use crate::metrics::SyncMetrics;
use crate::types::{
    AccountAddress, EventRecord, ItemFailure, LedgerFunction, PartialResult, ReadFailureKind,
};
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one discovery pass.
#[derive(Clone, Debug, Default)]
pub struct DiscoveryReport {
    /// Every organizer the ledger enumerated, deduplicated, in enumeration order.
    pub organizers: Vec<AccountAddress>,
    /// Events whose details were fetched, in enumeration order.
    pub events: PartialResult<EventRecord>,
}

pub struct EventRegistryReader<G> {
    gateway: Arc<G>,
    budget: RequestBudget,
    metrics: Arc<SyncMetrics>,
}

impl<G> Clone for EventRegistryReader<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            budget: self.budget.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<G: LedgerGateway> EventRegistryReader<G> {
    pub fn new(gateway: Arc<G>, budget: RequestBudget, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            gateway,
            budget,
            metrics,
        }
    }

    /// Organizer addresses from `get_all_events`, first occurrence wins.
    pub async fn list_organizers(&self) -> GatewayResult<Vec<AccountAddress>> {
        let function = self.gateway.function(LedgerFunction::GetAllEvents);
        let result = self
            .budget
            .run(self.gateway.read_view(&function, vec![]))
            .await?;
        let listed = result.first().and_then(Value::as_array).ok_or_else(|| {
            GatewayError::InvalidResponse("get_all_events did not return an address list".into())
        })?;

        let mut seen = HashSet::new();
        let mut organizers = Vec::with_capacity(listed.len());
        for entry in listed {
            let parsed = entry.as_str().map(str::parse::<AccountAddress>);
            match parsed {
                Some(Ok(address)) => {
                    if seen.insert(address.clone()) {
                        organizers.push(address);
                    }
                }
                _ => warn!("Skipping unparsable organizer entry {entry}"),
            }
        }
        Ok(organizers)
    }

    /// Details of one event. A reply with fewer than three usable fields is malformed.
    pub async fn fetch_event(&self, organizer: &AccountAddress) -> Result<EventRecord, ItemFailure> {
        let function = self.gateway.function(LedgerFunction::GetEvent);
        let values = self
            .budget
            .run(
                self.gateway
                    .read_view(&function, vec![json!(organizer.as_str())]),
            )
            .await
            .map_err(|e| ItemFailure {
                id: organizer.clone(),
                kind: e.read_failure_kind(),
                message: e.to_string(),
            })?;
        EventRecord::from_view_result(organizer.clone(), &values).ok_or_else(|| ItemFailure {
            id: organizer.clone(),
            kind: ReadFailureKind::Malformed,
            message: format!("get_event returned {} usable fields", values.len()),
        })
    }

    /// Enumerates organizers and fetches every event. Individual detail failures are
    /// logged and reported in `events.failed`; only a failed enumeration fails the call.
    pub async fn discover_events(&self) -> GatewayResult<DiscoveryReport> {
        let organizers = self.list_organizers().await?;
        debug!(
            concurrency = self.budget.capacity(),
            "Discovered {} organizers",
            organizers.len()
        );

        let fetches = organizers.iter().map(|organizer| self.fetch_event(organizer));
        let mut events = PartialResult::default();
        for outcome in join_all(fetches).await {
            match outcome {
                Ok(record) => events.succeeded.push(record),
                Err(failure) => {
                    warn!(
                        organizer = %failure.id,
                        kind = failure.kind.as_str(),
                        "Failed to fetch event details, excluding it this cycle: {}",
                        failure.message
                    );
                    self.metrics
                        .discovery_item_failures
                        .with_label_values(&[failure.kind.as_str()])
                        .inc();
                    events.failed.push(failure);
                }
            }
        }
        if !events.is_complete() {
            info!(
                fetched = events.succeeded.len(),
                failed = events.failed.len(),
                "Event discovery partially succeeded ({:.0}% of details read)",
                events.success_ratio() * 100.0
            );
        }
        Ok(DiscoveryReport { organizers, events })
    }
}

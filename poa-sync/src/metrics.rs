// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, HistogramVec, IntCounter,
    IntCounterVec, IntGauge, Registry,
};

const LEDGER_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0,
];

#[derive(Clone, Debug)]
pub struct SyncMetrics {
    // Ledger gateway
    pub(crate) ledger_calls: IntCounterVec,
    pub(crate) ledger_call_latency: HistogramVec,
    pub(crate) ledger_call_errors: IntCounterVec,

    // Writes
    pub(crate) submissions: IntCounterVec,
    pub(crate) submission_failures: IntCounterVec,
    pub(crate) confirmed_writes: IntCounterVec,
    pub(crate) pending_claims: IntGauge,

    // Reads
    pub(crate) discovery_item_failures: IntCounterVec,
    pub(crate) reconcile_unknown: IntCounter,

    // Refresh cycles
    pub(crate) refresh_cycles: IntCounterVec,
    pub(crate) refresh_coalesced: IntCounter,
    pub(crate) snapshot_generation: IntGauge,
    pub(crate) snapshot_events: IntGauge,
}

impl SyncMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            ledger_calls: register_int_counter_vec_with_registry!(
                "poa_ledger_calls",
                "Total number of ledger calls by function",
                &["function"],
                registry,
            )
            .unwrap(),
            ledger_call_latency: register_histogram_vec_with_registry!(
                "poa_ledger_call_latency",
                "Latency of ledger calls in seconds, by function",
                &["function"],
                LEDGER_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            ledger_call_errors: register_int_counter_vec_with_registry!(
                "poa_ledger_call_errors",
                "Total number of failed ledger calls by function and error type",
                &["function", "error_type"],
                registry,
            )
            .unwrap(),
            submissions: register_int_counter_vec_with_registry!(
                "poa_submissions",
                "Total number of write submissions by kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            submission_failures: register_int_counter_vec_with_registry!(
                "poa_submission_failures",
                "Total number of failed write submissions by kind and error type",
                &["kind", "error_type"],
                registry,
            )
            .unwrap(),
            confirmed_writes: register_int_counter_vec_with_registry!(
                "poa_confirmed_writes",
                "Total number of confirmed writes by kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            pending_claims: register_int_gauge_with_registry!(
                "poa_pending_claims",
                "Number of claims currently in flight",
                registry,
            )
            .unwrap(),
            discovery_item_failures: register_int_counter_vec_with_registry!(
                "poa_discovery_item_failures",
                "Total number of events that could not be fetched, by failure kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            reconcile_unknown: register_int_counter_with_registry!(
                "poa_reconcile_unknown",
                "Total number of attendance checks that could not be answered",
                registry,
            )
            .unwrap(),
            refresh_cycles: register_int_counter_vec_with_registry!(
                "poa_refresh_cycles",
                "Total number of refresh cycles by trigger and outcome",
                &["trigger", "outcome"],
                registry,
            )
            .unwrap(),
            refresh_coalesced: register_int_counter_with_registry!(
                "poa_refresh_coalesced",
                "Total number of refresh requests that joined an in-flight cycle",
                registry,
            )
            .unwrap(),
            snapshot_generation: register_int_gauge_with_registry!(
                "poa_snapshot_generation",
                "Generation of the latest published snapshot",
                registry,
            )
            .unwrap(),
            snapshot_events: register_int_gauge_with_registry!(
                "poa_snapshot_events",
                "Number of events in the latest published snapshot",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}

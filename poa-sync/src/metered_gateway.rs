// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Metered wrapper around any ledger gateway that tracks call counts, latencies and errors.

use crate::error::GatewayResult;
use crate::gateway::LedgerGateway;
use crate::metrics::SyncMetrics;
use crate::types::{AccountAddress, Confirmation, FunctionId, TransactionHandle};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const AWAIT_CONFIRMATION: &str = "await_confirmation";

#[derive(Clone, Debug)]
pub struct MeteredGateway<G> {
    inner: G,
    metrics: Arc<SyncMetrics>,
}

impl<G: LedgerGateway> MeteredGateway<G> {
    pub fn new(inner: G, metrics: Arc<SyncMetrics>) -> Self {
        Self { inner, metrics }
    }

    fn record_call(&self, method: &str) -> prometheus::HistogramTimer {
        self.metrics.ledger_calls.with_label_values(&[method]).inc();
        self.metrics
            .ledger_call_latency
            .with_label_values(&[method])
            .start_timer()
    }

    fn record_result<T>(&self, method: &str, result: GatewayResult<T>) -> GatewayResult<T> {
        if let Err(e) = &result {
            self.metrics
                .ledger_call_errors
                .with_label_values(&[method, e.error_type()])
                .inc();
        }
        result
    }
}

#[async_trait]
impl<G: LedgerGateway> LedgerGateway for MeteredGateway<G> {
    fn module_address(&self) -> &AccountAddress {
        self.inner.module_address()
    }

    async fn read_view(&self, function: &FunctionId, args: Vec<Value>) -> GatewayResult<Vec<Value>> {
        let method = function.function.name();
        let _timer = self.record_call(method);
        let result = self.inner.read_view(function, args).await;
        self.record_result(method, result)
    }

    async fn submit(
        &self,
        function: &FunctionId,
        args: Vec<Value>,
    ) -> GatewayResult<TransactionHandle> {
        let method = function.function.name();
        let _timer = self.record_call(method);
        let result = self.inner.submit(function, args).await;
        self.record_result(method, result)
    }

    async fn await_confirmation(
        &self,
        handle: &TransactionHandle,
        timeout: Duration,
    ) -> GatewayResult<Confirmation> {
        let _timer = self.record_call(AWAIT_CONFIRMATION);
        let result = self.inner.await_confirmation(handle, timeout).await;
        self.record_result(AWAIT_CONFIRMATION, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_gateway::MockLedgerGateway;
    use crate::types::LedgerFunction;
    use serde_json::json;

    #[tokio::test]
    async fn test_metered_gateway_counts_calls_and_errors() {
        let mock = MockLedgerGateway::new();
        let organizer: AccountAddress = "0xa".parse().unwrap();
        mock.add_event(&organizer, "Meetup", 0, 100);
        mock.fail_detail(&organizer);

        let metrics = Arc::new(SyncMetrics::new_for_testing());
        let metered = MeteredGateway::new(mock, metrics.clone());

        metered
            .read_view(&metered.function(LedgerFunction::GetAllEvents), vec![])
            .await
            .unwrap();
        metered
            .read_view(
                &metered.function(LedgerFunction::GetEvent),
                vec![json!(organizer.as_str())],
            )
            .await
            .unwrap_err();

        assert_eq!(
            metrics
                .ledger_calls
                .with_label_values(&["get_all_events"])
                .get(),
            1
        );
        assert_eq!(
            metrics.ledger_calls.with_label_values(&["get_event"]).get(),
            1
        );
        assert_eq!(
            metrics
                .ledger_call_errors
                .with_label_values(&["get_event", "network"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .ledger_call_latency
                .with_label_values(&["get_all_events"])
                .get_sample_count(),
            1
        );
        assert_eq!(metered.module_address(), metered.inner.module_address());
    }
}

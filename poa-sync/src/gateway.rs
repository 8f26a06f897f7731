// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::GatewayResult;
use crate::types::{AccountAddress, Confirmation, FunctionId, LedgerFunction, TransactionHandle};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Narrow boundary to the external ledger. Implementations translate calls and
/// never retry; retry policy belongs to the callers.
///
/// Error contract per operation:
/// - `read_view`: `Network`, `Ledger`, `InvalidResponse`
/// - `submit`: `UserRejected`, `SignerUnavailable`, `Network`, `Ledger`
/// - `await_confirmation`: `TimedOut`, `ExecutionFailed`
#[async_trait]
pub trait LedgerGateway: Send + Sync + 'static {
    /// Address the registry module is published under.
    fn module_address(&self) -> &AccountAddress;

    fn function(&self, function: LedgerFunction) -> FunctionId {
        FunctionId::new(self.module_address().clone(), function)
    }

    async fn read_view(&self, function: &FunctionId, args: Vec<Value>) -> GatewayResult<Vec<Value>>;

    async fn submit(&self, function: &FunctionId, args: Vec<Value>)
        -> GatewayResult<TransactionHandle>;

    async fn await_confirmation(
        &self,
        handle: &TransactionHandle,
        timeout: Duration,
    ) -> GatewayResult<Confirmation>;
}

#[async_trait]
impl<G: LedgerGateway> LedgerGateway for Arc<G> {
    fn module_address(&self) -> &AccountAddress {
        (**self).module_address()
    }

    async fn read_view(&self, function: &FunctionId, args: Vec<Value>) -> GatewayResult<Vec<Value>> {
        (**self).read_view(function, args).await
    }

    async fn submit(
        &self,
        function: &FunctionId,
        args: Vec<Value>,
    ) -> GatewayResult<TransactionHandle> {
        (**self).submit(function, args).await
    }

    async fn await_confirmation(
        &self,
        handle: &TransactionHandle,
        timeout: Duration,
    ) -> GatewayResult<Confirmation> {
        (**self).await_confirmation(handle, timeout).await
    }
}

// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared cap on simultaneous outstanding ledger reads.

use crate::error::{GatewayError, GatewayResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 8;

/// Cloning hands out another view of the same budget, so the registry reader and
/// the attendance reconciler draw from one pool of permits.
#[derive(Clone, Debug)]
pub struct RequestBudget {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl RequestBudget {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Runs `fut` while holding one permit.
    pub async fn run<F, T>(&self, fut: F) -> GatewayResult<T>
    where
        F: Future<Output = GatewayResult<T>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| GatewayError::Network("request budget closed".to_string()))?;
        fut.await
    }
}

impl Default for RequestBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_REQUESTS)
    }
}

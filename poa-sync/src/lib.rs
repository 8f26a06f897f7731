// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client-side synchronization and claim submission for the ProofOfAttendance
//! event registry.

pub mod budget;
pub mod config;
pub mod controller;
pub mod error;
pub mod faucet;
pub mod gateway;
pub mod metered_gateway;
pub mod metrics;
pub mod reconciler;
pub mod registry_reader;
pub mod rest_client;
pub mod signer;
pub mod snapshot;
pub mod submitter;
pub mod types;

#[cfg(test)]
pub mod mock_gateway;
#[cfg(test)]
pub mod test_utils;

pub use controller::{RefreshOutcome, RefreshTrigger, SyncController};
pub use error::{GatewayError, SubmissionError, ValidationError};
pub use gateway::LedgerGateway;
pub use snapshot::Snapshot;

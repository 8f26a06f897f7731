// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::{AccountAddress, ReadFailureKind, MAX_EVENT_NAME_CHARS, MODULE_NAME};

/// Failures surfaced by a `LedgerGateway`. The gateway never retries; callers decide.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    // Transport failure, safe to retry
    #[error("network error: {0}")]
    Network(String),
    // The ledger answered but refused the request
    #[error("ledger error: {message}")]
    Ledger {
        message: String,
        error_code: Option<String>,
        vm_error_code: Option<u64>,
    },
    // The response body could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    // The external signer declined
    #[error("transaction rejected by user")]
    UserRejected,
    // No signer is attached to this gateway
    #[error("no signer available")]
    SignerUnavailable,
    #[error("timed out waiting for transaction {0}")]
    TimedOut(String),
    #[error("transaction {hash} failed: {vm_status}")]
    ExecutionFailed { hash: String, vm_status: String },
}

impl GatewayError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Network(_) => "network",
            GatewayError::Ledger { .. } => "ledger",
            GatewayError::InvalidResponse(_) => "invalid_response",
            GatewayError::UserRejected => "user_rejected",
            GatewayError::SignerUnavailable => "signer_unavailable",
            GatewayError::TimedOut(_) => "timed_out",
            GatewayError::ExecutionFailed { .. } => "execution_failed",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Network(_))
    }

    /// How a failed per-item read is reported in a partial result.
    pub fn read_failure_kind(&self) -> ReadFailureKind {
        match self {
            GatewayError::Network(_) | GatewayError::TimedOut(_) => ReadFailureKind::Network,
            GatewayError::InvalidResponse(_) => ReadFailureKind::Malformed,
            _ => ReadFailureKind::Ledger,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Known abort reasons of the registry module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionFailure {
    EventAlreadyExists,
    EventNotFound,
    AlreadyAttended,
    InvalidName,
}

impl ExecutionFailure {
    pub fn from_abort_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(ExecutionFailure::EventNotFound),
            2 => Some(ExecutionFailure::AlreadyAttended),
            3 => Some(ExecutionFailure::InvalidName),
            _ => None,
        }
    }

    /// Classifies a vm status or error message by abort name, falling back to the
    /// numeric abort code reported for the registry module.
    pub fn classify(message: &str) -> Option<Self> {
        let upper = message.to_ascii_uppercase();
        if upper.contains("RESOURCE_ALREADY_EXISTS") || upper.contains("EVENT_ALREADY_EXISTS") {
            return Some(ExecutionFailure::EventAlreadyExists);
        }
        if upper.contains("EVENT_NOT_FOUND") {
            return Some(ExecutionFailure::EventNotFound);
        }
        if upper.contains("ALREADY_ATTENDED") {
            return Some(ExecutionFailure::AlreadyAttended);
        }
        if upper.contains("INVALID_EVENT_NAME") || upper.contains("INVALID_NAME") {
            return Some(ExecutionFailure::InvalidName);
        }
        parse_module_abort_code(message).and_then(Self::from_abort_code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionFailure::EventAlreadyExists => "event_already_exists",
            ExecutionFailure::EventNotFound => "event_not_found",
            ExecutionFailure::AlreadyAttended => "already_attended",
            ExecutionFailure::InvalidName => "invalid_name",
        }
    }
}

// "Move abort in 0x..::ProofOfAttendance: 0x2" or "...: 2"
fn parse_module_abort_code(message: &str) -> Option<u64> {
    let marker = format!("{MODULE_NAME}:");
    let idx = message.find(&marker)?;
    let token = message[idx + marker.len()..]
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(' || c == ',')
        .next()?;
    match token.strip_prefix("0x") {
        Some(hex_digits) => u64::from_str_radix(hex_digits, 16).ok(),
        None => token.parse().ok(),
    }
}

/// Local rejections, raised before anything reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("event name must not be empty")]
    EmptyName,
    #[error("event name has {len} characters, at most {} allowed", MAX_EVENT_NAME_CHARS)]
    NameTooLong { len: usize },
    #[error("no wallet connected")]
    WalletNotConnected,
    #[error("a claim for {0} is already pending")]
    ClaimPending(AccountAddress),
    #[error("organizers cannot claim attendance at their own event")]
    SelfClaim,
    #[error("attendance for {0} was already claimed")]
    AlreadyClaimed(AccountAddress),
}

/// Terminal failure of a create or claim submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("network error: {0}")]
    Network(String),
    #[error("transaction rejected by user")]
    UserRejected,
    // Outcome unknown; the transaction may still land
    #[error("transaction {hash} was not confirmed in time")]
    Timeout { hash: String },
    #[error("ledger rejected the transaction ({}): {vm_status}", .reason.as_str())]
    LedgerExecution {
        reason: ExecutionFailure,
        vm_status: String,
    },
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl SubmissionError {
    pub fn error_type(&self) -> &'static str {
        match self {
            SubmissionError::Validation(ValidationError::EmptyName) => "empty_name",
            SubmissionError::Validation(ValidationError::NameTooLong { .. }) => "name_too_long",
            SubmissionError::Validation(ValidationError::WalletNotConnected) => {
                "wallet_not_connected"
            }
            SubmissionError::Validation(ValidationError::ClaimPending(_)) => "claim_pending",
            SubmissionError::Validation(ValidationError::SelfClaim) => "self_claim",
            SubmissionError::Validation(ValidationError::AlreadyClaimed(_)) => "already_claimed",
            SubmissionError::Network(_) => "network",
            SubmissionError::UserRejected => "user_rejected",
            SubmissionError::Timeout { .. } => "timeout",
            SubmissionError::LedgerExecution { reason, .. } => reason.as_str(),
            SubmissionError::Unknown(_) => "unknown",
        }
    }

    /// Only transport failures may be retried as-is. A timeout must be
    /// followed by a refresh before deciding to resubmit.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmissionError::Network(_))
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            SubmissionError::Validation(ValidationError::EmptyName) => "Please enter an event name",
            SubmissionError::Validation(ValidationError::NameTooLong { .. }) => {
                "Event names can be at most 100 characters long"
            }
            SubmissionError::Validation(ValidationError::WalletNotConnected) => {
                "Please connect your wallet first"
            }
            SubmissionError::Validation(ValidationError::ClaimPending(_)) => {
                "A claim for this event is already in progress"
            }
            SubmissionError::Validation(ValidationError::SelfClaim) => {
                "You cannot claim attendance at your own event"
            }
            SubmissionError::Validation(ValidationError::AlreadyClaimed(_))
            | SubmissionError::LedgerExecution {
                reason: ExecutionFailure::AlreadyAttended,
                ..
            } => "You have already claimed attendance for this event",
            SubmissionError::LedgerExecution {
                reason: ExecutionFailure::EventAlreadyExists,
                ..
            } => "You can only create one event per account. Please use a different account.",
            SubmissionError::LedgerExecution {
                reason: ExecutionFailure::EventNotFound,
                ..
            } => "Event not found",
            SubmissionError::LedgerExecution {
                reason: ExecutionFailure::InvalidName,
                ..
            } => "The ledger rejected this event name",
            SubmissionError::Network(_) => "Network error, please try again",
            SubmissionError::UserRejected => "Transaction was rejected by user",
            SubmissionError::Timeout { .. } => {
                "The transaction is taking longer than expected. Refresh before trying again."
            }
            SubmissionError::Unknown(_) => "Something went wrong. Please try again.",
        }
    }

    fn classified_or_unknown(message: String) -> Self {
        match ExecutionFailure::classify(&message) {
            Some(reason) => SubmissionError::LedgerExecution {
                reason,
                vm_status: message,
            },
            None => SubmissionError::Unknown(message),
        }
    }
}

impl From<GatewayError> for SubmissionError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Network(msg) => SubmissionError::Network(msg),
            GatewayError::UserRejected => SubmissionError::UserRejected,
            GatewayError::SignerUnavailable => ValidationError::WalletNotConnected.into(),
            GatewayError::TimedOut(hash) => SubmissionError::Timeout { hash },
            GatewayError::ExecutionFailed { vm_status, .. } => {
                SubmissionError::classified_or_unknown(vm_status)
            }
            // Simulation failures come back as ledger errors before commit
            GatewayError::Ledger { message, .. } => SubmissionError::classified_or_unknown(message),
            GatewayError::InvalidResponse(msg) => SubmissionError::Unknown(msg),
        }
    }
}

pub type SubmissionResult<T> = Result<T, SubmissionError>;

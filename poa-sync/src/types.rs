// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Move module that owns the event registry.
pub const MODULE_NAME: &str = "ProofOfAttendance";

/// Upper bound on event display names, counted in characters.
pub const MAX_EVENT_NAME_CHARS: usize = 100;

const ADDRESS_HEX_LEN: usize = 64;

/// A ledger account address, normalized to `0x` followed by 64 lowercase hex digits
/// so that short (`0x1`) and long forms compare equal.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountAddress(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("address is empty")]
    Empty,
    #[error("address has {0} hex digits, at most 64 allowed")]
    TooLong(usize),
    #[error("address contains non-hex characters: {0}")]
    InvalidHex(String),
}

impl AccountAddress {
    /// Abbreviated form for logs and terminal output, e.g. `0x0000...beef`.
    pub fn short(&self) -> String {
        let s = self.0.as_str();
        format!("{}...{}", &s[..6], &s[s.len() - 4..])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AccountAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() {
            return Err(AddressParseError::Empty);
        }
        if digits.len() > ADDRESS_HEX_LEN {
            return Err(AddressParseError::TooLong(digits.len()));
        }
        let padded = format!("{:0>width$}", digits.to_ascii_lowercase(), width = ADDRESS_HEX_LEN);
        hex::decode(&padded).map_err(|_| AddressParseError::InvalidHex(s.to_string()))?;
        Ok(Self(format!("0x{padded}")))
    }
}

impl TryFrom<String> for AccountAddress {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountAddress> for String {
    fn from(value: AccountAddress) -> Self {
        value.0
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountAddress({})", self.short())
    }
}

/// Entry and view functions exposed by the registry module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LedgerFunction {
    GetAllEvents,
    GetEvent,
    HasAttended,
    CreateEvent,
    ClaimAttendance,
}

impl LedgerFunction {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerFunction::GetAllEvents => "get_all_events",
            LedgerFunction::GetEvent => "get_event",
            LedgerFunction::HasAttended => "has_attended",
            LedgerFunction::CreateEvent => "create_event",
            LedgerFunction::ClaimAttendance => "claim_attendance",
        }
    }
}

/// Fully qualified function identifier, `0xADDR::ProofOfAttendance::name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionId {
    pub module_address: AccountAddress,
    pub function: LedgerFunction,
}

impl FunctionId {
    pub fn new(module_address: AccountAddress, function: LedgerFunction) -> Self {
        Self {
            module_address,
            function,
        }
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}::{}::{}",
            self.module_address,
            MODULE_NAME,
            self.function.name()
        )
    }
}

/// Payload handed to the external signer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryFunctionPayload {
    pub function: String,
    pub type_arguments: Vec<String>,
    pub arguments: Vec<Value>,
}

impl EntryFunctionPayload {
    pub fn new(function: &FunctionId, arguments: Vec<Value>) -> Self {
        Self {
            function: function.to_string(),
            type_arguments: vec![],
            arguments,
        }
    }
}

/// Handle of a submitted transaction, used to await its confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHandle {
    pub hash: String,
}

/// A committed, successful transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirmation {
    pub hash: String,
    pub version: Option<u64>,
    pub gas_used: Option<u64>,
    pub vm_status: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerInfo {
    pub chain_id: u8,
    pub ledger_version: u64,
    pub block_height: u64,
    pub ledger_timestamp_usecs: u64,
}

/// A committed transaction sent by an account, as listed by the node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTransaction {
    pub hash: String,
    pub version: Option<u64>,
    pub success: bool,
    pub vm_status: String,
    /// Entry function called, e.g. `0x1::coin::transfer`. None for other payloads.
    pub function: Option<String>,
    pub timestamp_usecs: Option<u64>,
}

impl AccountTransaction {
    pub fn from_json(txn: &Value) -> Option<Self> {
        Some(Self {
            hash: txn.get("hash")?.as_str()?.to_string(),
            version: txn.get("version").and_then(value_as_u64),
            success: txn.get("success").and_then(Value::as_bool).unwrap_or(false),
            vm_status: txn
                .get("vm_status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            function: txn
                .pointer("/payload/function")
                .and_then(Value::as_str)
                .map(str::to_string),
            timestamp_usecs: txn.get("timestamp").and_then(value_as_u64),
        })
    }
}

/// One registered event. The organizer address is the identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub organizer: AccountAddress,
    pub name: String,
    pub attendance_count: u64,
    /// Seconds since the unix epoch, assigned by the ledger.
    pub created_at: u64,
}

impl EventRecord {
    /// Builds a record from a `get_event` view result `(name, attendance_count, created_at)`.
    /// Returns `None` when fewer than three fields came back or a field has the wrong shape.
    pub fn from_view_result(organizer: AccountAddress, values: &[Value]) -> Option<Self> {
        if values.len() < 3 {
            return None;
        }
        let name = values[0].as_str()?.to_string();
        let attendance_count = value_as_u64(&values[1])?;
        let created_at = value_as_u64(&values[2])?;
        Some(Self {
            organizer,
            name,
            attendance_count,
            created_at,
        })
    }
}

/// Move u64 values arrive as JSON strings; accept plain numbers too.
pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Why a single item of a fan-out read did not produce a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadFailureKind {
    Network,
    Ledger,
    Malformed,
}

impl ReadFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadFailureKind::Network => "network",
            ReadFailureKind::Ledger => "ledger",
            ReadFailureKind::Malformed => "malformed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemFailure {
    pub id: AccountAddress,
    pub kind: ReadFailureKind,
    pub message: String,
}

/// Outcome of a fan-out read where individual items may fail without failing the whole.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialResult<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<ItemFailure>,
}

impl<T> Default for PartialResult<T> {
    fn default() -> Self {
        Self {
            succeeded: vec![],
            failed: vec![],
        }
    }
}

impl<T> PartialResult<T> {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Fraction of items that succeeded, 1.0 for an empty read.
    pub fn success_ratio(&self) -> f64 {
        if self.total() == 0 {
            1.0
        } else {
            self.succeeded.len() as f64 / self.total() as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_address_normalization() {
        let short: AccountAddress = "0x1".parse().unwrap();
        let long: AccountAddress = format!("0x{}1", "0".repeat(63)).parse().unwrap();
        assert_eq!(short, long);

        let mixed: AccountAddress = "0xABcd".parse().unwrap();
        assert!(mixed.as_str().ends_with("abcd"));
        assert_eq!(mixed.as_str().len(), 66);

        let bare: AccountAddress = "abcd".parse().unwrap();
        assert_eq!(bare, mixed);
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert_eq!("0x".parse::<AccountAddress>(), Err(AddressParseError::Empty));
        assert!(matches!(
            "0xzz".parse::<AccountAddress>(),
            Err(AddressParseError::InvalidHex(_))
        ));
        assert_eq!(
            format!("0x{}", "1".repeat(65)).parse::<AccountAddress>(),
            Err(AddressParseError::TooLong(65))
        );
    }

    #[test]
    fn test_address_short_form() {
        let addr: AccountAddress = "0xbeef".parse().unwrap();
        assert_eq!(addr.short(), "0x0000...beef");
    }

    #[test]
    fn test_address_serde_uses_normalized_string() {
        let addr: AccountAddress = serde_json::from_value(json!("0x2")).unwrap();
        assert_eq!(serde_json::to_value(&addr).unwrap(), json!(addr.as_str()));
        assert!(serde_json::from_value::<AccountAddress>(json!("nope")).is_err());
    }

    #[test]
    fn test_function_id_display() {
        let id = FunctionId::new("0x123".parse().unwrap(), LedgerFunction::HasAttended);
        let rendered = id.to_string();
        assert!(rendered.starts_with("0x000"));
        assert!(rendered.ends_with("123::ProofOfAttendance::has_attended"));
    }

    #[test]
    fn test_event_record_from_view_result() {
        let organizer: AccountAddress = "0xa".parse().unwrap();
        let record =
            EventRecord::from_view_result(organizer.clone(), &[json!("RustConf"), json!("3"), json!(1700000000)])
                .unwrap();
        assert_eq!(record.name, "RustConf");
        assert_eq!(record.attendance_count, 3);
        assert_eq!(record.created_at, 1_700_000_000);

        // Partial and malformed tuples are rejected.
        assert!(EventRecord::from_view_result(organizer.clone(), &[json!("x"), json!("1")]).is_none());
        assert!(
            EventRecord::from_view_result(organizer, &[json!(1), json!("1"), json!("2")]).is_none()
        );
    }

    #[test]
    fn test_partial_result_ratio() {
        let mut result: PartialResult<u8> = PartialResult::default();
        assert!(result.is_complete());
        assert_eq!(result.success_ratio(), 1.0);

        result.succeeded = vec![1, 2, 3];
        result.failed.push(ItemFailure {
            id: "0x1".parse().unwrap(),
            kind: ReadFailureKind::Network,
            message: "timeout".to_string(),
        });
        assert!(!result.is_complete());
        assert_eq!(result.success_ratio(), 0.75);
    }
}

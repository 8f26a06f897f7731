// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory ledger used by unit tests. Writes take effect when their
//! confirmation is awaited, following the registry module's rules.

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::LedgerGateway;
use crate::types::{
    AccountAddress, Confirmation, FunctionId, LedgerFunction, TransactionHandle, MODULE_NAME,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

/// Scripted result of the next `await_confirmation`.
#[derive(Clone, Debug)]
pub enum ConfirmOutcome {
    /// Apply the write and report success, or the module abort it triggers.
    Confirm,
    /// Report an execution failure with this vm status without applying the write.
    Fail(String),
    /// Never commit; resolves as timed out once the timeout elapses.
    Hang,
}

#[derive(Clone, Debug)]
struct MockEvent {
    name: String,
    attendance_count: u64,
    created_at: u64,
}

#[derive(Clone, Debug)]
struct PendingWrite {
    sender: AccountAddress,
    function: LedgerFunction,
    args: Vec<Value>,
}

#[derive(Default)]
struct MockState {
    organizers: Vec<AccountAddress>,
    events: HashMap<AccountAddress, MockEvent>,
    attendance: HashSet<(AccountAddress, AccountAddress)>,
    extra_listed: Vec<AccountAddress>,
    clock: u64,

    fail_enumeration: bool,
    failing_details: HashSet<AccountAddress>,
    malformed_details: HashSet<AccountAddress>,
    failing_attendance: HashSet<AccountAddress>,

    signer: Option<AccountAddress>,
    submit_errors: VecDeque<GatewayError>,
    confirm_outcomes: VecDeque<ConfirmOutcome>,
    pending: HashMap<String, PendingWrite>,
    next_hash: u64,

    calls: HashMap<LedgerFunction, usize>,
    submits: usize,
}

#[derive(Clone)]
pub struct MockLedgerGateway {
    module_address: AccountAddress,
    state: Arc<Mutex<MockState>>,
    enumeration_gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl Default for MockLedgerGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedgerGateway {
    pub fn new() -> Self {
        Self {
            module_address: "0x42".parse().unwrap(),
            state: Arc::new(Mutex::new(MockState {
                clock: GENESIS_TIMESTAMP,
                ..Default::default()
            })),
            enumeration_gate: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn add_event(&self, organizer: &AccountAddress, name: &str, count: u64, created_at: u64) {
        let mut state = self.state.lock().unwrap();
        if !state.events.contains_key(organizer) {
            state.organizers.push(organizer.clone());
        }
        state.events.insert(
            organizer.clone(),
            MockEvent {
                name: name.to_string(),
                attendance_count: count,
                created_at,
            },
        );
    }

    /// Marks `user` as having attended `organizer` without touching the count.
    pub fn add_attendance(&self, user: &AccountAddress, organizer: &AccountAddress) {
        self.state
            .lock()
            .unwrap()
            .attendance
            .insert((user.clone(), organizer.clone()));
    }

    /// Lists `organizer` once more in the enumeration result.
    pub fn list_again(&self, organizer: &AccountAddress) {
        self.state
            .lock()
            .unwrap()
            .extra_listed
            .push(organizer.clone());
    }

    pub fn set_signer(&self, account: Option<AccountAddress>) {
        self.state.lock().unwrap().signer = account;
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.state.lock().unwrap().fail_enumeration = fail;
    }

    pub fn fail_detail(&self, organizer: &AccountAddress) {
        self.state
            .lock()
            .unwrap()
            .failing_details
            .insert(organizer.clone());
    }

    pub fn heal_detail(&self, organizer: &AccountAddress) {
        self.state.lock().unwrap().failing_details.remove(organizer);
    }

    pub fn malformed_detail(&self, organizer: &AccountAddress) {
        self.state
            .lock()
            .unwrap()
            .malformed_details
            .insert(organizer.clone());
    }

    pub fn fail_attendance(&self, organizer: &AccountAddress) {
        self.state
            .lock()
            .unwrap()
            .failing_attendance
            .insert(organizer.clone());
    }

    pub fn heal_attendance(&self, organizer: &AccountAddress) {
        self.state
            .lock()
            .unwrap()
            .failing_attendance
            .remove(organizer);
    }

    pub fn push_submit_error(&self, error: GatewayError) {
        self.state.lock().unwrap().submit_errors.push_back(error);
    }

    pub fn push_confirm_outcome(&self, outcome: ConfirmOutcome) {
        self.state
            .lock()
            .unwrap()
            .confirm_outcomes
            .push_back(outcome);
    }

    /// Holds every `get_all_events` call until the returned gate gets a permit.
    pub fn hold_enumeration(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.enumeration_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn release_enumeration(&self) {
        if let Some(gate) = self.enumeration_gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS);
        }
    }

    pub fn calls(&self, function: LedgerFunction) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&function)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }

    pub fn submit_count(&self) -> usize {
        self.state.lock().unwrap().submits
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn attendance_count(&self, organizer: &AccountAddress) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .events
            .get(organizer)
            .map(|e| e.attendance_count)
    }

    fn record_call(&self, function: LedgerFunction) {
        *self
            .state
            .lock()
            .unwrap()
            .calls
            .entry(function)
            .or_default() += 1;
    }

    fn abort(&self, reason: &str, code: u64) -> String {
        format!(
            "Move abort in {}::{}: {}(0x{:x})",
            self.module_address, MODULE_NAME, reason, code
        )
    }

    fn view(&self, function: LedgerFunction, args: &[Value]) -> GatewayResult<Vec<Value>> {
        let state = self.state.lock().unwrap();
        let arg_address = |i: usize| -> GatewayResult<AccountAddress> {
            args.get(i)
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| GatewayError::Ledger {
                    message: format!("invalid argument {i}"),
                    error_code: Some("invalid_input".to_string()),
                    vm_error_code: None,
                })
        };
        match function {
            LedgerFunction::GetAllEvents => {
                if state.fail_enumeration {
                    return Err(GatewayError::Network("connection refused".to_string()));
                }
                let listed: Vec<&str> = state
                    .organizers
                    .iter()
                    .chain(state.extra_listed.iter())
                    .map(|a| a.as_str())
                    .collect();
                Ok(vec![json!(listed)])
            }
            LedgerFunction::GetEvent => {
                let organizer = arg_address(0)?;
                if state.failing_details.contains(&organizer) {
                    return Err(GatewayError::Network("request timed out".to_string()));
                }
                let event = state.events.get(&organizer).ok_or_else(|| GatewayError::Ledger {
                    message: self.abort("EVENT_NOT_FOUND", 1),
                    error_code: Some("vm_error".to_string()),
                    vm_error_code: Some(4016),
                })?;
                if state.malformed_details.contains(&organizer) {
                    return Ok(vec![json!(event.name)]);
                }
                Ok(vec![
                    json!(event.name),
                    json!(event.attendance_count.to_string()),
                    json!(event.created_at.to_string()),
                ])
            }
            LedgerFunction::HasAttended => {
                let user = arg_address(0)?;
                let organizer = arg_address(1)?;
                if state.failing_attendance.contains(&organizer) {
                    return Err(GatewayError::Network("connection reset".to_string()));
                }
                Ok(vec![json!(state.attendance.contains(&(user, organizer)))])
            }
            LedgerFunction::CreateEvent | LedgerFunction::ClaimAttendance => {
                Err(GatewayError::Ledger {
                    message: format!("{} is not a view function", function.name()),
                    error_code: Some("invalid_input".to_string()),
                    vm_error_code: None,
                })
            }
        }
    }

    // Applies a write under the registry rules, returning the abort status on failure.
    fn apply(&self, write: &PendingWrite) -> Result<(), String> {
        let mut state = self.state.lock().unwrap();
        match write.function {
            LedgerFunction::CreateEvent => {
                if state.events.contains_key(&write.sender) {
                    return Err(
                        "Move abort in 0x1::account: RESOURCE_ALREADY_EXISTS(0x80004)".to_string(),
                    );
                }
                let bytes: Vec<u8> = write
                    .args
                    .first()
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(|b| b.as_u64()).map(|b| b as u8).collect())
                    .unwrap_or_default();
                let name = String::from_utf8(bytes).map_err(|_| self.abort("INVALID_EVENT_NAME", 3))?;
                if name.is_empty() {
                    return Err(self.abort("INVALID_EVENT_NAME", 3));
                }
                state.clock += 60;
                let created_at = state.clock;
                state.organizers.push(write.sender.clone());
                state.events.insert(
                    write.sender.clone(),
                    MockEvent {
                        name,
                        attendance_count: 0,
                        created_at,
                    },
                );
                Ok(())
            }
            LedgerFunction::ClaimAttendance => {
                let organizer: AccountAddress = write
                    .args
                    .first()
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| self.abort("EVENT_NOT_FOUND", 1))?;
                if !state.events.contains_key(&organizer) {
                    return Err(self.abort("EVENT_NOT_FOUND", 1));
                }
                let key = (write.sender.clone(), organizer.clone());
                if state.attendance.contains(&key) {
                    return Err(self.abort("ALREADY_ATTENDED", 2));
                }
                state.attendance.insert(key);
                if let Some(event) = state.events.get_mut(&organizer) {
                    event.attendance_count += 1;
                }
                Ok(())
            }
            _ => Err("not an entry function".to_string()),
        }
    }
}

#[async_trait]
impl LedgerGateway for MockLedgerGateway {
    fn module_address(&self) -> &AccountAddress {
        &self.module_address
    }

    async fn read_view(&self, function: &FunctionId, args: Vec<Value>) -> GatewayResult<Vec<Value>> {
        self.record_call(function.function);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if function.function == LedgerFunction::GetAllEvents {
            let gate = self.enumeration_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                let _permit = gate.acquire().await;
            }
        }
        // Let sibling requests start so concurrency bounds are observable
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let result = self.view(function.function, &args);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn submit(
        &self,
        function: &FunctionId,
        args: Vec<Value>,
    ) -> GatewayResult<TransactionHandle> {
        self.record_call(function.function);
        let scripted = {
            let mut state = self.state.lock().unwrap();
            state.submits += 1;
            state.submit_errors.pop_front()
        };
        tokio::task::yield_now().await;
        if let Some(error) = scripted {
            return Err(error);
        }
        let mut state = self.state.lock().unwrap();
        let sender = state.signer.clone().ok_or(GatewayError::SignerUnavailable)?;
        state.next_hash += 1;
        let hash = format!("0x{:064x}", state.next_hash);
        state.pending.insert(
            hash.clone(),
            PendingWrite {
                sender,
                function: function.function,
                args,
            },
        );
        Ok(TransactionHandle { hash })
    }

    async fn await_confirmation(
        &self,
        handle: &TransactionHandle,
        timeout: Duration,
    ) -> GatewayResult<Confirmation> {
        let (outcome, write) = {
            let mut state = self.state.lock().unwrap();
            let outcome = state
                .confirm_outcomes
                .pop_front()
                .unwrap_or(ConfirmOutcome::Confirm);
            (outcome, state.pending.remove(&handle.hash))
        };
        let write = write.ok_or_else(|| GatewayError::InvalidResponse(format!(
            "unknown transaction {}",
            handle.hash
        )))?;
        match outcome {
            ConfirmOutcome::Hang => {
                tokio::time::sleep(timeout).await;
                Err(GatewayError::TimedOut(handle.hash.clone()))
            }
            ConfirmOutcome::Fail(vm_status) => Err(GatewayError::ExecutionFailed {
                hash: handle.hash.clone(),
                vm_status,
            }),
            ConfirmOutcome::Confirm => match self.apply(&write) {
                Ok(()) => Ok(Confirmation {
                    hash: handle.hash.clone(),
                    version: Some(1),
                    gas_used: Some(10),
                    vm_status: "Executed successfully".to_string(),
                }),
                Err(vm_status) => Err(GatewayError::ExecutionFailed {
                    hash: handle.hash.clone(),
                    vm_status,
                }),
            },
        }
    }
}

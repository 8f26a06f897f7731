// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::budget::RequestBudget;
use crate::gateway::LedgerGateway;
use crate::metrics::SyncMetrics;
use crate::types::{
    value_as_bool, AccountAddress, EventRecord, ItemFailure, LedgerFunction, ReadFailureKind,
};
use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

/// Outcome of one has-attended check. `Unknown` is reported as not attended
/// for the cycle but is kept apart from a confirmed `false`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttendanceCheck {
    Attended,
    NotAttended,
    Unknown(ItemFailure),
}

#[derive(Clone, Debug, Default)]
pub struct ReconcileReport {
    /// One entry per input event, in input order.
    pub checks: Vec<(AccountAddress, AttendanceCheck)>,
}

impl ReconcileReport {
    pub fn claimed(&self) -> BTreeSet<AccountAddress> {
        self.checks
            .iter()
            .filter(|(_, check)| *check == AttendanceCheck::Attended)
            .map(|(organizer, _)| organizer.clone())
            .collect()
    }

    pub fn unknown(&self) -> Vec<&ItemFailure> {
        self.checks
            .iter()
            .filter_map(|(_, check)| match check {
                AttendanceCheck::Unknown(failure) => Some(failure),
                _ => None,
            })
            .collect()
    }
}

pub struct AttendanceReconciler<G> {
    gateway: Arc<G>,
    budget: RequestBudget,
    metrics: Arc<SyncMetrics>,
}

impl<G> Clone for AttendanceReconciler<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            budget: self.budget.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<G: LedgerGateway> AttendanceReconciler<G> {
    pub fn new(gateway: Arc<G>, budget: RequestBudget, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            gateway,
            budget,
            metrics,
        }
    }

    pub async fn check(&self, user: &AccountAddress, organizer: &AccountAddress) -> AttendanceCheck {
        let function = self.gateway.function(LedgerFunction::HasAttended);
        let args = vec![json!(user.as_str()), json!(organizer.as_str())];
        match self.budget.run(self.gateway.read_view(&function, args)).await {
            Ok(values) => match values.first().and_then(value_as_bool) {
                Some(true) => AttendanceCheck::Attended,
                Some(false) => AttendanceCheck::NotAttended,
                None => AttendanceCheck::Unknown(ItemFailure {
                    id: organizer.clone(),
                    kind: ReadFailureKind::Malformed,
                    message: format!("has_attended returned {values:?}"),
                }),
            },
            Err(e) => AttendanceCheck::Unknown(ItemFailure {
                id: organizer.clone(),
                kind: e.read_failure_kind(),
                message: e.to_string(),
            }),
        }
    }

    /// Checks `user` against every event. Without a user nothing is queried.
    pub async fn reconcile(
        &self,
        user: Option<&AccountAddress>,
        events: &[EventRecord],
    ) -> ReconcileReport {
        let Some(user) = user else {
            return ReconcileReport::default();
        };
        let checks = events.iter().map(|event| async move {
            (event.organizer.clone(), self.check(user, &event.organizer).await)
        });
        let checks = join_all(checks).await;
        for (_, check) in &checks {
            if let AttendanceCheck::Unknown(failure) = check {
                warn!(
                    user = %user.short(),
                    organizer = %failure.id,
                    kind = failure.kind.as_str(),
                    "Attendance check failed, treating as not attended this cycle: {}",
                    failure.message
                );
                self.metrics.reconcile_unknown.inc();
            }
        }
        ReconcileReport { checks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_gateway::MockLedgerGateway;

    fn addr(s: &str) -> AccountAddress {
        s.parse().unwrap()
    }

    fn event(organizer: &str) -> EventRecord {
        EventRecord {
            organizer: addr(organizer),
            name: organizer.to_string(),
            attendance_count: 0,
            created_at: 0,
        }
    }

    fn reconciler(mock: &MockLedgerGateway, capacity: usize) -> AttendanceReconciler<MockLedgerGateway> {
        AttendanceReconciler::new(
            Arc::new(mock.clone()),
            RequestBudget::new(capacity),
            Arc::new(SyncMetrics::new_for_testing()),
        )
    }

    #[tokio::test]
    async fn test_no_user_means_no_calls() {
        let mock = MockLedgerGateway::new();
        let report = reconciler(&mock, 8)
            .reconcile(None, &[event("0xa"), event("0xb")])
            .await;
        assert!(report.claimed().is_empty());
        assert!(report.checks.is_empty());
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_check_is_unknown_not_claimed() {
        let mock = MockLedgerGateway::new();
        let user = addr("0xc0ffee");
        mock.add_event(&addr("0xa"), "A", 1, 1);
        mock.add_event(&addr("0xb"), "B", 0, 2);
        mock.add_attendance(&user, &addr("0xa"));
        mock.fail_attendance(&addr("0xb"));

        let report = reconciler(&mock, 8)
            .reconcile(Some(&user), &[event("0xa"), event("0xb")])
            .await;
        assert_eq!(report.claimed(), BTreeSet::from([addr("0xa")]));
        let unknown = report.unknown();
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].id, addr("0xb"));
        assert_eq!(report.checks[1].1, AttendanceCheck::Unknown(unknown[0].clone()));

        // Next cycle the check succeeds and the failure is gone
        mock.heal_attendance(&addr("0xb"));
        let report = reconciler(&mock, 8)
            .reconcile(Some(&user), &[event("0xa"), event("0xb")])
            .await;
        assert!(report.unknown().is_empty());
        assert_eq!(report.checks[1].1, AttendanceCheck::NotAttended);
    }

    #[tokio::test]
    async fn test_confirmed_false_is_not_unknown() {
        let mock = MockLedgerGateway::new();
        mock.add_event(&addr("0xa"), "A", 0, 1);
        let report = reconciler(&mock, 8)
            .reconcile(Some(&addr("0xc")), &[event("0xa")])
            .await;
        assert_eq!(report.checks, vec![(addr("0xa"), AttendanceCheck::NotAttended)]);
        assert!(report.unknown().is_empty());
    }

    #[tokio::test]
    async fn test_checks_respect_budget() {
        let mock = MockLedgerGateway::new();
        let events: Vec<_> = (1..=12u64).map(|i| event(&format!("0x{i:x}"))).collect();
        reconciler(&mock, 2)
            .reconcile(Some(&addr("0xc")), &events)
            .await;
        assert_eq!(mock.calls(LedgerFunction::HasAttended), 12);
        assert!(mock.peak_in_flight() <= 2);
    }
}

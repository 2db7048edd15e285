//! Failed-attempt audit counter.
//!
//! Purely an audit sink: counts rejected verifications per employee and day
//! and keeps a pointer to the latest failure's evidence. Makes no lockout
//! decisions.

use crate::store::{AttendanceLedgerStore, NewFailure, StoreError};
use crate::types::FailedAttemptRecord;
use std::sync::Arc;

/// Fold one more failure into the day's record.
///
/// The first failure creates a record with count 1; later ones increment it
/// and overwrite the evidence pointer. A failure whose evidence could not be
/// persisted keeps the previous pointer.
pub fn apply_failure(
    previous: Option<FailedAttemptRecord>,
    failure: &NewFailure,
) -> FailedAttemptRecord {
    match previous {
        None => FailedAttemptRecord {
            employee_id: failure.employee_id.clone(),
            date: failure.date,
            attempt_count: 1,
            last_evidence: failure.evidence.clone(),
            last_failure_at: failure.at,
            last_distance: failure.distance,
        },
        Some(prev) => FailedAttemptRecord {
            attempt_count: prev.attempt_count.saturating_add(1),
            last_evidence: failure.evidence.clone().or(prev.last_evidence),
            last_failure_at: failure.at,
            last_distance: failure.distance,
            ..prev
        },
    }
}

/// Records rejected verifications through the ledger store.
#[derive(Clone)]
pub struct FailedAttemptTracker {
    ledger: Arc<dyn AttendanceLedgerStore>,
}

impl FailedAttemptTracker {
    pub fn new(ledger: Arc<dyn AttendanceLedgerStore>) -> Self {
        Self { ledger }
    }

    pub async fn record_failure(
        &self,
        failure: NewFailure,
    ) -> Result<FailedAttemptRecord, StoreError> {
        let employee_id = failure.employee_id.clone();
        let record = self.ledger.record_failure(failure).await?;
        tracing::warn!(
            employee = %employee_id,
            date = %record.date,
            attempts = record.attempt_count,
            distance = record.last_distance,
            "failed verification recorded"
        );
        Ok(record)
    }
}

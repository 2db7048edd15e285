//! Verification orchestrator.
//!
//! Directory lookup, face match, state transition and evidence persistence
//! for one check-in or check-out request. Only the decide-and-commit step
//! runs under the employee's lock; evidence I/O happens after it is released.

use attend_core::state::{self, DayState};
use attend_core::store::{
    AttendanceLedgerStore, EmployeeDirectory, EvidenceKey, EvidenceSink, NewCheckIn, NewFailure,
};
use attend_core::{
    AttendanceError, AttendanceTransaction, Calendar, DepartmentAttendance, Direction, Encoding,
    EvidenceRef, FaceMatcher, FailedAttemptRecord, FailedAttemptTracker, MatchError, MatchResult,
    ReportRow, TransactionId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::Instrument;
use uuid::Uuid;

/// A committed check-in or check-out.
#[derive(Debug, Clone, Serialize)]
pub struct Marked {
    pub request_id: Uuid,
    pub transaction_id: TransactionId,
    pub employee_id: String,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub work_date: NaiveDate,
    pub distance: f64,
    pub confidence: f64,
    /// Set on check-out.
    pub worked_secs: Option<i64>,
    pub evidence: Option<EvidenceRef>,
    /// Evidence persistence problem; the transition itself is committed.
    pub warning: Option<String>,
}

/// A rejected verification, already recorded as a failed attempt.
#[derive(Debug, Clone, Serialize)]
pub struct Rejected {
    pub request_id: Uuid,
    pub employee_id: String,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub distance: f64,
    pub confidence: f64,
    /// Failed attempts for this employee today, including this one.
    pub attempt_count: u32,
    pub evidence: Option<EvidenceRef>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    Marked(Marked),
    NoFaceMatch(Rejected),
}

impl Verification {
    /// Treat a rejection as an error, for callers that only care about success.
    pub fn into_marked(self) -> Result<Marked, AttendanceError> {
        match self {
            Verification::Marked(m) => Ok(m),
            Verification::NoFaceMatch(r) => Err(AttendanceError::NoFaceMatch {
                distance: r.distance,
            }),
        }
    }
}

/// Output of the caller-supplied capture step.
pub struct Capture {
    /// Encoding extracted from the frame; `None` if extraction produced nothing.
    pub probe: Option<Encoding>,
    /// Encoded image to keep as evidence.
    pub evidence: Vec<u8>,
}

/// Everything the ledger knows about one employee on one day.
#[derive(Debug, Clone, Serialize)]
pub struct DaySummary {
    pub employee_id: String,
    pub date: NaiveDate,
    pub state: &'static str,
    pub transactions: Vec<AttendanceTransaction>,
    pub failed_attempts: Option<FailedAttemptRecord>,
}

/// Daily presence over active employees.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceSummary {
    pub date: NaiveDate,
    pub active_employees: u64,
    pub present: u64,
    /// `present / active_employees` as a percentage.
    pub rate: f64,
    pub departments: Vec<DepartmentAttendance>,
}

/// Per-employee async mutexes. Idle entries are pruned on each acquire.
#[derive(Default)]
struct EmployeeLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl EmployeeLocks {
    async fn acquire(&self, employee_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(employee_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Result of the locked decide-and-commit step.
struct Committed {
    id: TransactionId,
    work_date: NaiveDate,
    worked_secs: Option<i64>,
}

pub struct VerificationService {
    directory: Arc<dyn EmployeeDirectory>,
    ledger: Arc<dyn AttendanceLedgerStore>,
    evidence: Arc<dyn EvidenceSink>,
    tracker: FailedAttemptTracker,
    matcher: FaceMatcher,
    calendar: Calendar,
    capture_timeout: Duration,
    locks: EmployeeLocks,
}

impl VerificationService {
    pub fn new(
        directory: Arc<dyn EmployeeDirectory>,
        ledger: Arc<dyn AttendanceLedgerStore>,
        evidence: Arc<dyn EvidenceSink>,
        matcher: FaceMatcher,
    ) -> Self {
        Self {
            directory,
            tracker: FailedAttemptTracker::new(ledger.clone()),
            ledger,
            evidence,
            matcher,
            calendar: Calendar::utc(),
            capture_timeout: Duration::from_secs(10),
            locks: EmployeeLocks::default(),
        }
    }

    pub fn with_calendar(mut self, calendar: Calendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    pub fn matcher(&self) -> &FaceMatcher {
        &self.matcher
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    /// Run the capture step under the configured timeout, then verify.
    pub async fn capture_and_mark<F, E>(
        &self,
        employee_id: &str,
        capture: F,
        direction: Direction,
    ) -> Result<Verification, AttendanceError>
    where
        F: Future<Output = Result<Capture, E>>,
        E: Display,
    {
        let capture = match tokio::time::timeout(self.capture_timeout, capture).await {
            Err(_) => {
                tracing::warn!(
                    employee = employee_id,
                    timeout = ?self.capture_timeout,
                    "capture timed out"
                );
                return Err(AttendanceError::CaptureTimeout(self.capture_timeout));
            }
            Ok(Err(e)) => return Err(AttendanceError::Capture(e.to_string())),
            Ok(Ok(capture)) => capture,
        };
        self.verify_and_mark(employee_id, capture.probe, capture.evidence, direction)
            .await
    }

    pub async fn verify_and_mark(
        &self,
        employee_id: &str,
        probe: Option<Encoding>,
        evidence: Vec<u8>,
        direction: Direction,
    ) -> Result<Verification, AttendanceError> {
        self.verify_and_mark_at(employee_id, probe, evidence, direction, Utc::now())
            .await
    }

    /// [`verify_and_mark`](Self::verify_and_mark) with an explicit clock.
    pub async fn verify_and_mark_at(
        &self,
        employee_id: &str,
        probe: Option<Encoding>,
        evidence: Vec<u8>,
        direction: Direction,
        now: DateTime<Utc>,
    ) -> Result<Verification, AttendanceError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "verify",
            %request_id,
            employee = employee_id,
            %direction
        );
        self.run_verification(request_id, employee_id, probe, evidence, direction, now)
            .instrument(span)
            .await
    }

    async fn run_verification(
        &self,
        request_id: Uuid,
        employee_id: &str,
        probe: Option<Encoding>,
        evidence: Vec<u8>,
        direction: Direction,
        now: DateTime<Utc>,
    ) -> Result<Verification, AttendanceError> {
        let employee = self
            .directory
            .lookup(employee_id)
            .await?
            .filter(|e| e.active)
            .ok_or_else(|| AttendanceError::UnknownEmployee(employee_id.to_string()))?;

        let verdict = match self.matcher.compare(employee.reference.as_ref(), probe.as_ref()) {
            Ok(verdict) => verdict,
            Err(MatchError::MissingEncoding) => {
                tracing::warn!(
                    enrolled = employee.reference.is_some(),
                    "encoding missing; treating as non-match"
                );
                MatchResult::missing()
            }
            Err(e) => return Err(e.into()),
        };

        if !verdict.is_match {
            let rejected = self
                .reject(request_id, &employee.id, direction, verdict, &evidence, now)
                .await?;
            return Ok(Verification::NoFaceMatch(rejected));
        }

        let committed = self
            .commit_with_retry(&employee.id, direction, &verdict, now)
            .await?;
        tracing::info!(
            transaction = %committed.id,
            distance = verdict.distance,
            confidence = verdict.confidence,
            "attendance committed"
        );

        let (evidence, warning) = self
            .persist_transaction_evidence(&committed, direction, &evidence)
            .await;

        Ok(Verification::Marked(Marked {
            request_id,
            transaction_id: committed.id,
            employee_id: employee.id,
            direction,
            timestamp: now,
            work_date: committed.work_date,
            distance: verdict.distance,
            confidence: verdict.confidence,
            worked_secs: committed.worked_secs,
            evidence,
            warning,
        }))
    }

    /// One automatic retry on a lost conditional write.
    async fn commit_with_retry(
        &self,
        employee_id: &str,
        direction: Direction,
        verdict: &MatchResult,
        now: DateTime<Utc>,
    ) -> Result<Committed, AttendanceError> {
        match self.commit(employee_id, direction, verdict, now).await {
            Err(AttendanceError::StorageConflict) => {
                tracing::warn!("ledger write conflicted; retrying once");
                self.commit(employee_id, direction, verdict, now).await
            }
            other => other,
        }
    }

    /// Decide and write a verified transition under the employee's lock.
    ///
    /// State comes from the full day read rather than
    /// `find_open_transaction`: a closed day must be told apart from an
    /// empty one to refuse a second cycle.
    async fn commit(
        &self,
        employee_id: &str,
        direction: Direction,
        verdict: &MatchResult,
        now: DateTime<Utc>,
    ) -> Result<Committed, AttendanceError> {
        let _guard = self.locks.acquire(employee_id).await;

        let today = self.calendar.day_of(now);
        let day = DayState::from_transactions(
            self.ledger.transactions_for_day(employee_id, today).await?,
        );
        tracing::debug!(state = day.name(), %today, "day state loaded");

        match direction {
            Direction::CheckIn => {
                state::ensure_can_check_in(&day)?;
                let id = self
                    .ledger
                    .create_check_in(NewCheckIn {
                        employee_id: employee_id.to_string(),
                        work_date: today,
                        at: now,
                        confidence: verdict.confidence,
                        evidence: None,
                    })
                    .await?;
                Ok(Committed {
                    id,
                    work_date: today,
                    worked_secs: None,
                })
            }
            Direction::CheckOut => {
                let (transaction_id, _) = state::closing(&day, now)?;
                let closed = self
                    .ledger
                    .close_check_out(transaction_id, now, None)
                    .await?;
                Ok(Committed {
                    id: closed.id,
                    work_date: closed.work_date,
                    worked_secs: closed.worked_secs,
                })
            }
        }
    }

    async fn reject(
        &self,
        request_id: Uuid,
        employee_id: &str,
        direction: Direction,
        verdict: MatchResult,
        evidence: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Rejected, AttendanceError> {
        let key = EvidenceKey::Failure {
            employee_id: employee_id.to_string(),
            at: now,
        };
        let (evidence, warning) = match self.store_evidence(&key, evidence).await {
            Ok(evidence) => (Some(evidence), None),
            Err(warning) => (None, Some(warning)),
        };

        let record = self
            .tracker
            .record_failure(NewFailure {
                employee_id: employee_id.to_string(),
                date: self.calendar.day_of(now),
                at: now,
                distance: verdict.distance,
                evidence: evidence.clone(),
            })
            .await?;

        Ok(Rejected {
            request_id,
            employee_id: employee_id.to_string(),
            direction,
            timestamp: now,
            distance: verdict.distance,
            confidence: verdict.confidence,
            attempt_count: record.attempt_count,
            evidence,
            warning,
        })
    }

    /// Store evidence for a committed transaction and point the ledger at it.
    /// Failures come back as a warning and never undo the commit.
    async fn persist_transaction_evidence(
        &self,
        committed: &Committed,
        direction: Direction,
        bytes: &[u8],
    ) -> (Option<EvidenceRef>, Option<String>) {
        let key = EvidenceKey::Transaction {
            id: committed.id,
            work_date: committed.work_date,
            direction,
        };
        let evidence = match self.store_evidence(&key, bytes).await {
            Ok(evidence) => evidence,
            Err(warning) => return (None, Some(warning)),
        };
        match self
            .ledger
            .attach_evidence(committed.id, direction, evidence.clone())
            .await
        {
            Ok(()) => (Some(evidence), None),
            Err(e) => (Some(evidence), Some(evidence_warning(&key, e))),
        }
    }

    async fn store_evidence(&self, key: &EvidenceKey, bytes: &[u8]) -> Result<EvidenceRef, String> {
        if bytes.is_empty() {
            return Err(evidence_warning(key, "no evidence image supplied"));
        }
        self.evidence
            .store(key, bytes)
            .await
            .map_err(|e| evidence_warning(key, e))
    }

    pub async fn day_summary(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> Result<DaySummary, AttendanceError> {
        let transactions = self.ledger.transactions_for_day(employee_id, date).await?;
        let failed_attempts = self.ledger.failed_attempts(employee_id, date).await?;
        let state = DayState::from_transactions(transactions.clone()).name();
        Ok(DaySummary {
            employee_id: employee_id.to_string(),
            date,
            state,
            transactions,
            failed_attempts,
        })
    }

    /// Transactions in `[from, to]` with employee names, optionally for one
    /// department.
    pub async fn report(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        department: Option<&str>,
    ) -> Result<Vec<ReportRow>, AttendanceError> {
        Ok(self.ledger.transactions_between(from, to, department).await?)
    }

    /// Attendance rate over active employees, overall and per department.
    pub async fn attendance_summary(
        &self,
        date: NaiveDate,
    ) -> Result<AttendanceSummary, AttendanceError> {
        let departments = self.ledger.attendance_by_department(date).await?;
        let active_employees = departments.iter().map(|d| d.employees).sum();
        let present = departments.iter().map(|d| d.present).sum();
        Ok(AttendanceSummary {
            date,
            active_employees,
            present,
            rate: attendance_rate(present, active_employees),
            departments,
        })
    }

    pub async fn present_count(&self, date: NaiveDate) -> Result<u64, AttendanceError> {
        Ok(self.ledger.present_count(date).await?)
    }

    pub fn today(&self) -> NaiveDate {
        self.calendar.day_of(Utc::now())
    }
}

/// Percentage of `active` that is `present`; zero when nobody is active.
fn attendance_rate(present: u64, active: u64) -> f64 {
    if active == 0 {
        return 0.0;
    }
    present as f64 / active as f64 * 100.0
}

fn evidence_warning(key: &EvidenceKey, reason: impl Display) -> String {
    let warning = AttendanceError::EvidencePersistFailure {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    tracing::warn!(error = %warning, "evidence not persisted; ledger unaffected");
    warning.to_string()
}

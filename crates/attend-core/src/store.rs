//! Collaborator traits: employee directory, attendance ledger, evidence sink.
//!
//! Implementations live outside this crate (`attend-store` provides SQLite
//! and filesystem backends). All traits are object-safe so the daemon can
//! hold them as `Arc<dyn ...>`.

use crate::types::{
    AttendanceTransaction, DepartmentAttendance, Direction, Employee, EvidenceRef,
    FailedAttemptRecord, ReportRow, TransactionId,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A conditional write found the precondition already violated, e.g. an
    /// open transaction was created by a concurrent request.
    #[error("conditional write lost to a concurrent writer")]
    Conflict,
    #[error("transaction {0} not found")]
    NotFound(TransactionId),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(String),
}

#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("invalid evidence key: {0}")]
    InvalidKey(String),
    #[error("evidence I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a piece of evidence belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvidenceKey {
    /// Image backing a committed check-in or check-out.
    Transaction {
        id: TransactionId,
        work_date: NaiveDate,
        direction: Direction,
    },
    /// Image of a rejected verification.
    Failure {
        employee_id: String,
        at: DateTime<Utc>,
    },
}

impl fmt::Display for EvidenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceKey::Transaction { id, direction, .. } => {
                write!(f, "transaction {id} ({direction})")
            }
            EvidenceKey::Failure { employee_id, at } => {
                write!(f, "failure {employee_id}@{}", at.to_rfc3339())
            }
        }
    }
}

/// Input for opening a transaction.
#[derive(Debug, Clone)]
pub struct NewCheckIn {
    pub employee_id: String,
    pub work_date: NaiveDate,
    pub at: DateTime<Utc>,
    pub confidence: f64,
    pub evidence: Option<EvidenceRef>,
}

/// Input for recording a rejected verification.
#[derive(Debug, Clone)]
pub struct NewFailure {
    pub employee_id: String,
    pub date: NaiveDate,
    pub at: DateTime<Utc>,
    pub distance: f64,
    pub evidence: Option<EvidenceRef>,
}

#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    async fn lookup(&self, employee_id: &str) -> Result<Option<Employee>, StoreError>;
}

#[async_trait]
pub trait EvidenceSink: Send + Sync {
    async fn store(&self, key: &EvidenceKey, bytes: &[u8]) -> Result<EvidenceRef, EvidenceError>;
}

/// Append-only attendance ledger plus the failed-attempt table.
#[async_trait]
pub trait AttendanceLedgerStore: Send + Sync {
    /// All transactions opened by `employee_id` on `date`, oldest first.
    async fn transactions_for_day(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceTransaction>, StoreError>;

    async fn find_open_transaction(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> Result<Option<TransactionId>, StoreError>;

    /// Insert an open transaction. Fails with [`StoreError::Conflict`] if one
    /// is already open for the same employee and date.
    async fn create_check_in(&self, check_in: NewCheckIn) -> Result<TransactionId, StoreError>;

    /// Close an open transaction. Fails with [`StoreError::Conflict`] if it
    /// was already closed, or if `at` precedes its check-in.
    async fn close_check_out(
        &self,
        id: TransactionId,
        at: DateTime<Utc>,
        evidence: Option<EvidenceRef>,
    ) -> Result<AttendanceTransaction, StoreError>;

    /// Set the evidence pointer for one side of a transaction if still unset.
    async fn attach_evidence(
        &self,
        id: TransactionId,
        direction: Direction,
        evidence: EvidenceRef,
    ) -> Result<(), StoreError>;

    /// Create or increment the failure counter for (employee, date).
    async fn record_failure(&self, failure: NewFailure) -> Result<FailedAttemptRecord, StoreError>;

    async fn failed_attempts(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> Result<Option<FailedAttemptRecord>, StoreError>;

    async fn transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<AttendanceTransaction>, StoreError>;

    /// Transactions with `from <= work_date <= to`, joined with the
    /// employee's name and optionally restricted to one department, ordered
    /// by check-in time.
    async fn transactions_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        department: Option<&str>,
    ) -> Result<Vec<ReportRow>, StoreError>;

    /// Active employees and how many of them have a transaction on `date`,
    /// per department.
    async fn attendance_by_department(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<DepartmentAttendance>, StoreError>;

    /// Number of distinct employees with a transaction on `date`.
    async fn present_count(&self, date: NaiveDate) -> Result<u64, StoreError>;
}

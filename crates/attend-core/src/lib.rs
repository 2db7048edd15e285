//! attend-core — Face match decisions and the daily attendance lifecycle.
//!
//! Compares externally extracted face encodings, decides check-in/check-out
//! transitions per employee and day, and defines the collaborator traits
//! (directory, ledger store, evidence sink) the daemon wires together.
//! Nothing in this crate performs I/O.

pub mod error;
pub mod matcher;
pub mod state;
pub mod store;
pub mod tracker;
pub mod types;

pub use error::AttendanceError;
pub use matcher::{FaceMatcher, MatchError, MatchResult, MatcherConfigError};
pub use state::{CheckInPlan, CheckOutPlan, DayState};
pub use store::{
    AttendanceLedgerStore, EmployeeDirectory, EvidenceError, EvidenceKey, EvidenceSink,
    NewCheckIn, NewFailure, StoreError,
};
pub use tracker::FailedAttemptTracker;
pub use types::{
    AttendanceTransaction, Calendar, DepartmentAttendance, Direction, Employee, Encoding,
    EvidenceRef, FailedAttemptRecord, ReportRow, TransactionId,
};

use crate::matcher::MatchError;
use crate::store::StoreError;
use crate::types::TransactionId;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Everything a verification request can fail with.
#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("unknown or inactive employee: {0}")]
    UnknownEmployee(String),
    #[error("encoding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("reference or probe encoding is missing")]
    MissingEncoding,
    #[error("encoding component {index} is not finite")]
    NonFiniteEncoding { index: usize },
    #[error("already checked in today (transaction {0})")]
    AlreadyCheckedIn(TransactionId),
    #[error("attendance already completed today (transaction {0})")]
    AlreadyCompletedToday(TransactionId),
    #[error("no open check-in for today")]
    NoOpenCheckIn,
    #[error("already checked out today (transaction {0})")]
    AlreadyCheckedOut(TransactionId),
    #[error("check-out at {now} precedes check-in at {check_in}")]
    NegativeDuration {
        check_in: DateTime<Utc>,
        now: DateTime<Utc>,
    },
    #[error("face did not match (distance {distance:.4})")]
    NoFaceMatch { distance: f64 },
    #[error("capture timed out after {0:?}")]
    CaptureTimeout(Duration),
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("evidence for {key} not persisted: {reason}")]
    EvidencePersistFailure { key: String, reason: String },
    #[error("attendance ledger write lost to a concurrent request")]
    StorageConflict,
    #[error("storage error: {0}")]
    Storage(String),
}

impl AttendanceError {
    /// Stable machine-readable identifier, used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            AttendanceError::UnknownEmployee(_) => "unknown_employee",
            AttendanceError::DimensionMismatch { .. } => "dimension_mismatch",
            AttendanceError::MissingEncoding => "missing_encoding",
            AttendanceError::NonFiniteEncoding { .. } => "non_finite_encoding",
            AttendanceError::AlreadyCheckedIn(_) => "already_checked_in",
            AttendanceError::AlreadyCompletedToday(_) => "already_completed_today",
            AttendanceError::NoOpenCheckIn => "no_open_check_in",
            AttendanceError::AlreadyCheckedOut(_) => "already_checked_out",
            AttendanceError::NegativeDuration { .. } => "negative_duration",
            AttendanceError::NoFaceMatch { .. } => "no_face_match",
            AttendanceError::CaptureTimeout(_) => "capture_timeout",
            AttendanceError::Capture(_) => "capture_failed",
            AttendanceError::EvidencePersistFailure { .. } => "evidence_persist_failure",
            AttendanceError::StorageConflict => "storage_conflict",
            AttendanceError::Storage(_) => "storage",
        }
    }
}

impl From<MatchError> for AttendanceError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::DimensionMismatch { expected, actual } => {
                AttendanceError::DimensionMismatch { expected, actual }
            }
            MatchError::MissingEncoding => AttendanceError::MissingEncoding,
            MatchError::NonFiniteEncoding { index } => AttendanceError::NonFiniteEncoding { index },
        }
    }
}

impl From<StoreError> for AttendanceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => AttendanceError::StorageConflict,
            other => AttendanceError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflict_maps_to_storage_conflict() {
        let err: AttendanceError = StoreError::Conflict.into();
        assert!(matches!(err, AttendanceError::StorageConflict));
        assert_eq!(err.code(), "storage_conflict");
    }

    #[test]
    fn test_other_store_errors_keep_their_message() {
        let err: AttendanceError = StoreError::Database("disk I/O error".into()).into();
        assert_eq!(err.code(), "storage");
        assert!(err.to_string().contains("disk I/O error"));
    }

    #[test]
    fn test_match_errors_map_one_to_one() {
        let err: AttendanceError = MatchError::DimensionMismatch {
            expected: 128,
            actual: 127,
        }
        .into();
        assert!(matches!(
            err,
            AttendanceError::DimensionMismatch {
                expected: 128,
                actual: 127
            }
        ));
        let err: AttendanceError = MatchError::MissingEncoding.into();
        assert_eq!(err.code(), "missing_encoding");
        let err: AttendanceError = MatchError::NonFiniteEncoding { index: 3 }.into();
        assert!(matches!(err, AttendanceError::NonFiniteEncoding { index: 3 }));
        assert_eq!(err.code(), "non_finite_encoding");
    }

    #[test]
    fn test_rejection_message_reports_distance() {
        let err = AttendanceError::NoFaceMatch { distance: 0.75 };
        assert_eq!(err.to_string(), "face did not match (distance 0.7500)");
    }
}

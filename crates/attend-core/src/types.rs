use chrono::{DateTime, FixedOffset, NaiveDate, Offset, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Face encoding vector (128-dimensional for the default extractor).
///
/// Produced by an external vision pipeline; this crate only measures
/// distances between encodings and checks their dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding {
    pub values: Vec<f64>,
}

impl Encoding {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two encodings.
    ///
    /// Callers check dimensions first; extra trailing components are ignored.
    pub fn euclidean_distance(&self, other: &Encoding) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Serialize as packed little-endian `f64` values.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Inverse of [`to_le_bytes`](Self::to_le_bytes). Returns `None` when the
    /// buffer length is not a multiple of 8.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 8 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                f64::from_le_bytes(buf)
            })
            .collect();
        Some(Self { values })
    }
}

/// A directory entry. Owned by the employee directory; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub name: String,
    pub department: Option<String>,
    pub designation: Option<String>,
    /// Reference encoding captured at registration. `None` until enrolled.
    pub reference: Option<Encoding>,
    pub active: bool,
}

/// Monotonic ledger row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub i64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which half of the daily cycle a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    CheckIn,
    CheckOut,
}

impl Direction {
    pub fn from_check_in(is_check_in: bool) -> Self {
        if is_check_in {
            Direction::CheckIn
        } else {
            Direction::CheckOut
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::CheckIn => "check_in",
            Direction::CheckOut => "check_out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pointer to a persisted evidence image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    /// Sink-specific location (a file path for the filesystem sink).
    pub location: String,
    /// SHA-256 of the stored bytes, lowercase hex.
    pub sha256: String,
}

/// One check-in/check-out cycle for an employee on a work date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceTransaction {
    pub id: TransactionId,
    pub employee_id: String,
    /// Calendar date of `check_in_at` in the reference timezone.
    pub work_date: NaiveDate,
    pub check_in_at: DateTime<Utc>,
    pub check_in_evidence: Option<EvidenceRef>,
    /// Display confidence of the match that opened this transaction.
    pub check_in_confidence: f64,
    pub check_out_at: Option<DateTime<Utc>>,
    pub check_out_evidence: Option<EvidenceRef>,
    pub worked_secs: Option<i64>,
}

impl AttendanceTransaction {
    pub fn is_open(&self) -> bool {
        self.check_out_at.is_none()
    }

    pub fn worked(&self) -> Option<TimeDelta> {
        self.worked_secs.map(TimeDelta::seconds)
    }
}

/// Per-employee, per-day count of rejected verifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAttemptRecord {
    pub employee_id: String,
    pub date: NaiveDate,
    pub attempt_count: u32,
    /// Evidence of the most recent failure that had evidence persisted.
    pub last_evidence: Option<EvidenceRef>,
    pub last_failure_at: DateTime<Utc>,
    pub last_distance: f64,
}

/// A transaction joined with the employee it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub employee_name: String,
    pub department: Option<String>,
    #[serde(flatten)]
    pub transaction: AttendanceTransaction,
}

/// Active headcount and presence for one department on one date.
/// Employees without a department are grouped under `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentAttendance {
    pub department: Option<String>,
    pub employees: u64,
    pub present: u64,
}

/// Maps instants to work dates in one fixed reference timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Calendar {
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// Build a calendar from a UTC offset in minutes (east positive).
    /// Returns `None` outside ±24h.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        let secs = minutes.checked_mul(60)?;
        FixedOffset::east_opt(secs).map(|offset| Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// The work date an instant belongs to.
    pub fn day_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Encoding::new(vec![0.1, 0.2, 0.3]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_euclidean_distance_pythagorean() {
        let a = Encoding::new(vec![0.0, 0.0]);
        let b = Encoding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_le_bytes_preserves_values() {
        let enc = Encoding::new(vec![-0.25, 1.5, f64::MIN_POSITIVE]);
        let bytes = enc.to_le_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(Encoding::from_le_bytes(&bytes), Some(enc));
    }

    #[test]
    fn test_le_bytes_rejects_ragged_buffer() {
        assert!(Encoding::from_le_bytes(&[0u8; 9]).is_none());
    }

    #[test]
    fn test_calendar_day_respects_offset() {
        // 2024-03-01 22:30 UTC is already 2024-03-02 in UTC+05:30.
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 22, 30, 0).unwrap();
        let ist = Calendar::from_offset_minutes(330).unwrap();
        assert_eq!(Calendar::utc().day_of(at), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(ist.day_of(at), NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
    }

    #[test]
    fn test_calendar_rejects_out_of_range_offset() {
        assert!(Calendar::from_offset_minutes(24 * 60).is_none());
        assert!(Calendar::from_offset_minutes(-24 * 60).is_none());
    }

    #[test]
    fn test_direction_from_flag() {
        assert_eq!(Direction::from_check_in(true), Direction::CheckIn);
        assert_eq!(Direction::from_check_in(false).to_string(), "check_out");
    }
}

//! SQLite-backed attendance ledger and employee directory.
//!
//! All statements run on the `tokio-rusqlite` background thread, so a single
//! connection serializes writes. Closures return an inner
//! `Result<_, StoreError>` for domain outcomes (conflicts, missing rows)
//! and reserve the outer error for database failures.

use attend_core::store::{
    AttendanceLedgerStore, EmployeeDirectory, NewCheckIn, NewFailure, StoreError,
};
use attend_core::tracker::apply_failure;
use attend_core::types::{
    AttendanceTransaction, DepartmentAttendance, Direction, Employee, Encoding, EvidenceRef,
    FailedAttemptRecord, ReportRow, TransactionId,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use tokio_rusqlite::Connection;

use crate::schema;

const TX_COLUMNS: &str = "id, employee_id, work_date, check_in_at, check_in_evidence, \
     check_in_sha256, check_in_confidence, check_out_at, check_out_evidence, \
     check_out_sha256, worked_secs";

/// `TX_COLUMNS` qualified for the report join, then employee name and department.
const REPORT_COLUMNS: &str = "t.id, t.employee_id, t.work_date, t.check_in_at, \
     t.check_in_evidence, t.check_in_sha256, t.check_in_confidence, t.check_out_at, \
     t.check_out_evidence, t.check_out_sha256, t.worked_secs, e.name, e.department";

const FAILURE_COLUMNS: &str = "employee_id, attempt_date, attempt_count, last_evidence, \
     last_evidence_sha256, last_failure_at, last_distance";

/// Ledger and directory over one SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).await.map_err(db_err)?;
        conn.call(|conn| {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            schema::migrate(conn)?;
            Ok(())
        })
        .await
        .map_err(db_err)?;
        tracing::info!(path = %path.display(), "attendance ledger opened");
        Ok(Self { conn })
    }

    /// Private in-memory database, for tests and dry runs.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(db_err)?;
        conn.call(|conn| {
            schema::migrate(conn)?;
            Ok(())
        })
        .await
        .map_err(db_err)?;
        Ok(Self { conn })
    }

    /// Insert or replace a directory entry.
    ///
    /// Re-registration replaces the reference encoding.
    pub async fn register(&self, employee: &Employee) -> Result<(), StoreError> {
        let employee = employee.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO employees
                       (employee_id, name, department, designation, face_encoding, active)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(employee_id) DO UPDATE SET
                       name = excluded.name,
                       department = excluded.department,
                       designation = excluded.designation,
                       face_encoding = excluded.face_encoding,
                       active = excluded.active",
                    params![
                        employee.id,
                        employee.name,
                        employee.department,
                        employee.designation,
                        employee.reference.as_ref().map(Encoding::to_le_bytes),
                        employee.active,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(db_err)
    }
}

#[async_trait]
impl EmployeeDirectory for SqliteStore {
    async fn lookup(&self, employee_id: &str) -> Result<Option<Employee>, StoreError> {
        let employee_id = employee_id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT employee_id, name, department, designation, face_encoding, active
                         FROM employees WHERE employee_id = ?1",
                        params![employee_id],
                        |row| {
                            Ok((
                                Employee {
                                    id: row.get(0)?,
                                    name: row.get(1)?,
                                    department: row.get(2)?,
                                    designation: row.get(3)?,
                                    reference: None,
                                    active: row.get(5)?,
                                },
                                row.get::<_, Option<Vec<u8>>>(4)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(db_err)?;

        let Some((mut employee, blob)) = row else {
            return Ok(None);
        };
        if let Some(bytes) = blob {
            let encoding = Encoding::from_le_bytes(&bytes).ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "face encoding for {} is {} bytes, not a multiple of 8",
                    employee.id,
                    bytes.len()
                ))
            })?;
            employee.reference = Some(encoding);
        }
        Ok(Some(employee))
    }
}

#[async_trait]
impl AttendanceLedgerStore for SqliteStore {
    async fn transactions_for_day(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceTransaction>, StoreError> {
        let employee_id = employee_id.to_string();
        let raws = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TX_COLUMNS} FROM attendance_transactions
                     WHERE employee_id = ?1 AND work_date = ?2
                     ORDER BY check_in_at, id"
                ))?;
                let rows = stmt
                    .query_map(params![employee_id, date.to_string()], RawTransaction::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(db_err)?;
        raws.into_iter().map(RawTransaction::into_transaction).collect()
    }

    async fn find_open_transaction(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> Result<Option<TransactionId>, StoreError> {
        let employee_id = employee_id.to_string();
        self.conn
            .call(move |conn| {
                let id = conn
                    .query_row(
                        "SELECT id FROM attendance_transactions
                         WHERE employee_id = ?1 AND work_date = ?2 AND check_out_at IS NULL",
                        params![employee_id, date.to_string()],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?;
                Ok(id.map(TransactionId))
            })
            .await
            .map_err(db_err)
    }

    async fn create_check_in(&self, check_in: NewCheckIn) -> Result<TransactionId, StoreError> {
        let (evidence, sha256) = split_evidence(check_in.evidence.as_ref());
        self.conn
            .call(move |conn| {
                let result = conn.execute(
                    "INSERT INTO attendance_transactions
                       (employee_id, work_date, check_in_at, check_in_evidence,
                        check_in_sha256, check_in_confidence)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        check_in.employee_id,
                        check_in.work_date.to_string(),
                        format_ts(check_in.at),
                        evidence,
                        sha256,
                        check_in.confidence,
                    ],
                );
                match result {
                    Ok(_) => Ok(Ok(TransactionId(conn.last_insert_rowid()))),
                    Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                        Ok(Err(StoreError::Conflict))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(db_err)?
    }

    async fn close_check_out(
        &self,
        id: TransactionId,
        at: DateTime<Utc>,
        evidence: Option<EvidenceRef>,
    ) -> Result<AttendanceTransaction, StoreError> {
        let (evidence, sha256) = split_evidence(evidence.as_ref());
        let closed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let current = tx
                    .query_row(
                        "SELECT check_in_at, check_out_at FROM attendance_transactions WHERE id = ?1",
                        params![id.0],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
                    )
                    .optional()?;

                let (check_in_raw, check_out_raw) = match current {
                    None => return Ok(Err(StoreError::NotFound(id))),
                    Some(row) => row,
                };
                if check_out_raw.is_some() {
                    return Ok(Err(StoreError::Conflict));
                }
                let check_in = match parse_ts(&check_in_raw) {
                    Ok(ts) => ts,
                    Err(e) => return Ok(Err(e)),
                };
                if at < check_in {
                    return Ok(Err(StoreError::Conflict));
                }

                tx.execute(
                    "UPDATE attendance_transactions
                     SET check_out_at = ?1, check_out_evidence = ?2, check_out_sha256 = ?3,
                         worked_secs = ?4
                     WHERE id = ?5 AND check_out_at IS NULL",
                    params![
                        format_ts(at),
                        evidence,
                        sha256,
                        (at - check_in).num_seconds(),
                        id.0
                    ],
                )?;
                let raw = tx.query_row(
                    &format!("SELECT {TX_COLUMNS} FROM attendance_transactions WHERE id = ?1"),
                    params![id.0],
                    RawTransaction::from_row,
                )?;
                tx.commit()?;
                Ok(Ok(raw))
            })
            .await
            .map_err(db_err)??;
        closed.into_transaction()
    }

    async fn attach_evidence(
        &self,
        id: TransactionId,
        direction: Direction,
        evidence: EvidenceRef,
    ) -> Result<(), StoreError> {
        let sql = match direction {
            Direction::CheckIn => {
                "UPDATE attendance_transactions
                 SET check_in_evidence = ?1, check_in_sha256 = ?2
                 WHERE id = ?3 AND check_in_evidence IS NULL"
            }
            Direction::CheckOut => {
                "UPDATE attendance_transactions
                 SET check_out_evidence = ?1, check_out_sha256 = ?2
                 WHERE id = ?3 AND check_out_evidence IS NULL AND check_out_at IS NOT NULL"
            }
        };
        self.conn
            .call(move |conn| {
                let changed =
                    conn.execute(sql, params![evidence.location, evidence.sha256, id.0])?;
                if changed == 1 {
                    return Ok(Ok(()));
                }
                let exists = conn
                    .query_row(
                        "SELECT 1 FROM attendance_transactions WHERE id = ?1",
                        params![id.0],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                Ok(Err(if exists {
                    StoreError::Conflict
                } else {
                    StoreError::NotFound(id)
                }))
            })
            .await
            .map_err(db_err)?
    }

    async fn record_failure(&self, failure: NewFailure) -> Result<FailedAttemptRecord, StoreError> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let previous = tx
                    .query_row(
                        &format!(
                            "SELECT {FAILURE_COLUMNS} FROM failed_attempts
                             WHERE employee_id = ?1 AND attempt_date = ?2"
                        ),
                        params![failure.employee_id, failure.date.to_string()],
                        RawFailure::from_row,
                    )
                    .optional()?;
                let previous = match previous.map(RawFailure::into_record).transpose() {
                    Ok(prev) => prev,
                    Err(e) => return Ok(Err(e)),
                };

                let record = apply_failure(previous, &failure);
                let (evidence, sha256) = split_evidence(record.last_evidence.as_ref());
                tx.execute(
                    "INSERT INTO failed_attempts
                       (employee_id, attempt_date, attempt_count, last_evidence,
                        last_evidence_sha256, last_failure_at, last_distance)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(employee_id, attempt_date) DO UPDATE SET
                       attempt_count = excluded.attempt_count,
                       last_evidence = excluded.last_evidence,
                       last_evidence_sha256 = excluded.last_evidence_sha256,
                       last_failure_at = excluded.last_failure_at,
                       last_distance = excluded.last_distance",
                    params![
                        record.employee_id,
                        record.date.to_string(),
                        record.attempt_count,
                        evidence,
                        sha256,
                        format_ts(record.last_failure_at),
                        record.last_distance,
                    ],
                )?;
                tx.commit()?;
                Ok(Ok(record))
            })
            .await
            .map_err(db_err)?
    }

    async fn failed_attempts(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> Result<Option<FailedAttemptRecord>, StoreError> {
        let employee_id = employee_id.to_string();
        let raw = self
            .conn
            .call(move |conn| {
                let raw = conn
                    .query_row(
                        &format!(
                            "SELECT {FAILURE_COLUMNS} FROM failed_attempts
                             WHERE employee_id = ?1 AND attempt_date = ?2"
                        ),
                        params![employee_id, date.to_string()],
                        RawFailure::from_row,
                    )
                    .optional()?;
                Ok(raw)
            })
            .await
            .map_err(db_err)?;
        raw.map(RawFailure::into_record).transpose()
    }

    async fn transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<AttendanceTransaction>, StoreError> {
        let raw = self
            .conn
            .call(move |conn| {
                let raw = conn
                    .query_row(
                        &format!("SELECT {TX_COLUMNS} FROM attendance_transactions WHERE id = ?1"),
                        params![id.0],
                        RawTransaction::from_row,
                    )
                    .optional()?;
                Ok(raw)
            })
            .await
            .map_err(db_err)?;
        raw.map(RawTransaction::into_transaction).transpose()
    }

    async fn transactions_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        department: Option<&str>,
    ) -> Result<Vec<ReportRow>, StoreError> {
        let department = department.map(str::to_string);
        let raws = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {REPORT_COLUMNS}
                     FROM attendance_transactions t
                     JOIN employees e ON e.employee_id = t.employee_id
                     WHERE t.work_date >= ?1 AND t.work_date <= ?2
                       AND (?3 IS NULL OR e.department = ?3)
                     ORDER BY t.check_in_at, t.id"
                ))?;
                let rows = stmt
                    .query_map(
                        params![from.to_string(), to.to_string(), department],
                        |row| {
                            Ok((
                                RawTransaction::from_row(row)?,
                                row.get::<_, String>(11)?,
                                row.get::<_, Option<String>>(12)?,
                            ))
                        },
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(db_err)?;
        raws.into_iter()
            .map(|(raw, employee_name, department)| {
                Ok(ReportRow {
                    employee_name,
                    department,
                    transaction: raw.into_transaction()?,
                })
            })
            .collect()
    }

    async fn attendance_by_department(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<DepartmentAttendance>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT e.department, COUNT(*), COUNT(p.employee_id)
                     FROM employees e
                     LEFT JOIN (
                       SELECT DISTINCT employee_id FROM attendance_transactions
                       WHERE work_date = ?1
                     ) p ON p.employee_id = e.employee_id
                     WHERE e.active = 1
                     GROUP BY e.department
                     ORDER BY e.department",
                )?;
                let rows = stmt
                    .query_map(params![date.to_string()], |row| {
                        Ok(DepartmentAttendance {
                            department: row.get(0)?,
                            employees: row.get::<_, i64>(1)?.max(0) as u64,
                            present: row.get::<_, i64>(2)?.max(0) as u64,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(db_err)
    }

    async fn present_count(&self, date: NaiveDate) -> Result<u64, StoreError> {
        self.conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(DISTINCT employee_id) FROM attendance_transactions
                     WHERE work_date = ?1",
                    params![date.to_string()],
                    |row| row.get(0),
                )?;
                Ok(count.max(0) as u64)
            })
            .await
            .map_err(db_err)
    }
}

/// Column values of one `attendance_transactions` row, before parsing.
struct RawTransaction {
    id: i64,
    employee_id: String,
    work_date: String,
    check_in_at: String,
    check_in_evidence: Option<String>,
    check_in_sha256: Option<String>,
    check_in_confidence: f64,
    check_out_at: Option<String>,
    check_out_evidence: Option<String>,
    check_out_sha256: Option<String>,
    worked_secs: Option<i64>,
}

impl RawTransaction {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            employee_id: row.get(1)?,
            work_date: row.get(2)?,
            check_in_at: row.get(3)?,
            check_in_evidence: row.get(4)?,
            check_in_sha256: row.get(5)?,
            check_in_confidence: row.get(6)?,
            check_out_at: row.get(7)?,
            check_out_evidence: row.get(8)?,
            check_out_sha256: row.get(9)?,
            worked_secs: row.get(10)?,
        })
    }

    fn into_transaction(self) -> Result<AttendanceTransaction, StoreError> {
        Ok(AttendanceTransaction {
            id: TransactionId(self.id),
            employee_id: self.employee_id,
            work_date: parse_date(&self.work_date)?,
            check_in_at: parse_ts(&self.check_in_at)?,
            check_in_evidence: join_evidence(self.check_in_evidence, self.check_in_sha256),
            check_in_confidence: self.check_in_confidence,
            check_out_at: self.check_out_at.as_deref().map(parse_ts).transpose()?,
            check_out_evidence: join_evidence(self.check_out_evidence, self.check_out_sha256),
            worked_secs: self.worked_secs,
        })
    }
}

/// Column values of one `failed_attempts` row, before parsing.
struct RawFailure {
    employee_id: String,
    attempt_date: String,
    attempt_count: u32,
    last_evidence: Option<String>,
    last_evidence_sha256: Option<String>,
    last_failure_at: String,
    last_distance: f64,
}

impl RawFailure {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            employee_id: row.get(0)?,
            attempt_date: row.get(1)?,
            attempt_count: row.get(2)?,
            last_evidence: row.get(3)?,
            last_evidence_sha256: row.get(4)?,
            last_failure_at: row.get(5)?,
            last_distance: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<FailedAttemptRecord, StoreError> {
        Ok(FailedAttemptRecord {
            employee_id: self.employee_id,
            date: parse_date(&self.attempt_date)?,
            attempt_count: self.attempt_count,
            last_evidence: join_evidence(self.last_evidence, self.last_evidence_sha256),
            last_failure_at: parse_ts(&self.last_failure_at)?,
            last_distance: self.last_distance,
        })
    }
}

fn db_err(err: tokio_rusqlite::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

/// Fixed-width RFC 3339 in UTC, so text comparison orders instants.
fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_date(raw: &str) -> Result<NaiveDate, StoreError> {
    raw.parse::<NaiveDate>()
        .map_err(|e| StoreError::Corrupt(format!("bad date {raw:?}: {e}")))
}

fn split_evidence(evidence: Option<&EvidenceRef>) -> (Option<String>, Option<String>) {
    match evidence {
        Some(e) => (Some(e.location.clone()), Some(e.sha256.clone())),
        None => (None, None),
    }
}

fn join_evidence(location: Option<String>, sha256: Option<String>) -> Option<EvidenceRef> {
    location.map(|location| EvidenceRef {
        location,
        sha256: sha256.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 6).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, h, m, 0).unwrap()
    }

    fn check_in(employee: &str, h: u32) -> NewCheckIn {
        NewCheckIn {
            employee_id: employee.into(),
            work_date: day(),
            at: at(h, 0),
            confidence: 66.67,
            evidence: None,
        }
    }

    fn evidence(location: &str) -> EvidenceRef {
        EvidenceRef {
            location: location.into(),
            sha256: "ab".repeat(32),
        }
    }

    fn failure(minute: u32, evidence: Option<EvidenceRef>) -> NewFailure {
        NewFailure {
            employee_id: "E100".into(),
            date: day(),
            at: at(9, minute),
            distance: 0.75,
            evidence,
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let employee = Employee {
            id: "E100".into(),
            name: "Asha".into(),
            department: Some("Ops".into()),
            designation: None,
            reference: Some(Encoding::new(vec![0.5, -0.25])),
            active: true,
        };
        store.register(&employee).await.unwrap();

        let found = store.lookup("E100").await.unwrap().unwrap();
        assert_eq!(found.name, "Asha");
        assert_eq!(found.reference, Some(Encoding::new(vec![0.5, -0.25])));
        assert!(store.lookup("E404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reregistration_replaces_reference() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let mut employee = Employee {
            id: "E100".into(),
            name: "Asha".into(),
            department: None,
            designation: None,
            reference: Some(Encoding::new(vec![1.0])),
            active: true,
        };
        store.register(&employee).await.unwrap();
        employee.reference = Some(Encoding::new(vec![2.0]));
        employee.active = false;
        store.register(&employee).await.unwrap();

        let found = store.lookup("E100").await.unwrap().unwrap();
        assert_eq!(found.reference, Some(Encoding::new(vec![2.0])));
        assert!(!found.active);
    }

    #[tokio::test]
    async fn test_create_then_find_open() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let id = store.create_check_in(check_in("E100", 9)).await.unwrap();
        assert_eq!(store.find_open_transaction("E100", day()).await.unwrap(), Some(id));
        assert_eq!(store.find_open_transaction("E200", day()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_second_open_transaction_conflicts() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.create_check_in(check_in("E100", 9)).await.unwrap();
        let err = store.create_check_in(check_in("E100", 10)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
        assert_eq!(store.transactions_for_day("E100", day()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transaction_ids_are_monotonic() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let a = store.create_check_in(check_in("E100", 9)).await.unwrap();
        let b = store.create_check_in(check_in("E200", 9)).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_close_sets_worked_duration() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let id = store.create_check_in(check_in("E100", 9)).await.unwrap();
        let closed = store
            .close_check_out(id, at(17, 30), Some(evidence("out.jpg")))
            .await
            .unwrap();
        assert_eq!(closed.check_out_at, Some(at(17, 30)));
        assert_eq!(closed.worked_secs, Some(8 * 3600 + 30 * 60));
        assert_eq!(closed.check_out_evidence, Some(evidence("out.jpg")));
        assert!(store.find_open_transaction("E100", day()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_twice_conflicts() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let id = store.create_check_in(check_in("E100", 9)).await.unwrap();
        store.close_check_out(id, at(17, 0), None).await.unwrap();
        let err = store.close_check_out(id, at(18, 0), None).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
        let tx = store.transaction(id).await.unwrap().unwrap();
        assert_eq!(tx.check_out_at, Some(at(17, 0)));
    }

    #[tokio::test]
    async fn test_close_before_check_in_leaves_transaction_open() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let id = store.create_check_in(check_in("E100", 9)).await.unwrap();
        let err = store.close_check_out(id, at(8, 0), None).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
        let tx = store.transaction(id).await.unwrap().unwrap();
        assert!(tx.is_open());
        assert!(tx.worked_secs.is_none());
    }

    #[tokio::test]
    async fn test_close_unknown_transaction() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let err = store
            .close_check_out(TransactionId(99), at(17, 0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(TransactionId(99))));
    }

    #[tokio::test]
    async fn test_attach_evidence_once() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let id = store.create_check_in(check_in("E100", 9)).await.unwrap();
        store
            .attach_evidence(id, Direction::CheckIn, evidence("in.jpg"))
            .await
            .unwrap();
        let err = store
            .attach_evidence(id, Direction::CheckIn, evidence("other.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));

        let tx = store.transaction(id).await.unwrap().unwrap();
        assert_eq!(tx.check_in_evidence, Some(evidence("in.jpg")));
    }

    #[tokio::test]
    async fn test_check_out_evidence_requires_closed_transaction() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let id = store.create_check_in(check_in("E100", 9)).await.unwrap();
        let err = store
            .attach_evidence(id, Direction::CheckOut, evidence("out.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn test_failures_increment_and_track_latest_evidence() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let first = store
            .record_failure(failure(0, Some(evidence("f1.jpg"))))
            .await
            .unwrap();
        assert_eq!(first.attempt_count, 1);

        let second = store
            .record_failure(failure(1, Some(evidence("f2.jpg"))))
            .await
            .unwrap();
        assert_eq!(second.attempt_count, 2);

        let stored = store.failed_attempts("E100", day()).await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, 2);
        assert_eq!(stored.last_evidence, Some(evidence("f2.jpg")));
        assert_eq!(stored.last_failure_at, at(9, 1));
    }

    #[tokio::test]
    async fn test_failures_are_scoped_per_day() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.record_failure(failure(0, None)).await.unwrap();
        let next_day = day().succ_opt().unwrap();
        assert!(store.failed_attempts("E100", next_day).await.unwrap().is_none());
    }

    async fn staff(store: &SqliteStore, id: &str, department: Option<&str>, active: bool) {
        store
            .register(&Employee {
                id: id.into(),
                name: format!("Name {id}"),
                department: department.map(str::to_string),
                designation: None,
                reference: None,
                active,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_report_range_and_presence() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        staff(&store, "E100", Some("Ops"), true).await;
        staff(&store, "E200", Some("Finance"), true).await;
        store.create_check_in(check_in("E100", 9)).await.unwrap();
        store.create_check_in(check_in("E200", 8)).await.unwrap();
        let later = NewCheckIn {
            work_date: day().succ_opt().unwrap(),
            at: Utc.with_ymd_and_hms(2024, 5, 7, 9, 0, 0).unwrap(),
            ..check_in("E100", 9)
        };
        store.create_check_in(later).await.unwrap();

        let same_day = store.transactions_between(day(), day(), None).await.unwrap();
        let ids: Vec<_> = same_day
            .iter()
            .map(|r| r.transaction.employee_id.as_str())
            .collect();
        assert_eq!(ids, ["E200", "E100"]);
        assert_eq!(same_day[0].employee_name, "Name E200");
        assert_eq!(same_day[0].department.as_deref(), Some("Finance"));

        let both = store
            .transactions_between(day(), day().succ_opt().unwrap(), None)
            .await
            .unwrap();
        assert_eq!(both.len(), 3);
        assert_eq!(store.present_count(day()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_report_filters_by_department() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        staff(&store, "E100", Some("Ops"), true).await;
        staff(&store, "E200", Some("Finance"), true).await;
        store.create_check_in(check_in("E100", 9)).await.unwrap();
        store.create_check_in(check_in("E200", 8)).await.unwrap();

        let ops = store
            .transactions_between(day(), day(), Some("Ops"))
            .await
            .unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].transaction.employee_id, "E100");
        assert!(store
            .transactions_between(day(), day(), Some("Legal"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_attendance_by_department_counts_active_staff() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        staff(&store, "E100", Some("Ops"), true).await;
        staff(&store, "E101", Some("Ops"), true).await;
        staff(&store, "E102", Some("Ops"), false).await;
        staff(&store, "E200", Some("Finance"), true).await;
        staff(&store, "E300", None, true).await;
        store.create_check_in(check_in("E100", 9)).await.unwrap();
        store.create_check_in(check_in("E300", 10)).await.unwrap();

        let counts = store.attendance_by_department(day()).await.unwrap();
        assert_eq!(
            counts,
            vec![
                DepartmentAttendance {
                    department: None,
                    employees: 1,
                    present: 1
                },
                DepartmentAttendance {
                    department: Some("Finance".into()),
                    employees: 1,
                    present: 0
                },
                DepartmentAttendance {
                    department: Some("Ops".into()),
                    employees: 2,
                    present: 1
                },
            ]
        );
    }
}

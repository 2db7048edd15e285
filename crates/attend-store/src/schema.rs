//! SQLite schema for the attendance ledger and employee directory.

use rusqlite::Connection;

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = r"
CREATE TABLE IF NOT EXISTS employees (
  employee_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  department TEXT,
  designation TEXT,
  face_encoding BLOB,
  active INTEGER NOT NULL DEFAULT 1 CHECK (active IN (0, 1))
);

CREATE TABLE IF NOT EXISTS attendance_transactions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  employee_id TEXT NOT NULL,
  work_date TEXT NOT NULL,
  check_in_at TEXT NOT NULL,
  check_in_evidence TEXT,
  check_in_sha256 TEXT,
  check_in_confidence REAL NOT NULL,
  check_out_at TEXT,
  check_out_evidence TEXT,
  check_out_sha256 TEXT,
  worked_secs INTEGER CHECK (worked_secs IS NULL OR worked_secs >= 0),
  CHECK (check_out_at IS NULL OR check_out_at >= check_in_at)
);

-- At most one open transaction per employee and work date.
CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_one_open
  ON attendance_transactions(employee_id, work_date)
  WHERE check_out_at IS NULL;

CREATE INDEX IF NOT EXISTS idx_attendance_work_date
  ON attendance_transactions(work_date, check_in_at);

CREATE TRIGGER IF NOT EXISTS trg_attendance_no_delete
BEFORE DELETE ON attendance_transactions
BEGIN
  SELECT RAISE(FAIL, 'attendance_transactions is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_attendance_close_once
BEFORE UPDATE OF check_out_at ON attendance_transactions
WHEN OLD.check_out_at IS NOT NULL
BEGIN
  SELECT RAISE(FAIL, 'attendance transaction already closed');
END;

CREATE TABLE IF NOT EXISTS failed_attempts (
  employee_id TEXT NOT NULL,
  attempt_date TEXT NOT NULL,
  attempt_count INTEGER NOT NULL CHECK (attempt_count >= 1),
  last_evidence TEXT,
  last_evidence_sha256 TEXT,
  last_failure_at TEXT NOT NULL,
  last_distance REAL NOT NULL,
  PRIMARY KEY (employee_id, attempt_date)
);

CREATE TRIGGER IF NOT EXISTS trg_failed_attempts_no_delete
BEFORE DELETE ON failed_attempts
BEGIN
  SELECT RAISE(FAIL, 'failed_attempts is append-only');
END;
";

/// Create tables if missing and stamp the schema version.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_V1)?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;

    tracing::info!(from = version, to = SCHEMA_VERSION, "ledger schema migrated");
    Ok(())
}

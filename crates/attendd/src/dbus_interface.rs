use crate::service::VerificationService;
use attend_core::{AttendanceError, Direction, Encoding};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use zbus::{fdo, interface};

pub const BUS_NAME: &str = "org.freedesktop.Attend1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Attend1";

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.freedesktop.Attend1
/// Object path: /org/freedesktop/Attend1
///
/// Results are JSON strings. Domain errors surface as `Failed` carrying a
/// JSON `{code, message}` body.
pub struct AttendService {
    service: Arc<VerificationService>,
    started_at: DateTime<Utc>,
}

impl AttendService {
    pub fn new(service: Arc<VerificationService>) -> Self {
        Self {
            service,
            started_at: Utc::now(),
        }
    }

    async fn mark(
        &self,
        employee_id: &str,
        encoding: Vec<f64>,
        evidence: Vec<u8>,
        direction: Direction,
    ) -> fdo::Result<String> {
        tracing::info!(
            employee = employee_id,
            %direction,
            dimension = encoding.len(),
            evidence_bytes = evidence.len(),
            "mark requested"
        );
        let probe = (!encoding.is_empty()).then(|| Encoding::new(encoding));
        let outcome = self
            .service
            .verify_and_mark(employee_id, probe, evidence, direction)
            .await
            .map_err(to_fdo)?;
        to_json(&outcome)
    }

    fn date_or_today(&self, date: &str) -> fdo::Result<NaiveDate> {
        if date.is_empty() {
            Ok(self.service.today())
        } else {
            parse_date(date)
        }
    }
}

#[interface(name = "org.freedesktop.Attend1")]
impl AttendService {
    /// Verify a probe encoding and open the employee's day.
    async fn check_in(
        &self,
        employee_id: &str,
        encoding: Vec<f64>,
        evidence: Vec<u8>,
    ) -> fdo::Result<String> {
        self.mark(employee_id, encoding, evidence, Direction::CheckIn)
            .await
    }

    /// Verify a probe encoding and close the employee's open transaction.
    async fn check_out(
        &self,
        employee_id: &str,
        encoding: Vec<f64>,
        evidence: Vec<u8>,
    ) -> fdo::Result<String> {
        self.mark(employee_id, encoding, evidence, Direction::CheckOut)
            .await
    }

    /// Transactions and failed attempts for one employee. Empty date means today.
    async fn day(&self, employee_id: &str, date: &str) -> fdo::Result<String> {
        let date = self.date_or_today(date)?;
        let summary = self
            .service
            .day_summary(employee_id, date)
            .await
            .map_err(to_fdo)?;
        to_json(&summary)
    }

    /// Transactions with work dates in `[from, to]`, joined with employee
    /// names. An empty department means all departments.
    async fn report(&self, from: &str, to: &str, department: &str) -> fdo::Result<String> {
        let (from, to) = (parse_date(from)?, parse_date(to)?);
        if from > to {
            return Err(fdo::Error::InvalidArgs(format!(
                "range start {from} is after end {to}"
            )));
        }
        let department = (!department.is_empty()).then_some(department);
        let rows = self
            .service
            .report(from, to, department)
            .await
            .map_err(to_fdo)?;
        to_json(&rows)
    }

    /// Attendance rate and per-department presence. Empty date means today.
    async fn attendance(&self, date: &str) -> fdo::Result<String> {
        let date = self.date_or_today(date)?;
        let summary = self
            .service
            .attendance_summary(date)
            .await
            .map_err(to_fdo)?;
        to_json(&summary)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let today = self.service.today();
        let present = self.service.present_count(today).await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": self.started_at,
            "today": today,
            "present_today": present,
            "match_threshold": self.service.matcher().threshold(),
            "encoding_dim": self.service.matcher().dimension(),
            "utc_offset": self.service.calendar().offset().to_string(),
        })
        .to_string())
    }
}

fn parse_date(s: &str) -> fdo::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| fdo::Error::InvalidArgs(format!("bad date {s:?}: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

fn to_fdo(e: AttendanceError) -> fdo::Error {
    match &e {
        AttendanceError::Storage(_) | AttendanceError::StorageConflict => {
            tracing::error!(error = %e, "storage failure")
        }
        _ => tracing::info!(code = e.code(), error = %e, "request refused"),
    }
    fdo::Error::Failed(error_body(&e))
}

fn error_body(e: &AttendanceError) -> String {
    serde_json::json!({ "code": e.code(), "message": e.to_string() }).to_string()
}

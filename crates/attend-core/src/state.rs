//! Per-employee, per-day attendance state machine.
//!
//! `NONE -> OPEN -> CLOSED`, one cycle per day. The functions here only
//! decide; the caller executes the returned plan against the ledger while
//! holding the employee's lock.

use crate::error::AttendanceError;
use crate::matcher::MatchResult;
use crate::types::{AttendanceTransaction, TransactionId};
use chrono::{DateTime, TimeDelta, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum DayState {
    None,
    Open(AttendanceTransaction),
    Closed(AttendanceTransaction),
}

impl DayState {
    /// Derive the state from a day's transactions.
    ///
    /// An open transaction wins; otherwise the most recent closed one.
    pub fn from_transactions(transactions: Vec<AttendanceTransaction>) -> Self {
        let mut latest_closed: Option<AttendanceTransaction> = None;
        for tx in transactions {
            if tx.is_open() {
                return DayState::Open(tx);
            }
            let newer = latest_closed
                .as_ref()
                .map_or(true, |prev| tx.check_in_at >= prev.check_in_at);
            if newer {
                latest_closed = Some(tx);
            }
        }
        latest_closed.map_or(DayState::None, DayState::Closed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DayState::None => "none",
            DayState::Open(_) => "open",
            DayState::Closed(_) => "closed",
        }
    }
}

/// What to do for a legal check-in request.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckInPlan {
    /// Insert a new open transaction.
    Open,
    /// The face did not match: record a failed attempt, no transition.
    RecordFailure,
}

/// What to do for a legal check-out request.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutPlan {
    Close {
        transaction_id: TransactionId,
        worked: TimeDelta,
    },
    RecordFailure,
}

/// Check that a check-in is legal. Legal only from `NONE`.
pub fn ensure_can_check_in(state: &DayState) -> Result<(), AttendanceError> {
    match state {
        DayState::Open(tx) => Err(AttendanceError::AlreadyCheckedIn(tx.id)),
        DayState::Closed(tx) => Err(AttendanceError::AlreadyCompletedToday(tx.id)),
        DayState::None => Ok(()),
    }
}

/// Decide a check-in. State errors take precedence over the verdict.
pub fn request_check_in(
    state: &DayState,
    verdict: &MatchResult,
) -> Result<CheckInPlan, AttendanceError> {
    ensure_can_check_in(state)?;
    if verdict.is_match {
        Ok(CheckInPlan::Open)
    } else {
        Ok(CheckInPlan::RecordFailure)
    }
}

fn open_transaction(state: &DayState) -> Result<&AttendanceTransaction, AttendanceError> {
    match state {
        DayState::None => Err(AttendanceError::NoOpenCheckIn),
        DayState::Closed(tx) => Err(AttendanceError::AlreadyCheckedOut(tx.id)),
        DayState::Open(tx) => Ok(tx),
    }
}

fn close_at(
    open: &AttendanceTransaction,
    now: DateTime<Utc>,
) -> Result<(TransactionId, TimeDelta), AttendanceError> {
    if now < open.check_in_at {
        return Err(AttendanceError::NegativeDuration {
            check_in: open.check_in_at,
            now,
        });
    }
    Ok((open.id, now - open.check_in_at))
}

/// Transaction a verified check-out at `now` closes, with the worked
/// duration. Legal only from `OPEN`.
pub fn closing(
    state: &DayState,
    now: DateTime<Utc>,
) -> Result<(TransactionId, TimeDelta), AttendanceError> {
    close_at(open_transaction(state)?, now)
}

/// Decide a check-out at `now`.
pub fn request_check_out(
    state: &DayState,
    verdict: &MatchResult,
    now: DateTime<Utc>,
) -> Result<CheckOutPlan, AttendanceError> {
    let open = open_transaction(state)?;
    if !verdict.is_match {
        return Ok(CheckOutPlan::RecordFailure);
    }
    let (transaction_id, worked) = close_at(open, now)?;
    Ok(CheckOutPlan::Close {
        transaction_id,
        worked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, h, m, 0).unwrap()
    }

    fn tx(id: i64, check_in: DateTime<Utc>, check_out: Option<DateTime<Utc>>) -> AttendanceTransaction {
        AttendanceTransaction {
            id: TransactionId(id),
            employee_id: "E100".into(),
            work_date: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
            check_in_at: check_in,
            check_in_evidence: None,
            check_in_confidence: 66.67,
            check_out_at: check_out,
            check_out_evidence: None,
            worked_secs: check_out.map(|out| (out - check_in).num_seconds()),
        }
    }

    fn matched() -> MatchResult {
        MatchResult { is_match: true, distance: 0.2, confidence: 66.67 }
    }

    fn rejected() -> MatchResult {
        MatchResult { is_match: false, distance: 0.75, confidence: 0.0 }
    }

    #[test]
    fn test_state_from_empty_day() {
        assert_eq!(DayState::from_transactions(Vec::new()), DayState::None);
    }

    #[test]
    fn test_open_transaction_wins_over_closed() {
        let closed = tx(1, at(8, 0), Some(at(9, 0)));
        let open = tx(2, at(10, 0), None);
        let state = DayState::from_transactions(vec![closed, open.clone()]);
        assert_eq!(state, DayState::Open(open));
        assert_eq!(state.name(), "open");
    }

    #[test]
    fn test_check_in_from_none() {
        assert_eq!(request_check_in(&DayState::None, &matched()).unwrap(), CheckInPlan::Open);
    }

    #[test]
    fn test_check_in_from_none_without_match_records_failure() {
        assert_eq!(
            request_check_in(&DayState::None, &rejected()).unwrap(),
            CheckInPlan::RecordFailure
        );
    }

    #[test]
    fn test_second_check_in_is_rejected() {
        let state = DayState::Open(tx(7, at(9, 0), None));
        let err = request_check_in(&state, &matched()).unwrap_err();
        assert!(matches!(err, AttendanceError::AlreadyCheckedIn(TransactionId(7))));
    }

    #[test]
    fn test_check_in_after_completed_day() {
        let state = DayState::Closed(tx(7, at(9, 0), Some(at(17, 30))));
        let err = request_check_in(&state, &matched()).unwrap_err();
        assert!(matches!(err, AttendanceError::AlreadyCompletedToday(TransactionId(7))));
    }

    #[test]
    fn test_check_out_without_check_in() {
        let err = request_check_out(&DayState::None, &matched(), at(17, 30)).unwrap_err();
        assert!(matches!(err, AttendanceError::NoOpenCheckIn));
    }

    #[test]
    fn test_check_out_twice() {
        let state = DayState::Closed(tx(3, at(9, 0), Some(at(17, 30))));
        let err = request_check_out(&state, &matched(), at(18, 0)).unwrap_err();
        assert!(matches!(err, AttendanceError::AlreadyCheckedOut(TransactionId(3))));
    }

    #[test]
    fn test_check_out_computes_worked_duration() {
        let state = DayState::Open(tx(3, at(9, 0), None));
        let plan = request_check_out(&state, &matched(), at(17, 30)).unwrap();
        assert_eq!(
            plan,
            CheckOutPlan::Close {
                transaction_id: TransactionId(3),
                worked: TimeDelta::hours(8) + TimeDelta::minutes(30),
            }
        );
    }

    #[test]
    fn test_check_out_before_check_in_is_negative_duration() {
        let state = DayState::Open(tx(3, at(9, 0), None));
        let err = request_check_out(&state, &matched(), at(8, 59)).unwrap_err();
        assert!(matches!(err, AttendanceError::NegativeDuration { .. }));
    }

    #[test]
    fn test_check_out_without_match_records_failure() {
        let state = DayState::Open(tx(3, at(9, 0), None));
        assert_eq!(
            request_check_out(&state, &rejected(), at(17, 30)).unwrap(),
            CheckOutPlan::RecordFailure
        );
    }

    #[test]
    fn test_check_out_at_check_in_instant_is_zero_duration() {
        let state = DayState::Open(tx(3, at(9, 0), None));
        match request_check_out(&state, &matched(), at(9, 0)).unwrap() {
            CheckOutPlan::Close { worked, .. } => assert_eq!(worked, TimeDelta::zero()),
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn test_verified_transitions_share_state_rules() {
        assert!(ensure_can_check_in(&DayState::None).is_ok());
        let open = DayState::Open(tx(4, at(9, 0), None));
        assert!(matches!(
            ensure_can_check_in(&open),
            Err(AttendanceError::AlreadyCheckedIn(TransactionId(4)))
        ));
        assert_eq!(
            closing(&open, at(12, 0)).unwrap(),
            (TransactionId(4), TimeDelta::hours(3))
        );
        assert!(matches!(
            closing(&open, at(8, 0)),
            Err(AttendanceError::NegativeDuration { .. })
        ));
        assert!(matches!(
            closing(&DayState::None, at(12, 0)),
            Err(AttendanceError::NoOpenCheckIn)
        ));
    }
}

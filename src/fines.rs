//! Late fees: computing them, recording them and settling them.

use std::fmt;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::{
    error::{Ineligibility, LedgerError, LedgerResult},
    model::{Borrow, Fine, FineId, Money, UserId},
};

/// Computes the penalty for a late return
pub trait LateFeePolicy: fmt::Debug + Send {
    /// Fee owed for `borrow` returned on `returned_on`; zero means no fine
    fn fee(&self, borrow: &Borrow, returned_on: NaiveDate) -> Money;
}

/// `max(0, overdue days) * daily rate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatDailyRate {
    /// Charge per overdue day
    pub daily_rate: Money,
}

impl LateFeePolicy for FlatDailyRate {
    fn fee(&self, borrow: &Borrow, returned_on: NaiveDate) -> Money {
        self.daily_rate.per_day(borrow.overdue_days(returned_on))
    }
}

/// Look up a fine
///
/// # Errors
///
/// Returns `LedgerError::FineNotFound` if there is no such fine.
pub fn get_fine(conn: &Connection, fine: FineId) -> LedgerResult<Fine> {
    let sql = format!("SELECT {} FROM fines f WHERE f.fine_id = ?1", Fine::COLUMNS);
    conn.query_row(&sql, params![fine], Fine::from_row)
        .optional()?
        .ok_or(LedgerError::FineNotFound(fine))
}

/// Record the fee for a late return, if there is one
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the insert fails.
pub(crate) fn assess(
    conn: &Connection,
    policy: &dyn LateFeePolicy,
    borrow: &Borrow,
    returned_on: NaiveDate,
) -> LedgerResult<Option<Fine>> {
    let amount = policy.fee(borrow, returned_on);
    if amount <= Money::ZERO {
        return Ok(None);
    }
    conn.execute(
        "INSERT INTO fines (borrow_id, amount, paid, payment_date) VALUES (?1, ?2, 0, NULL)",
        params![borrow.id, amount],
    )?;
    let fine = get_fine(conn, FineId(conn.last_insert_rowid()))?;
    info!(
        fine = %fine.id,
        borrow = %borrow.id,
        %amount,
        overdue_days = borrow.overdue_days(returned_on),
        "fine assessed"
    );
    Ok(Some(fine))
}

/// Settle a fine
///
/// # Errors
///
/// Returns `LedgerError::FineNotFound` for an unknown fine and
/// `LedgerError::AlreadyPaid` if it was settled before; in both cases the row
/// is left untouched.
pub fn pay_fine(conn: &Connection, fine: FineId, today: NaiveDate) -> LedgerResult<Fine> {
    let current = get_fine(conn, fine)?;
    if current.paid {
        return Err(LedgerError::AlreadyPaid(fine));
    }
    conn.execute(
        "UPDATE fines SET paid = 1, payment_date = ?1 WHERE fine_id = ?2 AND paid = 0",
        params![today, fine],
    )?;
    get_fine(conn, fine)
}

/// Sum of a user's unpaid fines
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn total_unpaid_fines(conn: &Connection, user: UserId) -> LedgerResult<Money> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(f.amount), 0) FROM fines f \
         JOIN borrows br ON f.borrow_id = br.borrow_id \
         WHERE br.user_id = ?1 AND f.paid = 0",
        params![user],
        |row| row.get(0),
    )?)
}

/// All fines assessed on a user's borrows, newest first
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn fines_for(conn: &Connection, user: UserId) -> LedgerResult<Vec<Fine>> {
    let sql = format!(
        "SELECT {} FROM fines f JOIN borrows br ON f.borrow_id = br.borrow_id \
         WHERE br.user_id = ?1 ORDER BY f.fine_id DESC",
        Fine::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let fines: Vec<Fine> = stmt.query_map(params![user], Fine::from_row)?.collect::<Result<_, _>>()?;
    Ok(fines)
}

/// Fail when a user's unpaid fines exceed `cap`; `None` disables the check
///
/// # Errors
///
/// Returns `LedgerError::IneligibleUser` when the cap is exceeded.
pub fn check_fine_cap(conn: &Connection, user: UserId, cap: Option<Money>) -> LedgerResult<()> {
    let Some(cap) = cap else {
        return Ok(());
    };
    let owed = total_unpaid_fines(conn, user)?;
    if owed > cap {
        return Err(LedgerError::IneligibleUser {
            user,
            reason: Ineligibility::UnpaidFines { owed, cap },
        });
    }
    Ok(())
}

use std::fmt;

use chrono::{Days, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    catalog::{self, BookUpdate},
    clock::{Clock, SystemClock},
    config::LendingPolicy,
    error::{Ineligibility, LedgerError, LedgerResult},
    events::LedgerEvent,
    fines::{self, FlatDailyRate, LateFeePolicy},
    membership,
    model::{
        Book, BookId, Borrow, BorrowDetails, BorrowId, CopyId, Fine, FineId, LibrarianId, Money,
        Reservation, ReservationId, User, UserId, UserStatus,
    },
    observers::LedgerObserver,
    reservations,
    store::Store,
};

/// Everything a lending transaction needs to know besides the connection
#[derive(Debug, Clone, Copy)]
pub struct LendingRules<'a> {
    /// Loan period, fine cap and rates
    pub policy: &'a LendingPolicy,
    /// How late returns are charged
    pub late_fees: &'a dyn LateFeePolicy,
    /// The day the transaction happens on
    pub today: NaiveDate,
}

impl LendingRules<'_> {
    /// Due date for a borrow starting today
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidInput` if the date would overflow the calendar.
    pub fn due_date(&self) -> LedgerResult<NaiveDate> {
        self.today
            .checked_add_days(Days::new(u64::from(self.policy.loan_period_days)))
            .ok_or_else(|| LedgerError::InvalidInput("due date out of range".to_string()))
    }
}

/// Result of returning a copy
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReturnOutcome {
    /// The borrow, now closed
    pub borrow: Borrow,
    /// Fine assessed for a late return
    pub fine: Option<Fine>,
    /// Borrow created for the first eligible reservation on the freed copy
    pub reservation_borrow: Option<Borrow>,
}

/// Result of editing a title
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BookUpdateOutcome {
    /// The title after the edit
    pub book: Book,
    /// Borrows created for reservations served by newly added copies
    pub reservation_borrows: Vec<Borrow>,
}

/// A member's borrowing position
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AccountSummary {
    /// The member
    pub user: User,
    /// Borrows ever made
    pub total_borrowed: u32,
    /// Borrows still outstanding
    pub currently_borrowed: u32,
    /// Unpaid fines
    pub fines_due: Money,
}

/// Look up a borrow
///
/// # Errors
///
/// Returns `LedgerError::BorrowNotFound` if there is no such borrow.
pub fn get_borrow(conn: &Connection, borrow: BorrowId) -> LedgerResult<Borrow> {
    let sql = format!("SELECT {} FROM borrows br WHERE br.borrow_id = ?1", Borrow::COLUMNS);
    conn.query_row(&sql, params![borrow], Borrow::from_row)
        .optional()?
        .ok_or(LedgerError::BorrowNotFound(borrow))
}

/// Fail unless `user` exists, is active, and owes no more than the fine cap
///
/// # Errors
///
/// Returns `LedgerError::UserNotFound` or `LedgerError::IneligibleUser`.
pub fn check_eligibility(conn: &Connection, rules: &LendingRules<'_>, user: UserId) -> LedgerResult<()> {
    if membership::get_user_status(conn, user)? == UserStatus::Inactive {
        return Err(LedgerError::IneligibleUser { user, reason: Ineligibility::Inactive });
    }
    fines::check_fine_cap(conn, user, rules.policy.fine_cap)
}

/// Put `copy` on loan to `user`; the caller has already checked eligibility
///
/// # Errors
///
/// Returns `LedgerError::Conflict` if the copy is not available, which means
/// the caller is not holding the write lock it should hold.
pub(crate) fn lend_copy(
    conn: &Connection,
    rules: &LendingRules<'_>,
    user: UserId,
    copy: CopyId,
    librarian: Option<LibrarianId>,
) -> LedgerResult<Borrow> {
    let due_date = rules.due_date()?;
    let flipped = conn.execute(
        "UPDATE book_copies SET is_available = 0 WHERE copy_id = ?1 AND is_available = 1",
        params![copy],
    )?;
    if flipped == 0 {
        return Err(LedgerError::Conflict(format!("copy {copy} is no longer available")));
    }
    conn.execute(
        "INSERT INTO borrows (user_id, copy_id, librarian_id, borrow_date, due_date, return_date) \
         VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
        params![user, copy, librarian, rules.today, due_date],
    )?;
    get_borrow(conn, BorrowId(conn.last_insert_rowid()))
}

/// Issue the lowest-numbered available copy of `book` to `user`
///
/// # Errors
///
/// See [`Ledger::issue`].
pub fn issue(
    conn: &Connection,
    rules: &LendingRules<'_>,
    user: UserId,
    book: BookId,
    librarian: Option<LibrarianId>,
    events: &mut Vec<LedgerEvent>,
) -> LedgerResult<Borrow> {
    check_eligibility(conn, rules, user)?;
    catalog::get_book(conn, book)?;
    if let Some(librarian) = librarian {
        membership::get_librarian(conn, librarian)?;
    }
    let copy = catalog::find_available_copy(conn, book)?.ok_or(LedgerError::NoCopyAvailable(book))?;
    let borrow = lend_copy(conn, rules, user, copy.id, librarian)?;
    debug!(borrow = %borrow.id, copy = %copy.id, "copy selected");
    let reservation = reservations::fulfil_own(conn, user, book)?;
    events.push(LedgerEvent::Issued { borrow: borrow.clone(), book, reservation });
    if let Some(reservation) = reservation {
        events.push(LedgerEvent::ReservationFulfilled { reservation, user, borrow: borrow.id });
    }
    Ok(borrow)
}

/// Close an active borrow, charge lateness, and hand the copy to the wait-list
///
/// # Errors
///
/// See [`Ledger::return_copy`].
pub fn return_copy(
    conn: &Connection,
    rules: &LendingRules<'_>,
    borrow: BorrowId,
    events: &mut Vec<LedgerEvent>,
) -> LedgerResult<ReturnOutcome> {
    let open = get_borrow(conn, borrow)?;
    if !open.is_active() {
        return Err(LedgerError::AlreadyReturned(borrow));
    }
    let closed_rows = conn.execute(
        "UPDATE borrows SET return_date = ?1 WHERE borrow_id = ?2 AND return_date IS NULL",
        params![rules.today, borrow],
    )?;
    if closed_rows == 0 {
        return Err(LedgerError::AlreadyReturned(borrow));
    }
    catalog::set_copy_availability(conn, open.copy, true)?;
    let closed = Borrow { return_date: Some(rules.today), ..open };
    let book = catalog::get_copy(conn, closed.copy)?.book;
    events.push(LedgerEvent::Returned { borrow: closed.clone(), book });

    let fine = fines::assess(conn, rules.late_fees, &closed, rules.today)?;
    if let Some(fine) = &fine {
        events.push(LedgerEvent::FineAssessed { fine: fine.clone(), user: closed.user });
    }

    let reservation_borrow = reservations::on_copy_freed(conn, rules, book, closed.copy, events)?;
    Ok(ReturnOutcome { borrow: closed, fine, reservation_borrow })
}

/// Edit a title and offer any copies it gains to the wait-list
///
/// # Errors
///
/// See [`Ledger::update_book`].
pub fn update_book(
    conn: &Connection,
    rules: &LendingRules<'_>,
    book: BookId,
    update: &BookUpdate,
    events: &mut Vec<LedgerEvent>,
) -> LedgerResult<BookUpdateOutcome> {
    let (edited, added) = catalog::update_book(conn, book, update)?;
    let mut reservation_borrows = Vec::new();
    for copy in added {
        if let Some(borrow) = reservations::on_copy_freed(conn, rules, book, copy, events)? {
            reservation_borrows.push(borrow);
        }
    }
    Ok(BookUpdateOutcome { book: edited, reservation_borrows })
}

/// Outstanding borrows, oldest first, optionally for one user
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn list_active_borrows(conn: &Connection, user: Option<UserId>) -> LedgerResult<Vec<BorrowDetails>> {
    let sql = format!(
        "{} WHERE br.return_date IS NULL AND (?1 IS NULL OR br.user_id = ?1) \
         ORDER BY br.borrow_date, br.borrow_id",
        BorrowDetails::SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows: Vec<BorrowDetails> =
        stmt.query_map(params![user], BorrowDetails::from_row)?.collect::<Result<_, _>>()?;
    Ok(rows)
}

/// Every borrow, newest first, optionally for one user
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn borrow_history(conn: &Connection, user: Option<UserId>) -> LedgerResult<Vec<BorrowDetails>> {
    let sql = format!(
        "{} WHERE (?1 IS NULL OR br.user_id = ?1) ORDER BY br.borrow_date DESC, br.borrow_id DESC",
        BorrowDetails::SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows: Vec<BorrowDetails> =
        stmt.query_map(params![user], BorrowDetails::from_row)?.collect::<Result<_, _>>()?;
    Ok(rows)
}

/// Totals shown on a member's account page
///
/// # Errors
///
/// Returns `LedgerError::UserNotFound` if there is no such member.
pub fn account_summary(conn: &Connection, user: UserId) -> LedgerResult<AccountSummary> {
    let member = membership::get_user(conn, user)?;
    let (total_borrowed, currently_borrowed): (u32, u32) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN return_date IS NULL THEN 1 ELSE 0 END), 0) \
         FROM borrows WHERE user_id = ?1",
        params![user],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(AccountSummary {
        user: member,
        total_borrowed,
        currently_borrowed,
        fines_due: fines::total_unpaid_fines(conn, user)?,
    })
}

/// Re-run `op` while it fails with `LedgerError::Conflict`, at most `attempts` times
///
/// Only conflicts are retried: they mean another session held the write lock
/// and nothing was written, so running the whole operation again is safe.
///
/// # Errors
///
/// Returns the last error `op` produced.
pub fn with_conflict_retry<T>(
    attempts: u32,
    mut op: impl FnMut() -> LedgerResult<T>,
) -> LedgerResult<T> {
    let mut attempt = 1_u32;
    loop {
        match op() {
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(attempt, error = %err, "conflicting session, retrying");
                attempt = attempt.saturating_add(1);
            }
            outcome => return outcome,
        }
    }
}

/// A lending session: one connection plus the rules and observers applied to it
pub struct Ledger {
    /// Datastore connection
    store: Store,
    /// Loan period, cap and rates
    policy: LendingPolicy,
    /// How late returns are charged
    late_fees: Box<dyn LateFeePolicy>,
    /// Source of "today"
    clock: Box<dyn Clock>,
    /// Registered event observers
    observers: Vec<Box<dyn LedgerObserver>>,
}

// Manual implementation of Debug for Ledger
impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("store", &self.store)
            .field("policy", &self.policy)
            .field("late_fees", &self.late_fees)
            .field("clock", &self.clock)
            .field("observers_count", &self.observers.len())
            .finish()
    }
}

impl Ledger {
    /// Create a ledger charging `policy.daily_rate` per overdue day, dated by the system clock
    #[must_use]
    pub fn new(store: Store, policy: LendingPolicy) -> Self {
        let late_fees = Box::new(FlatDailyRate { daily_rate: policy.daily_rate });
        Self { store, policy, late_fees, clock: Box::new(SystemClock), observers: Vec::new() }
    }

    /// Replace the clock
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Replace the late-fee policy
    #[must_use]
    pub fn with_late_fee_policy(mut self, late_fees: impl LateFeePolicy + 'static) -> Self {
        self.late_fees = Box::new(late_fees);
        self
    }

    /// Register an observer to be notified of committed events
    pub fn register_observer(&mut self, observer: Box<dyn LedgerObserver>) {
        self.observers.push(observer);
    }

    /// The rules in force
    #[must_use]
    pub fn policy(&self) -> &LendingPolicy {
        &self.policy
    }

    /// The day operations are dated with
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Underlying datastore, for catalog, membership and reporting calls
    pub fn store(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Run `op` in one write transaction with this session's rules, then notify observers
    fn transact<T>(
        &mut self,
        op: impl FnOnce(&Connection, &LendingRules<'_>, &mut Vec<LedgerEvent>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let rules = LendingRules {
            policy: &self.policy,
            late_fees: self.late_fees.as_ref(),
            today: self.clock.today(),
        };
        let mut events = Vec::new();
        let value = self.store.write(|conn| op(conn, &rules, &mut events))?;
        for event in &events {
            for observer in &self.observers {
                observer.on_event(event);
            }
        }
        Ok(value)
    }

    /// Issue a copy of `book` to `user`, optionally on a librarian's behalf
    ///
    /// The available copy with the lowest id is chosen. Its availability flag
    /// and the new borrow are written in one transaction.
    ///
    /// # Errors
    ///
    /// - `LedgerError::UserNotFound`, `BookNotFound`, `LibrarianNotFound` for unknown ids
    /// - `LedgerError::IneligibleUser` if the user is inactive or over the fine cap
    /// - `LedgerError::NoCopyAvailable` if every copy is on loan
    /// - `LedgerError::Conflict` if another session holds the write lock
    pub fn issue(
        &mut self,
        user: UserId,
        book: BookId,
        librarian: Option<LibrarianId>,
    ) -> LedgerResult<Borrow> {
        self.transact(|conn, rules, events| issue(conn, rules, user, book, librarian, events))
    }

    /// Return the copy held by `borrow`
    ///
    /// In the same transaction: the borrow is closed, the copy flagged
    /// available, a fine assessed if the return is late, and the copy handed to
    /// the oldest eligible reservation for its book, if any.
    ///
    /// # Errors
    ///
    /// - `LedgerError::BorrowNotFound` for an unknown borrow
    /// - `LedgerError::AlreadyReturned` if the borrow is closed
    /// - `LedgerError::Conflict` if another session holds the write lock
    pub fn return_copy(&mut self, borrow: BorrowId) -> LedgerResult<ReturnOutcome> {
        self.transact(|conn, rules, events| return_copy(conn, rules, borrow, events))
    }

    /// Edit a title
    ///
    /// Copies added by raising `update.copies` are handed to pending
    /// reservations, oldest first, in the same transaction; only copies nobody
    /// eligible is waiting for stay on the shelf.
    ///
    /// # Errors
    ///
    /// - `LedgerError::BookNotFound` for an unknown title
    /// - `LedgerError::CopiesOnLoan` if the new copy count is below the number on loan
    /// - `LedgerError::InvalidInput` for an empty title or author, or a shrink
    ///   that would remove copies with lending history
    pub fn update_book(&mut self, book: BookId, update: &BookUpdate) -> LedgerResult<BookUpdateOutcome> {
        self.transact(|conn, rules, events| update_book(conn, rules, book, update, events))
    }

    /// Outstanding borrows, optionally for one user
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Storage` if the query fails.
    pub fn list_active_borrows(&mut self, user: Option<UserId>) -> LedgerResult<Vec<BorrowDetails>> {
        self.store.read(|conn| list_active_borrows(conn, user))
    }

    /// Every borrow, newest first, optionally for one user
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Storage` if the query fails.
    pub fn borrow_history(&mut self, user: Option<UserId>) -> LedgerResult<Vec<BorrowDetails>> {
        self.store.read(|conn| borrow_history(conn, user))
    }

    /// A member's borrowing totals and fines due
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UserNotFound` if there is no such member.
    pub fn account_summary(&mut self, user: UserId) -> LedgerResult<AccountSummary> {
        self.store.read(|conn| account_summary(conn, user))
    }

    /// Join the wait-list for `book`
    ///
    /// # Errors
    ///
    /// See [`reservations::reserve`].
    pub fn reserve(&mut self, user: UserId, book: BookId) -> LedgerResult<Reservation> {
        self.transact(|conn, rules, events| reservations::reserve(conn, rules, user, book, events))
    }

    /// Leave a wait-list
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::ReservationNotFound` if the reservation is absent
    /// or no longer pending.
    pub fn cancel_reservation(&mut self, reservation: ReservationId) -> LedgerResult<Reservation> {
        self.transact(|conn, _, events| reservations::cancel(conn, reservation, events))
    }

    /// Settle a fine, dated today
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::FineNotFound` or `LedgerError::AlreadyPaid`.
    pub fn pay_fine(&mut self, fine: FineId) -> LedgerResult<Fine> {
        self.transact(|conn, rules, events| {
            let paid = fines::pay_fine(conn, fine, rules.today)?;
            events.push(LedgerEvent::FinePaid(paid.clone()));
            Ok(paid)
        })
    }

    /// Sum of a user's unpaid fines
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Storage` if the query fails.
    pub fn total_unpaid_fines(&mut self, user: UserId) -> LedgerResult<Money> {
        self.store.read(|conn| fines::total_unpaid_fines(conn, user))
    }
}

// Include tests module
#[cfg(test)]
mod tests;

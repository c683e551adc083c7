//! Per-book wait-lists.
//!
//! A reservation asks for the next free copy of a title, not a specific copy.
//! When a copy of that title is returned, [`on_copy_freed`] runs inside the
//! returning transaction and hands the copy to the oldest pending reservation
//! whose user may borrow. The copy is therefore never visible as available to
//! another session while someone eligible is waiting for it.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use crate::{
    catalog,
    error::{ErrorKind, Ineligibility, LedgerError, LedgerResult},
    events::LedgerEvent,
    ledger::{self, LendingRules},
    membership,
    model::{BookId, Borrow, CopyId, Reservation, ReservationId, ReservationStatus, UserId, UserStatus},
};

/// Look up a reservation
///
/// # Errors
///
/// Returns `LedgerError::ReservationNotFound` if there is no such reservation.
pub fn get_reservation(conn: &Connection, reservation: ReservationId) -> LedgerResult<Reservation> {
    let sql = format!("SELECT {} FROM reservations WHERE reservation_id = ?1", Reservation::COLUMNS);
    conn.query_row(&sql, params![reservation], Reservation::from_row)
        .optional()?
        .ok_or(LedgerError::ReservationNotFound(reservation))
}

/// Pending reservations for `book` in the order they will be served
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn pending_for(conn: &Connection, book: BookId) -> LedgerResult<Vec<Reservation>> {
    let sql = format!(
        "SELECT {} FROM reservations WHERE book_id = ?1 AND status = ?2 \
         ORDER BY reservation_date, reservation_id",
        Reservation::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let queue: Vec<Reservation> = stmt
        .query_map(params![book, ReservationStatus::Pending], Reservation::from_row)?
        .collect::<Result<_, _>>()?;
    Ok(queue)
}

/// Every reservation a user has placed, newest first
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn reservations_for(conn: &Connection, user: UserId) -> LedgerResult<Vec<Reservation>> {
    let sql = format!(
        "SELECT {} FROM reservations WHERE user_id = ?1 \
         ORDER BY reservation_date DESC, reservation_id DESC",
        Reservation::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let placed: Vec<Reservation> =
        stmt.query_map(params![user], Reservation::from_row)?.collect::<Result<_, _>>()?;
    Ok(placed)
}

/// Put `user` on the wait-list for `book`
///
/// # Errors
///
/// - `LedgerError::UserNotFound` / `LedgerError::BookNotFound` for unknown ids
/// - `LedgerError::IneligibleUser` if the user's membership is inactive
/// - `LedgerError::CopyAvailable` if a copy can be borrowed right now
/// - `LedgerError::AlreadyReserved` if the user is already waiting for the book
pub fn reserve(
    conn: &Connection,
    rules: &LendingRules<'_>,
    user: UserId,
    book: BookId,
    events: &mut Vec<LedgerEvent>,
) -> LedgerResult<Reservation> {
    if membership::get_user_status(conn, user)? == UserStatus::Inactive {
        return Err(LedgerError::IneligibleUser { user, reason: Ineligibility::Inactive });
    }
    catalog::get_book(conn, book)?;
    if catalog::find_available_copy(conn, book)?.is_some() {
        return Err(LedgerError::CopyAvailable(book));
    }
    let waiting: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM reservations WHERE user_id = ?1 AND book_id = ?2 AND status = ?3)",
        params![user, book, ReservationStatus::Pending],
        |row| row.get(0),
    )?;
    if waiting {
        return Err(LedgerError::AlreadyReserved { user, book });
    }
    conn.execute(
        "INSERT INTO reservations (user_id, book_id, reservation_date, status) VALUES (?1, ?2, ?3, ?4)",
        params![user, book, rules.today, ReservationStatus::Pending],
    )?;
    let reservation = get_reservation(conn, ReservationId(conn.last_insert_rowid()))?;
    events.push(LedgerEvent::Reserved(reservation.clone()));
    Ok(reservation)
}

/// Mark `user`'s pending reservation for `book` fulfilled, if there is one
///
/// Called when the user walks up and borrows the title directly, so the
/// reservation cannot later claim a second copy for them.
///
/// # Errors
///
/// Returns `LedgerError::Storage` if a statement fails.
pub(crate) fn fulfil_own(conn: &Connection, user: UserId, book: BookId) -> LedgerResult<Option<ReservationId>> {
    let reservation: Option<ReservationId> = conn
        .query_row(
            "SELECT reservation_id FROM reservations WHERE user_id = ?1 AND book_id = ?2 AND status = ?3",
            params![user, book, ReservationStatus::Pending],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = reservation {
        conn.execute(
            "UPDATE reservations SET status = ?1 WHERE reservation_id = ?2",
            params![ReservationStatus::Fulfilled, id],
        )?;
        debug!(reservation = %id, %user, %book, "reservation fulfilled by walk-up issue");
    }
    Ok(reservation)
}

/// Withdraw a pending reservation
///
/// # Errors
///
/// Returns `LedgerError::ReservationNotFound` if the reservation does not
/// exist or is already fulfilled or cancelled.
pub fn cancel(
    conn: &Connection,
    reservation: ReservationId,
    events: &mut Vec<LedgerEvent>,
) -> LedgerResult<Reservation> {
    let updated = conn.execute(
        "UPDATE reservations SET status = ?1 WHERE reservation_id = ?2 AND status = ?3",
        params![ReservationStatus::Cancelled, reservation, ReservationStatus::Pending],
    )?;
    if updated == 0 {
        return Err(LedgerError::ReservationNotFound(reservation));
    }
    let cancelled = get_reservation(conn, reservation)?;
    events.push(LedgerEvent::ReservationCancelled(cancelled.clone()));
    Ok(cancelled)
}

/// Hand a just-returned copy to the first eligible user waiting for its book
///
/// Must run in the transaction that freed `copy`. Pending reservations are
/// served oldest first; a user who may not borrow right now is skipped and
/// keeps their place for the next copy. Returns the new borrow, or `None` when
/// nobody eligible is waiting and the copy stays on the shelf.
///
/// # Errors
///
/// Returns `LedgerError::Storage` if a query fails.
pub fn on_copy_freed(
    conn: &Connection,
    rules: &LendingRules<'_>,
    book: BookId,
    copy: CopyId,
    events: &mut Vec<LedgerEvent>,
) -> LedgerResult<Option<Borrow>> {
    let queue = pending_for(conn, book)?;
    debug!(%book, %copy, waiting = queue.len(), "copy freed");
    for reservation in queue {
        match ledger::check_eligibility(conn, rules, reservation.user) {
            Ok(()) => {
                conn.execute(
                    "UPDATE reservations SET status = ?1 WHERE reservation_id = ?2",
                    params![ReservationStatus::Fulfilled, reservation.id],
                )?;
                let borrow = ledger::lend_copy(conn, rules, reservation.user, copy, None)?;
                events.push(LedgerEvent::Issued {
                    borrow: borrow.clone(),
                    book,
                    reservation: Some(reservation.id),
                });
                events.push(LedgerEvent::ReservationFulfilled {
                    reservation: reservation.id,
                    user: reservation.user,
                    borrow: borrow.id,
                });
                return Ok(Some(borrow));
            }
            Err(err) if matches!(err.kind(), ErrorKind::IneligibleUser | ErrorKind::NotFound) => {
                warn!(reservation = %reservation.id, user = %reservation.user, error = %err, "skipping reservation");
                events.push(LedgerEvent::ReservationSkipped {
                    reservation: reservation.id,
                    user: reservation.user,
                    reason: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests;

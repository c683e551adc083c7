#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::{cell::Cell, time::Duration};

use chrono::NaiveDate;

use super::*;
use crate::{
    catalog::{self, BookUpdate, NewBook},
    clock::ManualClock,
    error::ErrorKind,
    membership::{self, NewUser},
    model::{MembershipType, ReservationStatus},
    observers::NotificationService,
};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A ledger over an in-memory store with one title and three members
struct Fixture {
    ledger: Ledger,
    clock: ManualClock,
    book: BookId,
    users: Vec<UserId>,
}

/// Catalogue one title with `copies` copies and register three members
fn seed_library(conn: &Connection, copies: u32) -> LedgerResult<(BookId, Vec<UserId>)> {
    let book = catalog::add_book(
        conn,
        &NewBook {
            title: "Dune".to_string(),
            authors: vec!["Frank Herbert".to_string()],
            categories: vec!["Science Fiction".to_string()],
            copies,
            ..NewBook::default()
        },
    )?;
    let mut users = Vec::new();
    for name in ["ann", "ben", "cat"] {
        let user = membership::add_user(
            conn,
            &NewUser {
                full_name: name.to_string(),
                email: format!("{name}@example.org"),
                phone: None,
                username: Some(name.to_string()),
                membership_type: MembershipType::Student,
                membership_date: day(2024, 1, 1),
            },
        )?;
        users.push(user.id);
    }
    Ok((book.id, users))
}

fn setup(copies: u32, policy: LendingPolicy) -> Fixture {
    let mut store = Store::open_in_memory().unwrap();
    store.migrate().unwrap();
    let (book, users) = store.write(|conn| seed_library(conn, copies)).unwrap();
    let clock = ManualClock::new(day(2024, 3, 1));
    let ledger = Ledger::new(store, policy).with_clock(clock.clone());
    Fixture { ledger, clock, book, users }
}

/// Every copy is available exactly when no active borrow references it
fn assert_availability_consistent(ledger: &mut Ledger) {
    let mismatched: i64 = ledger
        .store()
        .read(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM book_copies bc WHERE bc.is_available = EXISTS \
                 (SELECT 1 FROM borrows br WHERE br.copy_id = bc.copy_id AND br.return_date IS NULL)",
                [],
                |row| row.get(0),
            )?)
        })
        .unwrap();
    assert_eq!(mismatched, 0, "copy availability disagrees with active borrows");
}

fn borrow_count(ledger: &mut Ledger) -> i64 {
    ledger
        .store()
        .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM borrows", [], |row| row.get(0))?))
        .unwrap()
}

#[test]
fn test_issue_then_return_on_time() {
    let mut fx = setup(2, LendingPolicy::default());
    let borrow = fx.ledger.issue(fx.users[0], fx.book, None).unwrap();
    assert_eq!(borrow.borrow_date, day(2024, 3, 1));
    assert_eq!(borrow.due_date, day(2024, 3, 15));
    assert!(borrow.is_active());
    assert_availability_consistent(&mut fx.ledger);

    let active = fx.ledger.list_active_borrows(Some(fx.users[0])).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].title, "Dune");

    fx.clock.set(day(2024, 3, 15));
    let outcome = fx.ledger.return_copy(borrow.id).unwrap();
    assert_eq!(outcome.borrow.return_date, Some(day(2024, 3, 15)));
    assert!(outcome.fine.is_none());
    assert!(outcome.reservation_borrow.is_none());
    assert!(fx.ledger.list_active_borrows(None).unwrap().is_empty());
    assert_availability_consistent(&mut fx.ledger);
}

#[test]
fn test_late_return_assesses_fine() {
    let mut fx = setup(1, LendingPolicy::default());
    let borrow = fx.ledger.issue(fx.users[0], fx.book, None).unwrap();

    fx.clock.advance_days(20);
    let outcome = fx.ledger.return_copy(borrow.id).unwrap();
    let fine = outcome.fine.unwrap();
    assert_eq!(fine.amount, Money(30));
    assert!(!fine.paid);
    assert_eq!(fine.borrow, borrow.id);
    assert_eq!(fx.ledger.total_unpaid_fines(fx.users[0]).unwrap(), Money(30));
    assert_availability_consistent(&mut fx.ledger);
}

#[test]
fn test_paying_twice_leaves_fine_untouched() {
    let mut fx = setup(1, LendingPolicy::default());
    let borrow = fx.ledger.issue(fx.users[0], fx.book, None).unwrap();
    fx.clock.advance_days(20);
    let fine = fx.ledger.return_copy(borrow.id).unwrap().fine.unwrap();

    let paid = fx.ledger.pay_fine(fine.id).unwrap();
    assert!(paid.paid);
    assert_eq!(paid.payment_date, Some(day(2024, 3, 21)));
    assert_eq!(fx.ledger.total_unpaid_fines(fx.users[0]).unwrap(), Money::ZERO);

    fx.clock.advance_days(5);
    let again = fx.ledger.pay_fine(fine.id);
    assert!(matches!(again, Err(LedgerError::AlreadyPaid(id)) if id == fine.id));
    let stored = fx.ledger.store().read(|conn| fines::get_fine(conn, fine.id)).unwrap();
    assert_eq!(stored, paid);
}

#[test]
fn test_unknown_fine() {
    let mut fx = setup(1, LendingPolicy::default());
    let result = fx.ledger.pay_fine(FineId(99));
    assert!(matches!(result, Err(LedgerError::FineNotFound(FineId(99)))));
}

#[test]
fn test_unpaid_fines_block_borrowing() {
    let mut fx = setup(2, LendingPolicy::default());
    let borrow = fx.ledger.issue(fx.users[0], fx.book, None).unwrap();
    fx.clock.advance_days(20);
    fx.ledger.return_copy(borrow.id).unwrap();
    let before = borrow_count(&mut fx.ledger);

    let refused = fx.ledger.issue(fx.users[0], fx.book, None);
    assert!(matches!(
        refused,
        Err(LedgerError::IneligibleUser {
            reason: Ineligibility::UnpaidFines { owed: Money(30), cap: Money(0) },
            ..
        })
    ));
    assert_eq!(borrow_count(&mut fx.ledger), before);
    assert_availability_consistent(&mut fx.ledger);
}

#[test]
fn test_disabled_fine_cap_allows_borrowing() {
    let policy = LendingPolicy { fine_cap: None, ..LendingPolicy::default() };
    let mut fx = setup(1, policy);
    let borrow = fx.ledger.issue(fx.users[0], fx.book, None).unwrap();
    fx.clock.advance_days(20);
    fx.ledger.return_copy(borrow.id).unwrap();
    assert!(fx.ledger.issue(fx.users[0], fx.book, None).is_ok());
}

#[test]
fn test_inactive_user_cannot_borrow() {
    let mut fx = setup(1, LendingPolicy::default());
    let user = fx.users[0];
    fx.ledger
        .store()
        .write(|conn| membership::set_status(conn, user, UserStatus::Inactive))
        .unwrap();

    let result = fx.ledger.issue(user, fx.book, None);
    assert!(matches!(
        result,
        Err(LedgerError::IneligibleUser { reason: Ineligibility::Inactive, .. })
    ));
    assert_eq!(borrow_count(&mut fx.ledger), 0);
}

#[test]
fn test_unknown_ids_are_rejected() {
    let mut fx = setup(1, LendingPolicy::default());
    let book = fx.book;
    let user = fx.users[0];
    assert!(matches!(
        fx.ledger.issue(UserId(99), book, None),
        Err(LedgerError::UserNotFound(UserId(99)))
    ));
    assert!(matches!(
        fx.ledger.issue(user, BookId(99), None),
        Err(LedgerError::BookNotFound(BookId(99)))
    ));
    assert!(matches!(
        fx.ledger.issue(user, book, Some(LibrarianId(7))),
        Err(LedgerError::LibrarianNotFound(LibrarianId(7)))
    ));
    assert_eq!(borrow_count(&mut fx.ledger), 0);
}

#[test]
fn test_issue_picks_lowest_copy_until_exhausted() {
    let mut fx = setup(3, LendingPolicy::default());
    let book = fx.book;
    let copies = fx.ledger.store().read(|conn| catalog::copies_of(conn, book)).unwrap();

    let issued: Vec<CopyId> = fx
        .users
        .clone()
        .into_iter()
        .map(|user| fx.ledger.issue(user, book, None).unwrap().copy)
        .collect();
    let expected: Vec<CopyId> = copies.iter().map(|c| c.id).collect();
    assert_eq!(issued, expected);

    let exhausted = fx.ledger.issue(fx.users[0], book, None);
    assert!(matches!(exhausted, Err(LedgerError::NoCopyAvailable(b)) if b == book));
    assert_availability_consistent(&mut fx.ledger);
}

#[test]
fn test_return_errors() {
    let mut fx = setup(1, LendingPolicy::default());
    assert!(matches!(
        fx.ledger.return_copy(BorrowId(42)),
        Err(LedgerError::BorrowNotFound(BorrowId(42)))
    ));

    let borrow = fx.ledger.issue(fx.users[0], fx.book, None).unwrap();
    fx.ledger.return_copy(borrow.id).unwrap();
    let again = fx.ledger.return_copy(borrow.id);
    assert!(matches!(again, Err(LedgerError::AlreadyReturned(id)) if id == borrow.id));
    assert_availability_consistent(&mut fx.ledger);
}

#[test]
fn test_returned_copy_goes_to_waiting_reservation() {
    let mut fx = setup(1, LendingPolicy::default());
    let (ann, ben, cat) = (fx.users[0], fx.users[1], fx.users[2]);
    let notices = NotificationService::new();
    fx.ledger.register_observer(Box::new(notices.clone()));

    let first = fx.ledger.issue(ann, fx.book, None).unwrap();
    let reservation = fx.ledger.reserve(ben, fx.book).unwrap();
    assert_eq!(reservation.status, ReservationStatus::Pending);
    assert!(matches!(fx.ledger.issue(cat, fx.book, None), Err(LedgerError::NoCopyAvailable(_))));
    assert_eq!(notices.drain().len(), 1);

    fx.clock.advance_days(3);
    let outcome = fx.ledger.return_copy(first.id).unwrap();
    let handed_on = outcome.reservation_borrow.unwrap();
    assert_eq!(handed_on.user, ben);
    assert_eq!(handed_on.copy, first.copy);
    assert_eq!(handed_on.borrow_date, day(2024, 3, 4));
    assert_eq!(handed_on.due_date, day(2024, 3, 18));

    let walk_up = fx.ledger.issue(cat, fx.book, None);
    assert!(matches!(walk_up, Err(LedgerError::NoCopyAvailable(_))));

    let stored = fx
        .ledger
        .store()
        .read(|conn| reservations::get_reservation(conn, reservation.id))
        .unwrap();
    assert_eq!(stored.status, ReservationStatus::Fulfilled);
    assert!(notices.drain().iter().any(|n| n.user == ben));
    assert_availability_consistent(&mut fx.ledger);
}

#[test]
fn test_ineligible_reserver_is_skipped() {
    let mut fx = setup(1, LendingPolicy::default());
    let (ann, ben, cat) = (fx.users[0], fx.users[1], fx.users[2]);
    let notices = NotificationService::new();
    fx.ledger.register_observer(Box::new(notices.clone()));

    let first = fx.ledger.issue(ann, fx.book, None).unwrap();
    let skipped = fx.ledger.reserve(ben, fx.book).unwrap();
    fx.ledger.reserve(cat, fx.book).unwrap();
    fx.ledger
        .store()
        .write(|conn| membership::set_status(conn, ben, UserStatus::Inactive))
        .unwrap();
    assert_eq!(notices.drain().len(), 1);

    let outcome = fx.ledger.return_copy(first.id).unwrap();
    assert_eq!(outcome.reservation_borrow.map(|b| b.user), Some(cat));

    let still_waiting = fx
        .ledger
        .store()
        .read(|conn| reservations::get_reservation(conn, skipped.id))
        .unwrap();
    assert_eq!(still_waiting.status, ReservationStatus::Pending);
    let sent = notices.drain();
    assert!(sent.iter().any(|n| n.user == ben && n.message.contains("inactive")));
    assert!(sent.iter().any(|n| n.user == cat));
    assert_availability_consistent(&mut fx.ledger);
}

#[test]
fn test_added_copies_go_to_waiting_reservations() {
    let mut fx = setup(1, LendingPolicy::default());
    let (ann, ben, cat) = (fx.users[0], fx.users[1], fx.users[2]);
    let notices = NotificationService::new();
    fx.ledger.register_observer(Box::new(notices.clone()));

    fx.ledger.issue(ann, fx.book, None).unwrap();
    let reservation = fx.ledger.reserve(ben, fx.book).unwrap();
    assert_eq!(notices.drain().len(), 1);

    let outcome = fx
        .ledger
        .update_book(fx.book, &BookUpdate { copies: Some(2), ..BookUpdate::default() })
        .unwrap();
    assert_eq!(outcome.book.total_copies, 2);
    assert_eq!(outcome.reservation_borrows.len(), 1);
    assert_eq!(outcome.reservation_borrows[0].user, ben);

    let stored = fx
        .ledger
        .store()
        .read(|conn| reservations::get_reservation(conn, reservation.id))
        .unwrap();
    assert_eq!(stored.status, ReservationStatus::Fulfilled);
    assert!(matches!(fx.ledger.issue(cat, fx.book, None), Err(LedgerError::NoCopyAvailable(_))));
    assert!(notices.drain().iter().any(|n| n.user == ben));
    assert_availability_consistent(&mut fx.ledger);

    let quiet = fx
        .ledger
        .update_book(fx.book, &BookUpdate { copies: Some(3), ..BookUpdate::default() })
        .unwrap();
    assert!(quiet.reservation_borrows.is_empty());
    assert_eq!(quiet.book.available_copies, 1);
    assert_availability_consistent(&mut fx.ledger);
}

#[test]
fn test_walk_up_issue_fulfils_own_reservation() {
    let mut fx = setup(2, LendingPolicy::default());
    let (ann, ben, cat) = (fx.users[0], fx.users[1], fx.users[2]);
    let from_ann = fx.ledger.issue(ann, fx.book, None).unwrap();
    let from_ben = fx.ledger.issue(ben, fx.book, None).unwrap();
    let reservation = fx.ledger.reserve(cat, fx.book).unwrap();
    fx.ledger
        .store()
        .write(|conn| membership::set_status(conn, cat, UserStatus::Inactive))
        .unwrap();

    let skipped = fx.ledger.return_copy(from_ann.id).unwrap();
    assert!(skipped.reservation_borrow.is_none());

    fx.ledger
        .store()
        .write(|conn| membership::set_status(conn, cat, UserStatus::Active))
        .unwrap();
    let notices = NotificationService::new();
    fx.ledger.register_observer(Box::new(notices.clone()));
    fx.ledger.issue(cat, fx.book, None).unwrap();
    let sent = notices.drain();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].message.contains("reserved"));

    let stored = fx
        .ledger
        .store()
        .read(|conn| reservations::get_reservation(conn, reservation.id))
        .unwrap();
    assert_eq!(stored.status, ReservationStatus::Fulfilled);

    let outcome = fx.ledger.return_copy(from_ben.id).unwrap();
    assert!(outcome.reservation_borrow.is_none());
    assert_eq!(fx.ledger.list_active_borrows(Some(cat)).unwrap().len(), 1);
    assert_availability_consistent(&mut fx.ledger);
}

#[test]
fn test_copy_stays_on_shelf_when_nobody_eligible_waits() {
    let mut fx = setup(1, LendingPolicy::default());
    let (ann, ben) = (fx.users[0], fx.users[1]);
    let first = fx.ledger.issue(ann, fx.book, None).unwrap();
    fx.ledger.reserve(ben, fx.book).unwrap();
    fx.ledger
        .store()
        .write(|conn| membership::set_status(conn, ben, UserStatus::Inactive))
        .unwrap();

    let outcome = fx.ledger.return_copy(first.id).unwrap();
    assert!(outcome.reservation_borrow.is_none());
    let book = fx.book;
    let copy = fx.ledger.store().read(|conn| catalog::find_available_copy(conn, book)).unwrap();
    assert_eq!(copy.map(|c| c.id), Some(first.copy));
    assert_availability_consistent(&mut fx.ledger);
}

#[test]
fn test_reserve_rules() {
    let mut fx = setup(1, LendingPolicy::default());
    let (ann, ben) = (fx.users[0], fx.users[1]);

    let available = fx.ledger.reserve(ben, fx.book);
    assert!(matches!(available, Err(LedgerError::CopyAvailable(_))));

    fx.ledger.issue(ann, fx.book, None).unwrap();
    fx.ledger.reserve(ben, fx.book).unwrap();
    let twice = fx.ledger.reserve(ben, fx.book);
    assert!(matches!(twice, Err(LedgerError::AlreadyReserved { user, .. }) if user == ben));
    assert_eq!(twice.unwrap_err().kind(), ErrorKind::InvalidState);
}

#[test]
fn test_cancelled_reservation_is_not_served() {
    let mut fx = setup(1, LendingPolicy::default());
    let (ann, ben) = (fx.users[0], fx.users[1]);
    let first = fx.ledger.issue(ann, fx.book, None).unwrap();
    let reservation = fx.ledger.reserve(ben, fx.book).unwrap();

    let cancelled = fx.ledger.cancel_reservation(reservation.id).unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    let again = fx.ledger.cancel_reservation(reservation.id);
    assert!(matches!(again, Err(LedgerError::ReservationNotFound(_))));
    assert!(matches!(
        fx.ledger.cancel_reservation(ReservationId(77)),
        Err(LedgerError::ReservationNotFound(ReservationId(77)))
    ));

    let outcome = fx.ledger.return_copy(first.id).unwrap();
    assert!(outcome.reservation_borrow.is_none());
    assert_availability_consistent(&mut fx.ledger);
}

#[test]
fn test_failed_operation_notifies_nobody() {
    let mut fx = setup(1, LendingPolicy::default());
    let notices = NotificationService::new();
    fx.ledger.register_observer(Box::new(notices.clone()));

    assert!(fx.ledger.issue(UserId(99), fx.book, None).is_err());
    assert!(notices.drain().is_empty());

    fx.ledger.issue(fx.users[0], fx.book, None).unwrap();
    assert_eq!(notices.drain().len(), 1);
}

#[test]
fn test_account_summary_and_history() {
    let mut fx = setup(2, LendingPolicy::default());
    let ann = fx.users[0];
    let first = fx.ledger.issue(ann, fx.book, None).unwrap();
    fx.clock.advance_days(20);
    fx.ledger.return_copy(first.id).unwrap();
    fx.ledger.store().write(|conn| {
        let rules = LendingRules {
            policy: &LendingPolicy { fine_cap: None, ..LendingPolicy::default() },
            late_fees: &FlatDailyRate { daily_rate: Money(5) },
            today: day(2024, 3, 21),
        };
        issue(conn, &rules, ann, fx.book, None, &mut Vec::new())
    })
    .unwrap();

    let summary = fx.ledger.account_summary(ann).unwrap();
    assert_eq!(summary.total_borrowed, 2);
    assert_eq!(summary.currently_borrowed, 1);
    assert_eq!(summary.fines_due, Money(30));

    let history = fx.ledger.borrow_history(Some(ann)).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].borrow.is_active());
    assert!(!history[1].borrow.is_active());
}

#[test]
fn test_concurrent_issue_of_last_copy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("library.db");
    let policy = LendingPolicy::default();

    let mut first = Store::open(&path, policy.busy_timeout()).unwrap();
    first.migrate().unwrap();
    let (book, users) = first.write(|conn| seed_library(conn, 1)).unwrap();
    let second = Store::open(&path, policy.busy_timeout()).unwrap();

    let clock = ManualClock::new(day(2024, 3, 1));
    let mut a = Ledger::new(first, policy.clone()).with_clock(clock.clone());
    let mut b = Ledger::new(second, policy).with_clock(clock);
    let (ann, ben) = (users[0], users[1]);

    let (ra, rb) = crossbeam_utils::thread::scope(|s| {
        let ha = s.spawn(move |_| a.issue(ann, book, None));
        let hb = s.spawn(move |_| b.issue(ben, book, None));
        (ha.join().unwrap(), hb.join().unwrap())
    })
    .unwrap();

    let results = [ra, rb];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(loser.kind(), ErrorKind::NoCopyAvailable | ErrorKind::Conflict));

    let mut check = Store::open(&path, Duration::from_secs(1)).unwrap();
    let active = check.read(|conn| list_active_borrows(conn, None)).unwrap();
    assert_eq!(active.len(), 1);
}

#[test]
fn test_locked_database_reports_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("library.db");

    let mut holder = Store::open(&path, Duration::from_secs(5)).unwrap();
    holder.migrate().unwrap();
    let (book, users) = holder.write(|conn| seed_library(conn, 1)).unwrap();
    let contender = Store::open(&path, Duration::ZERO).unwrap();
    let mut ledger = Ledger::new(contender, LendingPolicy::default())
        .with_clock(ManualClock::new(day(2024, 3, 1)));

    let err = holder.write(|_| Ok(ledger.issue(users[0], book, None).unwrap_err())).unwrap();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.is_retryable());
    assert_eq!(borrow_count(&mut ledger), 0);
}

#[test]
fn test_conflict_retry() {
    let calls = Cell::new(0_u32);
    let result = with_conflict_retry(3, || {
        calls.set(calls.get().saturating_add(1));
        if calls.get() < 3 { Err(LedgerError::Conflict("busy".to_string())) } else { Ok(calls.get()) }
    });
    assert_eq!(result.unwrap(), 3);

    calls.set(0);
    let exhausted: LedgerResult<()> = with_conflict_retry(2, || {
        calls.set(calls.get().saturating_add(1));
        Err(LedgerError::Conflict("busy".to_string()))
    });
    assert!(exhausted.unwrap_err().is_retryable());
    assert_eq!(calls.get(), 2);

    calls.set(0);
    let fatal: LedgerResult<()> = with_conflict_retry(5, || {
        calls.set(calls.get().saturating_add(1));
        Err(LedgerError::NoCopyAvailable(BookId(1)))
    });
    assert!(fatal.is_err());
    assert_eq!(calls.get(), 1);
}

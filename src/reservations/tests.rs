#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use chrono::NaiveDate;

use super::*;
use crate::{
    catalog::NewBook,
    config::LendingPolicy,
    fines::FlatDailyRate,
    membership::NewUser,
    model::{Money, MembershipType},
    store::Store,
};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A store holding one title whose only copy is already on loan, plus four members
fn setup() -> (Store, BookId, Vec<UserId>) {
    let mut store = Store::open_in_memory().unwrap();
    store.migrate().unwrap();
    let (book, users) = store
        .write(|conn| {
            let book = catalog::add_book(
                conn,
                &NewBook { title: "Solaris".to_string(), copies: 1, ..NewBook::default() },
            )?;
            let mut users = Vec::new();
            for name in ["dan", "eve", "fay", "gus"] {
                let user = membership::add_user(
                    conn,
                    &NewUser {
                        full_name: name.to_string(),
                        email: format!("{name}@example.org"),
                        phone: None,
                        username: None,
                        membership_type: MembershipType::Researcher,
                        membership_date: day(2023, 6, 1),
                    },
                )?;
                users.push(user.id);
            }
            let copy = catalog::find_available_copy(conn, book.id)?.unwrap();
            catalog::set_copy_availability(conn, copy.id, false)?;
            Ok((book.id, users))
        })
        .unwrap();
    (store, book, users)
}

/// Fee policy shared by every test
static LATE_FEES: FlatDailyRate = FlatDailyRate { daily_rate: Money(5) };

fn rules(policy: &LendingPolicy, today: NaiveDate) -> LendingRules<'_> {
    LendingRules { policy, late_fees: &LATE_FEES, today }
}

#[test]
fn test_queue_is_first_come_first_served() {
    let (mut store, book, users) = setup();
    let policy = LendingPolicy::default();
    let mut events = Vec::new();
    store
        .write(|conn| {
            reserve(conn, &rules(&policy, day(2024, 5, 3)), users[2], book, &mut events)?;
            reserve(conn, &rules(&policy, day(2024, 5, 1)), users[0], book, &mut events)?;
            reserve(conn, &rules(&policy, day(2024, 5, 3)), users[1], book, &mut events)?;
            Ok(())
        })
        .unwrap();

    let queue = store.read(|conn| pending_for(conn, book)).unwrap();
    let order: Vec<UserId> = queue.iter().map(|r| r.user).collect();
    assert_eq!(order, vec![users[0], users[2], users[1]]);
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| matches!(e, LedgerEvent::Reserved(_))));
}

#[test]
fn test_inactive_user_cannot_reserve() {
    let (mut store, book, users) = setup();
    let policy = LendingPolicy::default();
    let result = store.write(|conn| {
        membership::set_status(conn, users[3], UserStatus::Inactive)?;
        reserve(conn, &rules(&policy, day(2024, 5, 1)), users[3], book, &mut Vec::new())
    });
    assert!(matches!(
        result,
        Err(LedgerError::IneligibleUser { reason: Ineligibility::Inactive, .. })
    ));
}

#[test]
fn test_reserve_unknown_book() {
    let (mut store, _, users) = setup();
    let policy = LendingPolicy::default();
    let result = store.write(|conn| {
        reserve(conn, &rules(&policy, day(2024, 5, 1)), users[0], BookId(404), &mut Vec::new())
    });
    assert!(matches!(result, Err(LedgerError::BookNotFound(BookId(404)))));
}

#[test]
fn test_user_may_reserve_again_after_cancelling() {
    let (mut store, book, users) = setup();
    let policy = LendingPolicy::default();
    let placed = store
        .write(|conn| {
            let today = rules(&policy, day(2024, 5, 1));
            let first = reserve(conn, &today, users[0], book, &mut Vec::new())?;
            cancel(conn, first.id, &mut Vec::new())?;
            reserve(conn, &today, users[0], book, &mut Vec::new())?;
            reservations_for(conn, users[0])
        })
        .unwrap();
    assert_eq!(placed.len(), 2);
    assert_eq!(placed[0].status, ReservationStatus::Pending);
    assert_eq!(placed[1].status, ReservationStatus::Cancelled);
}

#[test]
fn test_freed_copy_without_waiters_stays_put() {
    let (mut store, book, _) = setup();
    let policy = LendingPolicy::default();
    let mut events = Vec::new();
    let handed = store
        .write(|conn| {
            let copy = catalog::copies_of(conn, book)?[0].id;
            catalog::set_copy_availability(conn, copy, true)?;
            on_copy_freed(conn, &rules(&policy, day(2024, 5, 1)), book, copy, &mut events)
        })
        .unwrap();
    assert!(handed.is_none());
    assert!(events.is_empty());
}

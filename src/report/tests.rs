#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

use super::*;
use crate::{
    catalog::{self, NewBook},
    clock::{Clock, ManualClock},
    config::LendingPolicy,
    ledger::Ledger,
    membership::{self, NewUser},
    model::{MembershipType, UserId},
    store::Store,
};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Three titles (2, 1 and 1 copies) and four members; ann, ben and cat borrow,
/// dee never does.
///
/// On 2024-03-25: ben and cat are 10 days overdue, ann returned 10 days late
/// (fine 50) and borrowed the first title again.
struct Library {
    ledger: Ledger,
    clock: ManualClock,
    books: Vec<BookId>,
    users: Vec<UserId>,
}

fn library() -> Library {
    let mut store = Store::open_in_memory().unwrap();
    store.migrate().unwrap();
    let (books, users) = store
        .write(|conn| {
            let mut books = Vec::new();
            for (title, author, copies) in
                [("Emma", "Jane Austen", 2), ("Persuasion", "Jane Austen", 1), ("Ulysses", "James Joyce", 1)]
            {
                let book = catalog::add_book(
                    conn,
                    &NewBook {
                        title: title.to_string(),
                        authors: vec![author.to_string()],
                        categories: vec!["Novel".to_string()],
                        copies,
                        ..NewBook::default()
                    },
                )?;
                books.push(book.id);
            }
            let mut users = Vec::new();
            for name in ["ann", "ben", "cat", "dee"] {
                let user = membership::add_user(
                    conn,
                    &NewUser {
                        full_name: name.to_string(),
                        email: format!("{name}@example.org"),
                        phone: None,
                        username: None,
                        membership_type: MembershipType::Teacher,
                        membership_date: day(2024, 1, 1),
                    },
                )?;
                users.push(user.id);
            }
            Ok((books, users))
        })
        .unwrap();

    let clock = ManualClock::new(day(2024, 3, 1));
    let policy = LendingPolicy { fine_cap: None, ..LendingPolicy::default() };
    let mut ledger = Ledger::new(store, policy).with_clock(clock.clone());
    let late = ledger.issue(users[0], books[0], None).unwrap();
    ledger.issue(users[1], books[0], None).unwrap();
    ledger.issue(users[2], books[1], None).unwrap();
    clock.set(day(2024, 3, 25));
    ledger.return_copy(late.id).unwrap();
    ledger.issue(users[0], books[0], None).unwrap();
    Library { ledger, clock, books, users }
}

fn report(lib: &mut Library, kind: ReportKind, limit: u32) -> Report {
    let today = lib.clock.today();
    lib.ledger.store().read(|conn| run(conn, kind, today, limit)).unwrap()
}

#[test]
fn test_overdue_lists_only_late_active_borrows() {
    let mut lib = library();
    let Report::Overdue(rows) = report(&mut lib, ReportKind::Overdue, 10) else {
        panic!("wrong report");
    };
    let users: Vec<UserId> = rows.iter().map(|o| o.details.borrow.user).collect();
    assert_eq!(users, vec![lib.users[1], lib.users[2]]);
    assert!(rows.iter().all(|o| o.days_overdue == 10));
}

#[test]
fn test_borrow_counts_and_ranking() {
    let mut lib = library();
    let Report::MostBorrowed(most) = report(&mut lib, ReportKind::MostBorrowed, 1) else {
        panic!("wrong report");
    };
    assert_eq!(most.len(), 1);
    assert_eq!((most[0].book, most[0].borrows), (lib.books[0], 3));

    let Report::LeastBorrowed(least) = report(&mut lib, ReportKind::LeastBorrowed, 1) else {
        panic!("wrong report");
    };
    assert_eq!((least[0].book, least[0].borrows), (lib.books[2], 0));

    let Report::BorrowRanking(ranked) = report(&mut lib, ReportKind::BorrowRanking, 0) else {
        panic!("wrong report");
    };
    let ranks: Vec<u32> = ranked.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3]);

    let Report::PopularAuthors(authors) = report(&mut lib, ReportKind::PopularAuthors, 5) else {
        panic!("wrong report");
    };
    assert_eq!(authors.len(), 1);
    assert_eq!((authors[0].full_name.as_str(), authors[0].borrows), ("Jane Austen", 4));
}

#[test]
fn test_fine_reports_follow_payment() {
    let mut lib = library();
    let Report::UnpaidFines(owing) = report(&mut lib, ReportKind::UnpaidFines, 10) else {
        panic!("wrong report");
    };
    assert_eq!(owing.len(), 1);
    assert_eq!((owing[0].user, owing[0].amount), (lib.users[0], Money(50)));

    lib.clock.set(day(2024, 4, 2));
    let ann = lib.users[0];
    let fine = lib.ledger.store().read(|conn| crate::fines::fines_for(conn, ann)).unwrap()[0].id;
    lib.ledger.pay_fine(fine).unwrap();

    let Report::FinesByMonth(months) = report(&mut lib, ReportKind::FinesByMonth, 10) else {
        panic!("wrong report");
    };
    assert_eq!(
        months,
        vec![MonthlyFines { month: "2024-04".to_string(), collected: Money(50), fines: 1 }]
    );
    let Report::Outstanding(counts) = report(&mut lib, ReportKind::Outstanding, 10) else {
        panic!("wrong report");
    };
    assert_eq!(counts, OutstandingCounts { users_with_active_borrows: 3, users_with_unpaid_fines: 0 });
    let Report::TopFined(top) = report(&mut lib, ReportKind::TopFined, 10) else {
        panic!("wrong report");
    };
    assert_eq!(top[0].amount, Money(50));
}

#[test]
fn test_stock_and_membership_reports() {
    let mut lib = library();
    let Report::Availability(stock) = report(&mut lib, ReportKind::Availability, 10) else {
        panic!("wrong report");
    };
    assert_eq!(
        stock,
        AvailabilitySummary { titles: 3, titles_available: 1, copies: 4, copies_available: 1, copies_on_loan: 3 }
    );

    let Report::NeverBorrowed(idle) = report(&mut lib, ReportKind::NeverBorrowed, 10) else {
        panic!("wrong report");
    };
    assert_eq!(idle.iter().map(|u| u.user).collect::<Vec<_>>(), vec![lib.users[3]]);

    let Report::BooksPerCategory(categories) = report(&mut lib, ReportKind::BooksPerCategory, 10) else {
        panic!("wrong report");
    };
    assert_eq!((categories[0].name.as_str(), categories[0].books), ("Novel", 3));
}

#[test]
fn test_reservation_and_rating_reports() {
    let mut lib = library();
    let (dee, persuasion) = (lib.users[3], lib.books[1]);
    lib.ledger.reserve(dee, persuasion).unwrap();
    lib.ledger
        .store()
        .write(|conn| {
            catalog::add_review(conn, dee, persuasion, 5, Some("wonderful"), day(2024, 3, 25))?;
            catalog::add_review(conn, dee, persuasion, 4, None, day(2024, 3, 26))?;
            Ok(())
        })
        .unwrap();

    let Report::PendingReservations(pending) = report(&mut lib, ReportKind::PendingReservations, 10) else {
        panic!("wrong report");
    };
    assert_eq!(pending.len(), 1);
    assert_eq!((pending[0].user, pending[0].book), (dee, persuasion));

    let Report::AverageRatings(ratings) = report(&mut lib, ReportKind::AverageRatings, 10) else {
        panic!("wrong report");
    };
    assert_eq!(ratings.len(), 1);
    assert!((ratings[0].average_rating - 4.5).abs() < f64::EPSILON);
    assert_eq!(ratings[0].reviews, 2);
}

#[test]
fn test_report_kind_names_round_trip() {
    for kind in ReportKind::ALL {
        assert_eq!(kind.name().parse::<ReportKind>().unwrap(), kind);
    }
    assert_eq!("fines_by_month".parse::<ReportKind>().unwrap(), ReportKind::FinesByMonth);
    assert!("nonsense".parse::<ReportKind>().is_err());
}

#[test]
fn test_report_serialises_with_tag() {
    let mut lib = library();
    let json = serde_json::to_value(report(&mut lib, ReportKind::Outstanding, 10)).unwrap();
    assert_eq!(json["report"], "outstanding");
    assert_eq!(json["rows"]["users_with_active_borrows"], 3);
}

//! Read-only reports over the lending history.
//!
//! Every report is a typed, serialisable row set. [`run`] executes one report
//! by kind; callers wrap it in `Store::read` so all of its queries see a single
//! snapshot.

use std::{fmt, str::FromStr};

use chrono::NaiveDate;
use rusqlite::{Connection, Params, Row, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::LedgerResult,
    model::{AuthorId, BookId, BorrowDetails, CategoryId, Money, ReservationId, ReservationStatus, UserId},
};

/// The reports [`run`] can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportKind {
    /// Active borrows past their due date
    Overdue,
    /// Titles lent most often
    MostBorrowed,
    /// Titles lent least often, never-lent titles included
    LeastBorrowed,
    /// Members who owe money
    UnpaidFines,
    /// Mean review rating per title
    AverageRatings,
    /// Authors whose books are lent most often
    PopularAuthors,
    /// Wait-list entries not yet served
    PendingReservations,
    /// Titles filed under each category
    BooksPerCategory,
    /// Members who borrow most
    ActiveUsers,
    /// Copy and title totals, on the shelf and on loan
    Availability,
    /// Fines settled per calendar month
    FinesByMonth,
    /// Members with no borrows at all
    NeverBorrowed,
    /// Members with the largest fines ever assessed
    TopFined,
    /// Titles ranked by times lent, ties sharing a rank
    BorrowRanking,
    /// How many members hold loans or owe money
    Outstanding,
}

impl ReportKind {
    /// Every report, in menu order
    pub const ALL: [Self; 15] = [
        Self::Overdue,
        Self::MostBorrowed,
        Self::LeastBorrowed,
        Self::UnpaidFines,
        Self::AverageRatings,
        Self::PopularAuthors,
        Self::PendingReservations,
        Self::BooksPerCategory,
        Self::ActiveUsers,
        Self::Availability,
        Self::FinesByMonth,
        Self::NeverBorrowed,
        Self::TopFined,
        Self::BorrowRanking,
        Self::Outstanding,
    ];

    /// Name used on the command line and in JSON
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Overdue => "overdue",
            Self::MostBorrowed => "most-borrowed",
            Self::LeastBorrowed => "least-borrowed",
            Self::UnpaidFines => "unpaid-fines",
            Self::AverageRatings => "average-ratings",
            Self::PopularAuthors => "popular-authors",
            Self::PendingReservations => "pending-reservations",
            Self::BooksPerCategory => "books-per-category",
            Self::ActiveUsers => "active-users",
            Self::Availability => "availability",
            Self::FinesByMonth => "fines-by-month",
            Self::NeverBorrowed => "never-borrowed",
            Self::TopFined => "top-fined",
            Self::BorrowRanking => "borrow-ranking",
            Self::Outstanding => "outstanding",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|kind| kind.name() == wanted).ok_or_else(|| {
            let known: Vec<&str> = Self::ALL.iter().map(|k| k.name()).collect();
            format!("unknown report `{s}`, expected one of: {}", known.join(", "))
        })
    }
}

/// An active borrow past its due date
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OverdueBorrow {
    /// The borrow with its names
    #[serde(flatten)]
    pub details: BorrowDetails,
    /// Days past due as of the report date
    pub days_overdue: i64,
}

/// A title and how often it was lent
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BookBorrows {
    /// Title id
    pub book: BookId,
    /// Title
    pub title: String,
    /// Borrows of any of its copies
    pub borrows: u32,
}

/// A title's place in the borrow ranking
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RankedBook {
    /// 1 for the most lent; equal counts share a rank and leave a gap after
    pub rank: u32,
    /// The title and its count
    #[serde(flatten)]
    pub book: BookBorrows,
}

/// A member and an amount of money
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserAmount {
    /// Member id
    pub user: UserId,
    /// Member name
    pub full_name: String,
    /// Contact address
    pub email: String,
    /// Sum of the fines considered by the report
    pub amount: Money,
    /// Number of those fines
    pub fines: u32,
}

/// Mean rating of a reviewed title
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BookRating {
    /// Title id
    pub book: BookId,
    /// Title
    pub title: String,
    /// Mean of 1..=5 ratings, two decimals
    pub average_rating: f64,
    /// Number of reviews
    pub reviews: u32,
}

/// An author and how often their books were lent
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuthorBorrows {
    /// Author id
    pub author: AuthorId,
    /// Name as entered
    pub full_name: String,
    /// Borrows of any copy of their books
    pub borrows: u32,
}

/// A wait-list entry with the names needed to read it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PendingReservation {
    /// Reservation id
    pub reservation: ReservationId,
    /// Waiting member
    pub user: UserId,
    /// Member name
    pub full_name: String,
    /// Requested title id
    pub book: BookId,
    /// Requested title
    pub title: String,
    /// Day the request was placed
    pub reservation_date: NaiveDate,
}

/// A category and how many titles it holds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CategoryBooks {
    /// Category id
    pub category: CategoryId,
    /// Category name
    pub name: String,
    /// Titles filed under it
    pub books: u32,
}

/// A member and how often they borrowed
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserBorrows {
    /// Member id
    pub user: UserId,
    /// Member name
    pub full_name: String,
    /// Borrows ever made
    pub borrows: u32,
}

/// Stock totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct AvailabilitySummary {
    /// Titles in the catalog
    pub titles: u32,
    /// Titles with at least one copy on the shelf
    pub titles_available: u32,
    /// Copies owned
    pub copies: u32,
    /// Copies on the shelf
    pub copies_available: u32,
    /// Copies on loan
    pub copies_on_loan: u32,
}

/// Fines settled in one month
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MonthlyFines {
    /// `YYYY-MM`
    pub month: String,
    /// Sum collected
    pub collected: Money,
    /// Fines settled
    pub fines: u32,
}

/// A member identified by name and address
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserContact {
    /// Member id
    pub user: UserId,
    /// Member name
    pub full_name: String,
    /// Contact address
    pub email: String,
}

/// Members with something outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutstandingCounts {
    /// Members holding at least one copy
    pub users_with_active_borrows: u32,
    /// Members owing at least one fine
    pub users_with_unpaid_fines: u32,
}

/// The result of one report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "report", content = "rows", rename_all = "kebab-case")]
pub enum Report {
    /// See [`ReportKind::Overdue`]
    Overdue(Vec<OverdueBorrow>),
    /// See [`ReportKind::MostBorrowed`]
    MostBorrowed(Vec<BookBorrows>),
    /// See [`ReportKind::LeastBorrowed`]
    LeastBorrowed(Vec<BookBorrows>),
    /// See [`ReportKind::UnpaidFines`]
    UnpaidFines(Vec<UserAmount>),
    /// See [`ReportKind::AverageRatings`]
    AverageRatings(Vec<BookRating>),
    /// See [`ReportKind::PopularAuthors`]
    PopularAuthors(Vec<AuthorBorrows>),
    /// See [`ReportKind::PendingReservations`]
    PendingReservations(Vec<PendingReservation>),
    /// See [`ReportKind::BooksPerCategory`]
    BooksPerCategory(Vec<CategoryBooks>),
    /// See [`ReportKind::ActiveUsers`]
    ActiveUsers(Vec<UserBorrows>),
    /// See [`ReportKind::Availability`]
    Availability(AvailabilitySummary),
    /// See [`ReportKind::FinesByMonth`]
    FinesByMonth(Vec<MonthlyFines>),
    /// See [`ReportKind::NeverBorrowed`]
    NeverBorrowed(Vec<UserContact>),
    /// See [`ReportKind::TopFined`]
    TopFined(Vec<UserAmount>),
    /// See [`ReportKind::BorrowRanking`]
    BorrowRanking(Vec<RankedBook>),
    /// See [`ReportKind::Outstanding`]
    Outstanding(OutstandingCounts),
}

/// Run a query and map every row
fn rows<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> LedgerResult<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mapped = stmt.query_map(params, map)?.collect::<Result<Vec<_>, _>>()?;
    Ok(mapped)
}

/// Map a row holding `book_id`, `title` and `borrows`
fn book_borrows(row: &Row<'_>) -> rusqlite::Result<BookBorrows> {
    Ok(BookBorrows { book: row.get("book_id")?, title: row.get("title")?, borrows: row.get("borrows")? })
}

/// Map a row holding user columns with `amount` and `fines`
fn user_amount(row: &Row<'_>) -> rusqlite::Result<UserAmount> {
    Ok(UserAmount {
        user: row.get("user_id")?,
        full_name: row.get("full_name")?,
        email: row.get("email")?,
        amount: row.get("amount")?,
        fines: row.get("fines")?,
    })
}

/// Borrow counts per title; titles never lent count zero
const BOOK_BORROWS: &str = "SELECT b.book_id, b.title, COUNT(br.borrow_id) AS borrows \
    FROM books b \
    LEFT JOIN book_copies bc ON bc.book_id = b.book_id \
    LEFT JOIN borrows br ON br.copy_id = bc.copy_id \
    GROUP BY b.book_id, b.title";

/// Active borrows whose due date is before `today`, most overdue first
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn overdue(conn: &Connection, today: NaiveDate) -> LedgerResult<Vec<OverdueBorrow>> {
    let sql = format!(
        "{} WHERE br.return_date IS NULL AND br.due_date < ?1 ORDER BY br.due_date, br.borrow_id",
        BorrowDetails::SELECT
    );
    let details = rows(conn, &sql, params![today], BorrowDetails::from_row)?;
    Ok(details
        .into_iter()
        .map(|details| OverdueBorrow { days_overdue: details.borrow.overdue_days(today), details })
        .collect())
}

/// The `limit` most lent titles
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn most_borrowed(conn: &Connection, limit: u32) -> LedgerResult<Vec<BookBorrows>> {
    let sql = format!("{BOOK_BORROWS} ORDER BY borrows DESC, b.book_id LIMIT ?1");
    rows(conn, &sql, params![limit], book_borrows)
}

/// The `limit` least lent titles
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn least_borrowed(conn: &Connection, limit: u32) -> LedgerResult<Vec<BookBorrows>> {
    let sql = format!("{BOOK_BORROWS} ORDER BY borrows, b.book_id LIMIT ?1");
    rows(conn, &sql, params![limit], book_borrows)
}

/// Members with unpaid fines, largest debt first
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn unpaid_fines(conn: &Connection) -> LedgerResult<Vec<UserAmount>> {
    rows(
        conn,
        "SELECT u.user_id, u.full_name, u.email, SUM(f.amount) AS amount, COUNT(f.fine_id) AS fines \
         FROM fines f \
         JOIN borrows br ON br.borrow_id = f.borrow_id \
         JOIN users u ON u.user_id = br.user_id \
         WHERE f.paid = 0 \
         GROUP BY u.user_id, u.full_name, u.email \
         ORDER BY amount DESC, u.user_id",
        [],
        user_amount,
    )
}

/// The `limit` members with the largest total of fines ever assessed
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn top_fined(conn: &Connection, limit: u32) -> LedgerResult<Vec<UserAmount>> {
    rows(
        conn,
        "SELECT u.user_id, u.full_name, u.email, SUM(f.amount) AS amount, COUNT(f.fine_id) AS fines \
         FROM fines f \
         JOIN borrows br ON br.borrow_id = f.borrow_id \
         JOIN users u ON u.user_id = br.user_id \
         GROUP BY u.user_id, u.full_name, u.email \
         ORDER BY amount DESC, u.user_id LIMIT ?1",
        params![limit],
        user_amount,
    )
}

/// Mean rating of every reviewed title, best first
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn average_ratings(conn: &Connection) -> LedgerResult<Vec<BookRating>> {
    rows(
        conn,
        "SELECT b.book_id, b.title, ROUND(AVG(r.rating), 2) AS average_rating, COUNT(*) AS reviews \
         FROM reviews r JOIN books b ON b.book_id = r.book_id \
         GROUP BY b.book_id, b.title \
         ORDER BY average_rating DESC, b.book_id",
        [],
        |row| {
            Ok(BookRating {
                book: row.get("book_id")?,
                title: row.get("title")?,
                average_rating: row.get("average_rating")?,
                reviews: row.get("reviews")?,
            })
        },
    )
}

/// The `limit` authors whose books were lent most
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn popular_authors(conn: &Connection, limit: u32) -> LedgerResult<Vec<AuthorBorrows>> {
    rows(
        conn,
        "SELECT a.author_id, a.full_name, COUNT(br.borrow_id) AS borrows \
         FROM authors a \
         JOIN book_authors ba ON ba.author_id = a.author_id \
         JOIN book_copies bc ON bc.book_id = ba.book_id \
         JOIN borrows br ON br.copy_id = bc.copy_id \
         GROUP BY a.author_id, a.full_name \
         ORDER BY borrows DESC, a.author_id LIMIT ?1",
        params![limit],
        |row| {
            Ok(AuthorBorrows {
                author: row.get("author_id")?,
                full_name: row.get("full_name")?,
                borrows: row.get("borrows")?,
            })
        },
    )
}

/// Pending wait-list entries in the order they will be served
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn pending_reservations(conn: &Connection) -> LedgerResult<Vec<PendingReservation>> {
    rows(
        conn,
        "SELECT r.reservation_id, r.user_id, u.full_name, r.book_id, b.title, r.reservation_date \
         FROM reservations r \
         JOIN users u ON u.user_id = r.user_id \
         JOIN books b ON b.book_id = r.book_id \
         WHERE r.status = ?1 \
         ORDER BY r.book_id, r.reservation_date, r.reservation_id",
        params![ReservationStatus::Pending],
        |row| {
            Ok(PendingReservation {
                reservation: row.get("reservation_id")?,
                user: row.get("user_id")?,
                full_name: row.get("full_name")?,
                book: row.get("book_id")?,
                title: row.get("title")?,
                reservation_date: row.get("reservation_date")?,
            })
        },
    )
}

/// Title counts per category, empty categories included
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn books_per_category(conn: &Connection) -> LedgerResult<Vec<CategoryBooks>> {
    rows(
        conn,
        "SELECT c.category_id, c.name, COUNT(bcg.book_id) AS books \
         FROM categories c LEFT JOIN book_categories bcg ON bcg.category_id = c.category_id \
         GROUP BY c.category_id, c.name \
         ORDER BY books DESC, c.name",
        [],
        |row| {
            Ok(CategoryBooks {
                category: row.get("category_id")?,
                name: row.get("name")?,
                books: row.get("books")?,
            })
        },
    )
}

/// The `limit` members who borrowed most
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn active_users(conn: &Connection, limit: u32) -> LedgerResult<Vec<UserBorrows>> {
    rows(
        conn,
        "SELECT u.user_id, u.full_name, COUNT(br.borrow_id) AS borrows \
         FROM users u JOIN borrows br ON br.user_id = u.user_id \
         GROUP BY u.user_id, u.full_name \
         ORDER BY borrows DESC, u.user_id LIMIT ?1",
        params![limit],
        |row| {
            Ok(UserBorrows {
                user: row.get("user_id")?,
                full_name: row.get("full_name")?,
                borrows: row.get("borrows")?,
            })
        },
    )
}

/// Copy and title totals
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn availability(conn: &Connection) -> LedgerResult<AvailabilitySummary> {
    Ok(conn.query_row(
        "SELECT \
            (SELECT COUNT(*) FROM books) AS titles, \
            (SELECT COUNT(DISTINCT book_id) FROM book_copies WHERE is_available = 1) AS titles_available, \
            (SELECT COUNT(*) FROM book_copies) AS copies, \
            (SELECT COUNT(*) FROM book_copies WHERE is_available = 1) AS copies_available, \
            (SELECT COUNT(*) FROM book_copies WHERE is_available = 0) AS copies_on_loan",
        [],
        |row| {
            Ok(AvailabilitySummary {
                titles: row.get("titles")?,
                titles_available: row.get("titles_available")?,
                copies: row.get("copies")?,
                copies_available: row.get("copies_available")?,
                copies_on_loan: row.get("copies_on_loan")?,
            })
        },
    )?)
}

/// Settled fines grouped by payment month, oldest first
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn fines_by_month(conn: &Connection) -> LedgerResult<Vec<MonthlyFines>> {
    rows(
        conn,
        "SELECT strftime('%Y-%m', payment_date) AS month, SUM(amount) AS collected, COUNT(*) AS fines \
         FROM fines WHERE paid = 1 AND payment_date IS NOT NULL \
         GROUP BY month ORDER BY month",
        [],
        |row| {
            Ok(MonthlyFines {
                month: row.get("month")?,
                collected: row.get("collected")?,
                fines: row.get("fines")?,
            })
        },
    )
}

/// Members who never borrowed anything
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn never_borrowed(conn: &Connection) -> LedgerResult<Vec<UserContact>> {
    rows(
        conn,
        "SELECT u.user_id, u.full_name, u.email FROM users u \
         WHERE NOT EXISTS (SELECT 1 FROM borrows br WHERE br.user_id = u.user_id) \
         ORDER BY u.user_id",
        [],
        |row| {
            Ok(UserContact {
                user: row.get("user_id")?,
                full_name: row.get("full_name")?,
                email: row.get("email")?,
            })
        },
    )
}

/// Every title ranked by times lent
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn borrow_ranking(conn: &Connection) -> LedgerResult<Vec<RankedBook>> {
    let sql = format!(
        "SELECT RANK() OVER (ORDER BY counted.borrows DESC) AS borrow_rank, counted.* \
         FROM ({BOOK_BORROWS}) counted ORDER BY borrow_rank, counted.book_id"
    );
    rows(conn, &sql, [], |row| Ok(RankedBook { rank: row.get("borrow_rank")?, book: book_borrows(row)? }))
}

/// Number of members holding copies and number owing money
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn outstanding(conn: &Connection) -> LedgerResult<OutstandingCounts> {
    Ok(conn.query_row(
        "SELECT \
            (SELECT COUNT(DISTINCT user_id) FROM borrows WHERE return_date IS NULL) AS borrowing, \
            (SELECT COUNT(DISTINCT br.user_id) FROM fines f \
                JOIN borrows br ON br.borrow_id = f.borrow_id WHERE f.paid = 0) AS owing",
        [],
        |row| {
            Ok(OutstandingCounts {
                users_with_active_borrows: row.get("borrowing")?,
                users_with_unpaid_fines: row.get("owing")?,
            })
        },
    )?)
}

/// Run one report; `limit` bounds the top-N reports
///
/// # Errors
///
/// Returns `LedgerError::Storage` if a query fails.
pub fn run(conn: &Connection, kind: ReportKind, today: NaiveDate, limit: u32) -> LedgerResult<Report> {
    debug!(report = %kind, %today, limit, "running report");
    Ok(match kind {
        ReportKind::Overdue => Report::Overdue(overdue(conn, today)?),
        ReportKind::MostBorrowed => Report::MostBorrowed(most_borrowed(conn, limit)?),
        ReportKind::LeastBorrowed => Report::LeastBorrowed(least_borrowed(conn, limit)?),
        ReportKind::UnpaidFines => Report::UnpaidFines(unpaid_fines(conn)?),
        ReportKind::AverageRatings => Report::AverageRatings(average_ratings(conn)?),
        ReportKind::PopularAuthors => Report::PopularAuthors(popular_authors(conn, limit)?),
        ReportKind::PendingReservations => Report::PendingReservations(pending_reservations(conn)?),
        ReportKind::BooksPerCategory => Report::BooksPerCategory(books_per_category(conn)?),
        ReportKind::ActiveUsers => Report::ActiveUsers(active_users(conn, limit)?),
        ReportKind::Availability => Report::Availability(availability(conn)?),
        ReportKind::FinesByMonth => Report::FinesByMonth(fines_by_month(conn)?),
        ReportKind::NeverBorrowed => Report::NeverBorrowed(never_borrowed(conn)?),
        ReportKind::TopFined => Report::TopFined(top_fined(conn, limit)?),
        ReportKind::BorrowRanking => Report::BorrowRanking(borrow_ranking(conn)?),
        ReportKind::Outstanding => Report::Outstanding(outstanding(conn)?),
    })
}

/// Write one `book  title  count` line per row
fn write_book_borrows(f: &mut fmt::Formatter<'_>, books: &[BookBorrows]) -> fmt::Result {
    for b in books {
        writeln!(f, "{:>6}  {:<40}  {:>4} borrows", b.book, b.title, b.borrows)?;
    }
    Ok(())
}

/// Write one line per member with an amount
fn write_user_amounts(f: &mut fmt::Formatter<'_>, users: &[UserAmount]) -> fmt::Result {
    for u in users {
        writeln!(f, "{:>6}  {:<30}  {:<30}  {:>8} ({} fines)", u.user, u.full_name, u.email, u.amount, u.fines)?;
    }
    Ok(())
}

// Plain-text rendering, one row per line
impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overdue(borrows) => {
                for o in borrows {
                    let b = &o.details;
                    writeln!(
                        f,
                        "{:>6}  {:<24}  {:<32}  due {}  {} days late",
                        b.borrow.id, b.user_name, b.title, b.borrow.due_date, o.days_overdue
                    )?;
                }
            }
            Self::MostBorrowed(books) | Self::LeastBorrowed(books) => write_book_borrows(f, books)?,
            Self::UnpaidFines(users) | Self::TopFined(users) => write_user_amounts(f, users)?,
            Self::AverageRatings(ratings) => {
                for r in ratings {
                    writeln!(f, "{:>6}  {:<40}  {:.2} ({} reviews)", r.book, r.title, r.average_rating, r.reviews)?;
                }
            }
            Self::PopularAuthors(authors) => {
                for a in authors {
                    writeln!(f, "{:>6}  {:<30}  {:>4} borrows", a.author, a.full_name, a.borrows)?;
                }
            }
            Self::PendingReservations(pending) => {
                for p in pending {
                    writeln!(
                        f,
                        "{:>6}  {:<24}  {:<32}  since {}",
                        p.reservation, p.full_name, p.title, p.reservation_date
                    )?;
                }
            }
            Self::BooksPerCategory(categories) => {
                for c in categories {
                    writeln!(f, "{:<30}  {:>4} books", c.name, c.books)?;
                }
            }
            Self::ActiveUsers(users) => {
                for u in users {
                    writeln!(f, "{:>6}  {:<30}  {:>4} borrows", u.user, u.full_name, u.borrows)?;
                }
            }
            Self::Availability(s) => {
                writeln!(f, "titles:           {} ({} with a copy on the shelf)", s.titles, s.titles_available)?;
                writeln!(f, "copies:           {}", s.copies)?;
                writeln!(f, "  on the shelf:   {}", s.copies_available)?;
                writeln!(f, "  on loan:        {}", s.copies_on_loan)?;
            }
            Self::FinesByMonth(months) => {
                for m in months {
                    writeln!(f, "{}  {:>8}  ({} fines)", m.month, m.collected, m.fines)?;
                }
            }
            Self::NeverBorrowed(users) => {
                for u in users {
                    writeln!(f, "{:>6}  {:<30}  {}", u.user, u.full_name, u.email)?;
                }
            }
            Self::BorrowRanking(ranked) => {
                for r in ranked {
                    writeln!(f, "#{:<4}  {:<40}  {:>4} borrows", r.rank, r.book.title, r.book.borrows)?;
                }
            }
            Self::Outstanding(c) => {
                writeln!(f, "members holding copies: {}", c.users_with_active_borrows)?;
                writeln!(f, "members owing fines:    {}", c.users_with_unpaid_fines)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;

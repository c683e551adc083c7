//! Typed records for every table the ledger touches.
//!
//! Each record knows how to build itself from a `rusqlite::Row` selected with
//! its `COLUMNS` projection, so queries never hand untyped rows to callers.

use std::{fmt, num::ParseIntError, str::FromStr};

use chrono::NaiveDate;
use rusqlite::{
    Row,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};

/// Declares an integer primary-key newtype that binds and reads as SQLite INTEGER.
macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map(Self)
            }
        }
    };
}

id_type!(
    /// Identifier of a title in the catalog
    BookId
);
id_type!(
    /// Identifier of one physical copy
    CopyId
);
id_type!(
    /// Identifier of an author
    AuthorId
);
id_type!(
    /// Identifier of a category
    CategoryId
);
id_type!(
    /// Identifier of a library member
    UserId
);
id_type!(
    /// Identifier of a librarian
    LibrarianId
);
id_type!(
    /// Identifier of a lending event
    BorrowId
);
id_type!(
    /// Identifier of a penalty
    FineId
);
id_type!(
    /// Identifier of a wait-list entry
    ReservationId
);
id_type!(
    /// Identifier of a review
    ReviewId
);

/// Monetary amount in the smallest unit of the library's currency
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct Money(pub i64);

impl Money {
    /// No money owed
    pub const ZERO: Self = Self(0);

    /// Multiply a per-day rate by a number of days, clamping on overflow
    #[must_use]
    pub fn per_day(self, days: i64) -> Self {
        Self(self.0.saturating_mul(days))
    }

    /// Add two amounts, clamping on overflow
    #[must_use]
    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Whether nothing is owed
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Money {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl ToSql for Money {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for Money {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Self)
    }
}

/// Membership status of a user; only active members may borrow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum UserStatus {
    /// Member in good standing
    #[default]
    Active,
    /// Suspended or lapsed membership
    Inactive,
}

impl UserStatus {
    /// Single-letter code stored in the `users.status` column
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Active => "A",
            Self::Inactive => "I",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" | "active" => Ok(Self::Active),
            "i" | "inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown user status `{other}`")),
        }
    }
}

impl ToSql for UserStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for UserStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "A" => Ok(Self::Active),
            "I" => Ok(Self::Inactive),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// Kind of membership a user holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum MembershipType {
    /// Enrolled student
    #[default]
    Student,
    /// Teaching staff
    Teacher,
    /// Visitor with a temporary card
    Guest,
    /// External researcher
    Researcher,
    /// Library or school staff
    Staff,
}

impl MembershipType {
    /// Every membership type, in `membership_types` table order
    pub const ALL: [Self; 5] =
        [Self::Student, Self::Teacher, Self::Guest, Self::Researcher, Self::Staff];

    /// Primary key of this type in `membership_types`
    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            Self::Student => 1,
            Self::Teacher => 2,
            Self::Guest => 3,
            Self::Researcher => 4,
            Self::Staff => 5,
        }
    }

    /// Display name stored alongside the id
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Student => "Student",
            Self::Teacher => "Teacher",
            Self::Guest => "Guest",
            Self::Researcher => "Researcher",
            Self::Staff => "Staff",
        }
    }
}

impl FromStr for MembershipType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown membership type `{s}`"))
    }
}

impl ToSql for MembershipType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.id()))
    }
}

impl FromSql for MembershipType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let id = i64::column_result(value)?;
        Self::ALL.into_iter().find(|t| t.id() == id).ok_or(FromSqlError::OutOfRange(id))
    }
}

/// Lifecycle of a reservation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ReservationStatus {
    /// Waiting for a copy to free up
    #[default]
    Pending,
    /// Turned into a borrow
    Fulfilled,
    /// Withdrawn before fulfilment
    Cancelled,
}

impl ReservationStatus {
    /// Text stored in `reservations.status`
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fulfilled => "fulfilled",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for ReservationStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ReservationStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "pending" => Ok(Self::Pending),
            "fulfilled" => Ok(Self::Fulfilled),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// Where a borrow stands relative to a given day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum BorrowState {
    /// Outstanding and not yet due
    Active,
    /// Outstanding past its due date
    Overdue,
    /// Copy is back on the shelf
    Returned,
}

impl BorrowState {
    /// Get a human-readable description of the state
    #[must_use]
    pub fn get_description(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Overdue => "Overdue",
            Self::Returned => "Returned",
        }
    }
}

/// A title in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Book {
    /// Primary key
    pub id: BookId,
    /// Title as printed
    pub title: String,
    /// ISBN, when known
    pub isbn: Option<String>,
    /// Year of publication, when known
    pub published_year: Option<i32>,
    /// Free-form blurb
    pub description: Option<String>,
}

impl Book {
    /// Projection read by [`Book::from_row`]
    pub(crate) const COLUMNS: &'static str = "book_id, title, isbn, published_year, description";

    /// Build from a row selected with [`Book::COLUMNS`]
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("book_id")?,
            title: row.get("title")?,
            isbn: row.get("isbn")?,
            published_year: row.get("published_year")?,
            description: row.get("description")?,
        })
    }
}

/// One circulating instance of a book
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BookCopy {
    /// Primary key
    pub id: CopyId,
    /// Title this copy belongs to
    pub book: BookId,
    /// Unique barcode label
    pub barcode: String,
    /// Shelf the copy is kept on
    pub shelf_location: Option<String>,
    /// Physical condition, 1 (new) to 4 (worn)
    pub condition_code: u8,
    /// False while an active borrow holds the copy
    pub is_available: bool,
}

impl BookCopy {
    /// Projection read by [`BookCopy::from_row`]
    pub(crate) const COLUMNS: &'static str =
        "copy_id, book_id, barcode, shelf_location, condition_code, is_available";

    /// Build from a row selected with [`BookCopy::COLUMNS`]
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("copy_id")?,
            book: row.get("book_id")?,
            barcode: row.get("barcode")?,
            shelf_location: row.get("shelf_location")?,
            condition_code: row.get("condition_code")?,
            is_available: row.get("is_available")?,
        })
    }
}

/// A lending event tying a user to a copy
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Borrow {
    /// Primary key
    pub id: BorrowId,
    /// Borrowing member
    pub user: UserId,
    /// Copy on loan
    pub copy: CopyId,
    /// Librarian who issued it; `None` for self-service
    pub librarian: Option<LibrarianId>,
    /// Day the copy left the shelf
    pub borrow_date: NaiveDate,
    /// Borrow date plus the loan period
    pub due_date: NaiveDate,
    /// Day the copy came back, if it has
    pub return_date: Option<NaiveDate>,
}

impl Borrow {
    /// Projection read by [`Borrow::from_row`]
    pub(crate) const COLUMNS: &'static str =
        "br.borrow_id, br.user_id, br.copy_id, br.librarian_id, br.borrow_date, br.due_date, br.return_date";

    /// Build from a row selected with [`Borrow::COLUMNS`]
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("borrow_id")?,
            user: row.get("user_id")?,
            copy: row.get("copy_id")?,
            librarian: row.get("librarian_id")?,
            borrow_date: row.get("borrow_date")?,
            due_date: row.get("due_date")?,
            return_date: row.get("return_date")?,
        })
    }

    /// Outstanding borrows have no return date
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.return_date.is_none()
    }

    /// Days past the due date as of `day`, zero when on time
    #[must_use]
    pub fn overdue_days(&self, day: NaiveDate) -> i64 {
        day.signed_duration_since(self.due_date).num_days().max(0)
    }

    /// State of the borrow as seen on `today`
    #[must_use]
    pub fn state(&self, today: NaiveDate) -> BorrowState {
        match self.return_date {
            Some(_) => BorrowState::Returned,
            None if today > self.due_date => BorrowState::Overdue,
            None => BorrowState::Active,
        }
    }
}

/// A borrow joined with the names a person needs to read it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BorrowDetails {
    /// The ledger row
    #[serde(flatten)]
    pub borrow: Borrow,
    /// Borrower's full name
    pub user_name: String,
    /// Title of the borrowed copy
    pub book: BookId,
    /// Book title
    pub title: String,
    /// Copy barcode
    pub barcode: String,
}

impl BorrowDetails {
    /// Projection read by [`BorrowDetails::from_row`]; joins `users`, `book_copies` and `books`
    pub(crate) const SELECT: &'static str = "SELECT br.borrow_id, br.user_id, br.copy_id, \
         br.librarian_id, br.borrow_date, br.due_date, br.return_date, \
         u.full_name, b.book_id, b.title, bc.barcode \
         FROM borrows br \
         JOIN users u ON br.user_id = u.user_id \
         JOIN book_copies bc ON br.copy_id = bc.copy_id \
         JOIN books b ON bc.book_id = b.book_id";

    /// Build from a row selected with [`BorrowDetails::SELECT`]
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            borrow: Borrow::from_row(row)?,
            user_name: row.get("full_name")?,
            book: row.get("book_id")?,
            title: row.get("title")?,
            barcode: row.get("barcode")?,
        })
    }
}

/// Penalty for a late return
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Fine {
    /// Primary key
    pub id: FineId,
    /// Borrow the fine was assessed on
    pub borrow: BorrowId,
    /// Amount owed
    pub amount: Money,
    /// Whether it has been settled
    pub paid: bool,
    /// Day it was settled
    pub payment_date: Option<NaiveDate>,
}

impl Fine {
    /// Projection read by [`Fine::from_row`]
    pub(crate) const COLUMNS: &'static str = "f.fine_id, f.borrow_id, f.amount, f.paid, f.payment_date";

    /// Build from a row selected with [`Fine::COLUMNS`]
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("fine_id")?,
            borrow: row.get("borrow_id")?,
            amount: row.get("amount")?,
            paid: row.get("paid")?,
            payment_date: row.get("payment_date")?,
        })
    }
}

/// A standing request for the next free copy of a book
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Reservation {
    /// Primary key
    pub id: ReservationId,
    /// Requesting member
    pub user: UserId,
    /// Requested title
    pub book: BookId,
    /// Day the request was placed
    pub reservation_date: NaiveDate,
    /// Current lifecycle status
    pub status: ReservationStatus,
}

impl Reservation {
    /// Projection read by [`Reservation::from_row`]
    pub(crate) const COLUMNS: &'static str =
        "reservation_id, user_id, book_id, reservation_date, status";

    /// Build from a row selected with [`Reservation::COLUMNS`]
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("reservation_id")?,
            user: row.get("user_id")?,
            book: row.get("book_id")?,
            reservation_date: row.get("reservation_date")?,
            status: row.get("status")?,
        })
    }
}

/// A library member
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    /// Primary key
    pub id: UserId,
    /// Display name
    pub full_name: String,
    /// Contact address
    pub email: String,
    /// Contact number
    pub phone: Option<String>,
    /// Login handle
    pub username: Option<String>,
    /// Kind of card held
    pub membership_type: MembershipType,
    /// Day the membership started
    pub membership_date: NaiveDate,
    /// Whether the member may borrow
    pub status: UserStatus,
}

impl User {
    /// Projection read by [`User::from_row`]
    pub(crate) const COLUMNS: &'static str =
        "user_id, full_name, email, phone, username, membership_type_id, membership_date, status";

    /// Build from a row selected with [`User::COLUMNS`]
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("user_id")?,
            full_name: row.get("full_name")?,
            email: row.get("email")?,
            phone: row.get("phone")?,
            username: row.get("username")?,
            membership_type: row.get("membership_type_id")?,
            membership_date: row.get("membership_date")?,
            status: row.get("status")?,
        })
    }
}

/// Staff member who can issue and return on behalf of users
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Librarian {
    /// Primary key
    pub id: LibrarianId,
    /// Display name
    pub full_name: String,
    /// Contact address
    pub email: String,
    /// Login handle
    pub username: String,
}

impl Librarian {
    /// Projection read by [`Librarian::from_row`]
    pub(crate) const COLUMNS: &'static str = "librarian_id, full_name, email, username";

    /// Build from a row selected with [`Librarian::COLUMNS`]
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("librarian_id")?,
            full_name: row.get("full_name")?,
            email: row.get("email")?,
            username: row.get("username")?,
        })
    }
}

/// A member's rating of a book
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Review {
    /// Primary key
    pub id: ReviewId,
    /// Reviewer
    pub user: UserId,
    /// Reviewed title
    pub book: BookId,
    /// 1 to 5
    pub rating: u8,
    /// Free text
    pub comment: Option<String>,
    /// Day written
    pub review_date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::unwrap_used)]
    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn borrow(due: NaiveDate, returned: Option<NaiveDate>) -> Borrow {
        Borrow {
            id: BorrowId(1),
            user: UserId(1),
            copy: CopyId(1),
            librarian: None,
            borrow_date: day(2024, 1, 1),
            due_date: due,
            return_date: returned,
        }
    }

    #[test]
    fn test_overdue_days_never_negative() {
        let b = borrow(day(2024, 1, 15), None);
        assert_eq!(b.overdue_days(day(2024, 1, 10)), 0);
        assert_eq!(b.overdue_days(day(2024, 1, 15)), 0);
        assert_eq!(b.overdue_days(day(2024, 1, 21)), 6);
    }

    #[test]
    fn test_borrow_state() {
        let due = day(2024, 1, 15);
        assert_eq!(borrow(due, None).state(day(2024, 1, 15)), BorrowState::Active);
        assert_eq!(borrow(due, None).state(day(2024, 1, 16)), BorrowState::Overdue);
        assert_eq!(
            borrow(due, Some(day(2024, 2, 1))).state(day(2024, 3, 1)),
            BorrowState::Returned
        );
    }

    #[test]
    fn test_parse_user_status_and_membership() {
        assert_eq!("A".parse::<UserStatus>(), Ok(UserStatus::Active));
        assert_eq!("inactive".parse::<UserStatus>(), Ok(UserStatus::Inactive));
        assert!("x".parse::<UserStatus>().is_err());
        assert_eq!("researcher".parse::<MembershipType>(), Ok(MembershipType::Researcher));
    }
}

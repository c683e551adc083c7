use rusqlite::ErrorCode;
use thiserror::Error;

use crate::model::{
    BookId, BorrowId, CopyId, FineId, LibrarianId, Money, ReservationId, UserId,
};

/// Coarse classification of a [`LedgerError`], used by callers that only care
/// about how to react (retry, report, reject) rather than which entity failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A referenced entity does not exist
    NotFound,
    /// The entity exists but is not in the state the operation requires
    InvalidState,
    /// The user may not borrow right now
    IneligibleUser,
    /// Every copy of the requested book is on loan
    NoCopyAvailable,
    /// A concurrent session holds the write lock; the whole operation may be retried
    Conflict,
    /// Caller supplied a value outside the accepted domain
    InvalidInput,
    /// The datastore or the filesystem failed
    Storage,
}

/// Why a user was refused a borrow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligibility {
    /// Membership status is inactive
    Inactive,
    /// Unpaid fines exceed the configured cap
    UnpaidFines {
        /// Sum of the user's unpaid fines
        owed: Money,
        /// Configured cap
        cap: Money,
    },
}

impl std::fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "membership is inactive"),
            Self::UnpaidFines { owed, cap } => {
                write!(f, "unpaid fines of {owed} exceed the cap of {cap}")
            }
        }
    }
}

/// Errors produced by lending operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("book {0} not found")]
    BookNotFound(BookId),
    #[error("copy {0} not found")]
    CopyNotFound(CopyId),
    #[error("librarian {0} not found")]
    LibrarianNotFound(LibrarianId),
    #[error("borrow {0} not found")]
    BorrowNotFound(BorrowId),
    #[error("fine {0} not found")]
    FineNotFound(FineId),
    #[error("reservation {0} not found or no longer pending")]
    ReservationNotFound(ReservationId),
    #[error("borrow {0} has already been returned")]
    AlreadyReturned(BorrowId),
    #[error("fine {0} has already been paid")]
    AlreadyPaid(FineId),
    #[error("user {user} already holds a pending reservation for book {book}")]
    AlreadyReserved { user: UserId, book: BookId },
    #[error("book {0} has a copy available; borrow it instead of reserving")]
    CopyAvailable(BookId),
    #[error("copies of book {book} are on loan and cannot be removed ({on_loan} on loan)")]
    CopiesOnLoan { book: BookId, on_loan: u32 },
    #[error("user {user} is not eligible to borrow: {reason}")]
    IneligibleUser { user: UserId, reason: Ineligibility },
    #[error("no copy of book {0} is available")]
    NoCopyAvailable(BookId),
    #[error("concurrent modification detected: {0}")]
    Conflict(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("database operation failed")]
    Storage(#[source] rusqlite::Error),
}

impl LedgerError {
    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UserNotFound(_)
            | Self::BookNotFound(_)
            | Self::CopyNotFound(_)
            | Self::LibrarianNotFound(_)
            | Self::BorrowNotFound(_)
            | Self::FineNotFound(_)
            | Self::ReservationNotFound(_) => ErrorKind::NotFound,
            Self::AlreadyReturned(_)
            | Self::AlreadyPaid(_)
            | Self::AlreadyReserved { .. }
            | Self::CopyAvailable(_)
            | Self::CopiesOnLoan { .. } => ErrorKind::InvalidState,
            Self::IneligibleUser { .. } => ErrorKind::IneligibleUser,
            Self::NoCopyAvailable(_) => ErrorKind::NoCopyAvailable,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidInput(_) | Self::Config(_) => ErrorKind::InvalidInput,
            Self::Io(_) | Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether re-running the whole operation may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                Self::Conflict(err.to_string())
            }
            _ => Self::Storage(err),
        }
    }
}

/// Result alias used across the crate
pub type LedgerResult<T> = Result<T, LedgerError>;

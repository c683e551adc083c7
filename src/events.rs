use serde::{Deserialize, Serialize};

use crate::model::{BookId, Borrow, BorrowId, Fine, Reservation, ReservationId, UserId};

/// Committed state changes, published to observers after their transaction commits
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum LedgerEvent {
    /// A copy left the shelf
    Issued {
        /// The new borrow
        borrow: Borrow,
        /// Title of the copy
        book: BookId,
        /// Reservation this borrow fulfils, if any
        reservation: Option<ReservationId>,
    },
    /// A copy came back
    Returned {
        /// The closed borrow
        borrow: Borrow,
        /// Title of the copy
        book: BookId,
    },
    /// A late return was penalised
    FineAssessed {
        /// The new fine
        fine: Fine,
        /// Who owes it
        user: UserId,
    },
    /// A fine was settled
    FinePaid(Fine),
    /// A user joined a book's wait-list
    Reserved(Reservation),
    /// A waiting user received the freed copy
    ReservationFulfilled {
        /// The wait-list entry
        reservation: ReservationId,
        /// Who got the copy
        user: UserId,
        /// The borrow created for them
        borrow: BorrowId,
    },
    /// A waiting user was passed over because they may not borrow
    ReservationSkipped {
        /// The wait-list entry, still pending
        reservation: ReservationId,
        /// Who was passed over
        user: UserId,
        /// Why
        reason: String,
    },
    /// A user left a wait-list
    ReservationCancelled(Reservation),
}

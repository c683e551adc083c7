//! Lending ledger for a multi-copy library.
//!
//! This crate records which physical copy of a book is on loan to which
//! member, keeps each copy's availability flag in step with its borrows,
//! charges late fees, and hands freed copies to members waiting on a
//! reservation. Every mutating operation runs as one SQLite transaction
//! holding the write lock, so concurrent sessions can never lend the same
//! copy twice.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod fines;
pub mod ledger;
pub mod membership;
pub mod model;
pub mod normalize;
pub mod observers;
pub mod report;
pub mod reservations;
pub mod seed;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LendingPolicy;
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use events::LedgerEvent;
pub use ledger::{BookUpdateOutcome, Ledger, ReturnOutcome};
pub use observers::{LedgerObserver, NotificationService, TransitionLogger};
pub use store::Store;

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{events::LedgerEvent, model::UserId};

/// Trait for ledger event observation
pub trait LedgerObserver: Send {
    /// Called once per event, after the transaction that produced it has committed
    fn on_event(&self, event: &LedgerEvent);
}

/// Logs all transitions that occur in the ledger
#[derive(Debug)]
pub struct TransitionLogger;

impl LedgerObserver for TransitionLogger {
    fn on_event(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::Issued { borrow, book, reservation } => info!(
                borrow = %borrow.id,
                user = %borrow.user,
                copy = %borrow.copy,
                %book,
                due = %borrow.due_date,
                reservation = ?reservation,
                "copy issued"
            ),
            LedgerEvent::Returned { borrow, book } => {
                info!(borrow = %borrow.id, copy = %borrow.copy, %book, "copy returned");
            }
            LedgerEvent::FineAssessed { fine, user } => {
                info!(fine = %fine.id, %user, amount = %fine.amount, "fine assessed");
            }
            LedgerEvent::FinePaid(fine) => info!(fine = %fine.id, amount = %fine.amount, "fine paid"),
            LedgerEvent::Reserved(r) => {
                info!(reservation = %r.id, user = %r.user, book = %r.book, "reservation placed");
            }
            LedgerEvent::ReservationFulfilled { reservation, user, borrow } => {
                info!(%reservation, %user, %borrow, "reservation fulfilled");
            }
            LedgerEvent::ReservationSkipped { reservation, user, reason } => {
                info!(%reservation, %user, %reason, "reservation skipped");
            }
            LedgerEvent::ReservationCancelled(r) => {
                info!(reservation = %r.id, user = %r.user, "reservation cancelled");
            }
        }
    }
}

/// A message addressed to a member
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Notification {
    /// Recipient
    pub user: UserId,
    /// Text to deliver
    pub message: String,
}

/// Queues member-facing notifications for specific events
///
/// Clones share one outbox, so a caller can keep a handle and drain what the
/// ledger produced after each operation.
#[derive(Debug, Clone, Default)]
pub struct NotificationService {
    /// Messages not yet delivered
    outbox: Arc<Mutex<Vec<Notification>>>,
}

impl NotificationService {
    /// Create a service with an empty outbox
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued notification
    #[must_use]
    pub fn drain(&self) -> Vec<Notification> {
        let mut outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *outbox)
    }

    /// Queue one notification
    fn push(&self, user: UserId, message: String) {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner).push(Notification { user, message });
    }
}

impl LedgerObserver for NotificationService {
    fn on_event(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::Issued { borrow, reservation: Some(_), .. } => self.push(
                borrow.user,
                format!(
                    "Your reserved book is ready: copy {} is on loan to you until {}",
                    borrow.copy, borrow.due_date
                ),
            ),
            LedgerEvent::Issued { borrow, reservation: None, .. } => self.push(
                borrow.user,
                format!("Copy {} has been issued to you, due {}", borrow.copy, borrow.due_date),
            ),
            LedgerEvent::FineAssessed { fine, user } => self.push(
                *user,
                format!("A fine of {} was assessed for a late return", fine.amount),
            ),
            LedgerEvent::ReservationSkipped { user, reason, .. } => self.push(
                *user,
                format!("A copy you reserved became free but could not be issued: {reason}"),
            ),
            _ => {}
        }
    }
}

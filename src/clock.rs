use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{Days, Local, NaiveDate};

/// Source of "today" for due dates, returns and payments
pub trait Clock: fmt::Debug + Send {
    /// The current calendar day
    fn today(&self) -> NaiveDate;
}

/// The host's local calendar day
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock that only moves when told to
///
/// Clones share the same day, so a test (or the seeder) can keep a handle and
/// advance time under a ledger that owns another clone.
#[derive(Debug, Clone)]
pub struct ManualClock {
    /// Shared current day
    today: Arc<Mutex<NaiveDate>>,
}

impl ManualClock {
    /// Start at `day`
    #[must_use]
    pub fn new(day: NaiveDate) -> Self {
        Self { today: Arc::new(Mutex::new(day)) }
    }

    /// Jump to `day`
    pub fn set(&self, day: NaiveDate) {
        *self.today.lock().unwrap_or_else(PoisonError::into_inner) = day;
    }

    /// Move forward by `days`, saturating at the last representable date
    pub fn advance_days(&self, days: u64) {
        let mut today = self.today.lock().unwrap_or_else(PoisonError::into_inner);
        *today = today.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX);
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        *self.today.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

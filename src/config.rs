use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{LedgerError, LedgerResult},
    model::Money,
};

/// Default loan period in days
pub const DEFAULT_LOAN_PERIOD_DAYS: u32 = 14;

/// Default late fee per overdue day
pub const DEFAULT_DAILY_RATE: Money = Money(5);

/// Rules the ledger enforces, loadable from a JSON file
///
/// Every field has a default, so `{}` is a valid configuration:
///
/// ```json
/// { "loan_period_days": 21, "daily_rate": 10, "fine_cap": null }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LendingPolicy {
    /// Days between borrow date and due date
    pub loan_period_days: u32,
    /// Fee charged per day a copy comes back late
    pub daily_rate: Money,
    /// Users whose unpaid fines exceed this cannot borrow; `None` disables the gate
    pub fine_cap: Option<Money>,
    /// How long a session waits for another session's write lock before reporting a conflict
    pub busy_timeout_ms: u64,
}

impl Default for LendingPolicy {
    fn default() -> Self {
        Self {
            loan_period_days: DEFAULT_LOAN_PERIOD_DAYS,
            daily_rate: DEFAULT_DAILY_RATE,
            fine_cap: Some(Money::ZERO),
            busy_timeout_ms: 5_000,
        }
    }
}

impl LendingPolicy {
    /// Load a policy from a JSON file
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Io` if the file cannot be read and
    /// `LedgerError::Config` if it is not a valid policy.
    pub fn load(path: &Path) -> LedgerResult<Self> {
        debug!(path = %path.display(), "loading lending policy");
        let contents = fs::read_to_string(path)?;
        let policy: Self = serde_json::from_str(&contents)
            .map_err(|e| LedgerError::Config(format!("{}: {e}", path.display())))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Reject policies the ledger cannot apply
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Config` for a zero loan period or negative amounts.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.loan_period_days == 0 {
            return Err(LedgerError::Config("loan_period_days must be at least 1".to_string()));
        }
        if self.daily_rate < Money::ZERO {
            return Err(LedgerError::Config("daily_rate must not be negative".to_string()));
        }
        if self.fine_cap.is_some_and(|cap| cap < Money::ZERO) {
            return Err(LedgerError::Config("fine_cap must not be negative".to_string()));
        }
        Ok(())
    }

    /// Lock wait as a `Duration`
    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

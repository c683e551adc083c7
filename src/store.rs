use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use rusqlite::{Connection, TransactionBehavior, params};
use tracing::{debug, info};

use crate::{error::LedgerResult, model::MembershipType};

/// Table definitions, applied idempotently by [`Store::migrate`]
const SCHEMA: &str = include_str!("schema.sql");

/// One session's connection to the library database
///
/// Every mutating ledger operation runs inside [`Store::write`], which opens a
/// `BEGIN IMMEDIATE` transaction: the write lock is taken before the first read,
/// so two sessions can never both observe the same copy as available. A
/// session that cannot get the lock within the busy timeout fails with
/// `LedgerError::Conflict`.
pub struct Store {
    /// Underlying SQLite connection
    conn: Connection,
    /// Database file, `None` for in-memory stores
    path: Option<PathBuf>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) a database file
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Storage` if the file cannot be opened or configured.
    pub fn open(path: &Path, busy_timeout: Duration) -> LedgerResult<Self> {
        info!(path = %path.display(), "opening library database");
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "journal mode set");
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { conn, path: Some(path.to_path_buf()) })
    }

    /// Open a private in-memory database, mostly for tests
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Storage` if SQLite cannot allocate the database.
    pub fn open_in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { conn, path: None })
    }

    /// Create missing tables and the fixed membership types
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Storage` if a statement fails.
    pub fn migrate(&mut self) -> LedgerResult<()> {
        self.write(|conn| {
            conn.execute_batch(SCHEMA)?;
            let mut insert = conn.prepare(
                "INSERT OR IGNORE INTO membership_types (membership_type_id, name) VALUES (?1, ?2)",
            )?;
            for membership in MembershipType::ALL {
                insert.execute(params![membership.id(), membership.name()])?;
            }
            Ok(())
        })?;
        debug!("schema up to date");
        Ok(())
    }

    /// Run `op` in an immediate (write-locking) transaction
    ///
    /// The transaction commits only if `op` returns `Ok`; any error rolls back
    /// every write `op` made.
    ///
    /// # Errors
    ///
    /// Returns whatever `op` returns, `LedgerError::Conflict` if the write lock
    /// cannot be taken, or `LedgerError::Storage` if commit fails.
    pub fn write<T>(&mut self, op: impl FnOnce(&Connection) -> LedgerResult<T>) -> LedgerResult<T> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = op(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `op` in a deferred read transaction so it sees one consistent snapshot
    ///
    /// # Errors
    ///
    /// Returns whatever `op` returns, or `LedgerError::Storage` if the
    /// transaction cannot be opened.
    pub fn read<T>(&mut self, op: impl FnOnce(&Connection) -> LedgerResult<T>) -> LedgerResult<T> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let value = op(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Database file backing this store
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

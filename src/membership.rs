//! Users, librarians and the status that gates borrowing.

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{LedgerError, LedgerResult},
    model::{Librarian, LibrarianId, MembershipType, User, UserId, UserStatus},
};

/// Details of a new member
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NewUser {
    /// Display name
    pub full_name: String,
    /// Unique contact address
    pub email: String,
    /// Contact number
    pub phone: Option<String>,
    /// Unique login handle
    pub username: Option<String>,
    /// Kind of card
    pub membership_type: MembershipType,
    /// Start of membership
    pub membership_date: NaiveDate,
}

/// Details of a new librarian
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NewLibrarian {
    /// Display name
    pub full_name: String,
    /// Unique contact address
    pub email: String,
    /// Unique login handle
    pub username: String,
}

/// Register a member; new members start active
///
/// # Errors
///
/// Returns `LedgerError::InvalidInput` for a blank name or email, or
/// `LedgerError::Storage` if the email or username is taken.
pub fn add_user(conn: &Connection, new: &NewUser) -> LedgerResult<User> {
    if new.full_name.trim().is_empty() || new.email.trim().is_empty() {
        return Err(LedgerError::InvalidInput("name and email are required".to_string()));
    }
    conn.execute(
        "INSERT INTO users (full_name, email, phone, username, membership_type_id, membership_date, status) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new.full_name.trim(),
            new.email.trim(),
            new.phone,
            new.username,
            new.membership_type,
            new.membership_date,
            UserStatus::Active,
        ],
    )?;
    let id = UserId(conn.last_insert_rowid());
    info!(user = %id, membership = new.membership_type.name(), "user registered");
    get_user(conn, id)
}

/// Register a librarian
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the email or username is taken.
pub fn add_librarian(conn: &Connection, new: &NewLibrarian) -> LedgerResult<Librarian> {
    conn.execute(
        "INSERT INTO librarians (full_name, email, username) VALUES (?1, ?2, ?3)",
        params![new.full_name.trim(), new.email.trim(), new.username.trim()],
    )?;
    let id = LibrarianId(conn.last_insert_rowid());
    info!(librarian = %id, "librarian registered");
    get_librarian(conn, id)
}

/// Look up a member
///
/// # Errors
///
/// Returns `LedgerError::UserNotFound` if there is no such member.
pub fn get_user(conn: &Connection, user: UserId) -> LedgerResult<User> {
    let sql = format!("SELECT {} FROM users WHERE user_id = ?1", User::COLUMNS);
    conn.query_row(&sql, params![user], User::from_row)
        .optional()?
        .ok_or(LedgerError::UserNotFound(user))
}

/// Membership status of a member
///
/// # Errors
///
/// Returns `LedgerError::UserNotFound` if there is no such member.
pub fn get_user_status(conn: &Connection, user: UserId) -> LedgerResult<UserStatus> {
    conn.query_row("SELECT status FROM users WHERE user_id = ?1", params![user], |row| row.get(0))
        .optional()?
        .ok_or(LedgerError::UserNotFound(user))
}

/// Look up a librarian
///
/// # Errors
///
/// Returns `LedgerError::LibrarianNotFound` if there is no such librarian.
pub fn get_librarian(conn: &Connection, librarian: LibrarianId) -> LedgerResult<Librarian> {
    let sql = format!("SELECT {} FROM librarians WHERE librarian_id = ?1", Librarian::COLUMNS);
    conn.query_row(&sql, params![librarian], Librarian::from_row)
        .optional()?
        .ok_or(LedgerError::LibrarianNotFound(librarian))
}

/// Activate or deactivate a member
///
/// # Errors
///
/// Returns `LedgerError::UserNotFound` if there is no such member.
pub fn set_status(conn: &Connection, user: UserId, status: UserStatus) -> LedgerResult<User> {
    let updated = conn.execute(
        "UPDATE users SET status = ?1 WHERE user_id = ?2",
        params![status, user],
    )?;
    if updated == 0 {
        return Err(LedgerError::UserNotFound(user));
    }
    info!(%user, %status, "user status changed");
    get_user(conn, user)
}

/// Change a member's name or phone number
///
/// # Errors
///
/// Returns `LedgerError::UserNotFound` if there is no such member and
/// `LedgerError::InvalidInput` for a blank name.
pub fn update_contact(
    conn: &Connection,
    user: UserId,
    full_name: Option<&str>,
    phone: Option<&str>,
) -> LedgerResult<User> {
    get_user(conn, user)?;
    if let Some(name) = full_name {
        if name.trim().is_empty() {
            return Err(LedgerError::InvalidInput("name is required".to_string()));
        }
        conn.execute(
            "UPDATE users SET full_name = ?1 WHERE user_id = ?2",
            params![name.trim(), user],
        )?;
    }
    if let Some(phone) = phone {
        conn.execute("UPDATE users SET phone = ?1 WHERE user_id = ?2", params![phone.trim(), user])?;
    }
    get_user(conn, user)
}

/// Members holding a given kind of card, by id
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn list_members(conn: &Connection, membership: MembershipType) -> LedgerResult<Vec<User>> {
    let sql = format!(
        "SELECT {} FROM users WHERE membership_type_id = ?1 ORDER BY user_id",
        User::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let users: Vec<User> =
        stmt.query_map(params![membership], User::from_row)?.collect::<Result<_, _>>()?;
    Ok(users)
}

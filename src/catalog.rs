//! Books, copies, authors, categories and reviews.
//!
//! Read-mostly reference data. The only state the lending core reads from here
//! is copy availability, through [`find_available_copy`], and the only state it
//! writes is the availability flag, through [`set_copy_availability`].

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{LedgerError, LedgerResult},
    membership,
    model::{AuthorId, Book, BookCopy, BookId, CategoryId, CopyId, Review, ReviewId, UserId},
    normalize::{contains_pattern, normalize_name},
};

/// Separator used when aggregating names into one column
const LIST_SEPARATOR: &str = "; ";

/// Everything needed to catalogue a new title
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NewBook {
    /// Title as printed
    pub title: String,
    /// ISBN, when known
    pub isbn: Option<String>,
    /// Year of publication
    pub published_year: Option<i32>,
    /// Free-form blurb
    pub description: Option<String>,
    /// Author names; existing authors are matched by normalised name
    pub authors: Vec<String>,
    /// Category names; created when missing
    pub categories: Vec<String>,
    /// Number of circulating copies to create
    pub copies: u32,
    /// Shelf the new copies go on
    pub shelf_location: Option<String>,
}

/// Partial edit of a title; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BookUpdate {
    /// New title
    pub title: Option<String>,
    /// New description
    pub description: Option<String>,
    /// Replacement author list
    pub authors: Option<Vec<String>>,
    /// Replacement category list
    pub categories: Option<Vec<String>>,
    /// Desired number of copies
    pub copies: Option<u32>,
}

/// Which attribute [`search`] matches against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SearchField {
    /// Substring of the title
    Title,
    /// Substring of a normalised author name
    Author,
    /// Substring of a category name
    Category,
}

/// A title with its credits and copy counts
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BookSummary {
    /// Title id
    pub book: BookId,
    /// Title
    pub title: String,
    /// Author names
    pub authors: Vec<String>,
    /// Category names
    pub categories: Vec<String>,
    /// Copies owned
    pub total_copies: u32,
    /// Copies on the shelf now
    pub available_copies: u32,
}

/// Summary projection, completed by an optional `WHERE` clause
const SUMMARY_SELECT: &str = "SELECT b.book_id, b.title, \
    (SELECT GROUP_CONCAT(a.full_name, '; ') FROM book_authors ba \
        JOIN authors a ON a.author_id = ba.author_id WHERE ba.book_id = b.book_id) AS authors, \
    (SELECT GROUP_CONCAT(c.name, '; ') FROM book_categories bcg \
        JOIN categories c ON c.category_id = bcg.category_id WHERE bcg.book_id = b.book_id) AS categories, \
    (SELECT COUNT(*) FROM book_copies bc WHERE bc.book_id = b.book_id) AS total_copies, \
    (SELECT COUNT(*) FROM book_copies bc WHERE bc.book_id = b.book_id AND bc.is_available = 1) AS available_copies \
    FROM books b";

/// Split an aggregated name list
fn split_list(joined: Option<String>) -> Vec<String> {
    joined
        .map(|s| s.split(LIST_SEPARATOR).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Build a summary from a row selected with [`SUMMARY_SELECT`]
fn summary_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BookSummary> {
    Ok(BookSummary {
        book: row.get("book_id")?,
        title: row.get("title")?,
        authors: split_list(row.get("authors")?),
        categories: split_list(row.get("categories")?),
        total_copies: row.get("total_copies")?,
        available_copies: row.get("available_copies")?,
    })
}

/// Run the summary projection with an optional filter and one bound parameter
fn summaries(
    conn: &Connection,
    filter: &str,
    param: Option<&str>,
) -> LedgerResult<Vec<BookSummary>> {
    let sql = format!("{SUMMARY_SELECT} {filter} ORDER BY b.title, b.book_id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = match param {
        Some(p) => stmt.query_map(params![p], summary_from_row)?.collect::<Result<Vec<_>, _>>()?,
        None => stmt.query_map([], summary_from_row)?.collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

/// Find titles whose `field` contains `term`
///
/// Author matching normalises `term` the same way author names are normalised
/// when stored, so `"j.k. rowling"` finds `"J. K. Rowling"`.
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn search(conn: &Connection, field: SearchField, term: &str) -> LedgerResult<Vec<BookSummary>> {
    debug!(?field, term, "searching catalog");
    let (filter, pattern) = match field {
        SearchField::Title => ("WHERE b.title LIKE ?1 ESCAPE '\\'", contains_pattern(term.trim())),
        SearchField::Author => (
            "WHERE EXISTS (SELECT 1 FROM book_authors ba \
                JOIN authors a ON a.author_id = ba.author_id \
                WHERE ba.book_id = b.book_id AND a.normalized_name LIKE ?1 ESCAPE '\\')",
            contains_pattern(&normalize_name(term)),
        ),
        SearchField::Category => (
            "WHERE EXISTS (SELECT 1 FROM book_categories bcg \
                JOIN categories c ON c.category_id = bcg.category_id \
                WHERE bcg.book_id = b.book_id AND c.name LIKE ?1 ESCAPE '\\')",
            contains_pattern(term.trim()),
        ),
    };
    summaries(conn, filter, Some(pattern.as_str()))
}

/// Titles with at least one copy on the shelf
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn available_books(conn: &Connection) -> LedgerResult<Vec<BookSummary>> {
    summaries(
        conn,
        "WHERE EXISTS (SELECT 1 FROM book_copies bc WHERE bc.book_id = b.book_id AND bc.is_available = 1)",
        None,
    )
}

/// Summary of one title
///
/// # Errors
///
/// Returns `LedgerError::BookNotFound` if the title does not exist.
pub fn summary(conn: &Connection, book: BookId) -> LedgerResult<BookSummary> {
    let sql = format!("{SUMMARY_SELECT} WHERE b.book_id = ?1");
    conn.query_row(&sql, params![book], summary_from_row)
        .optional()?
        .ok_or(LedgerError::BookNotFound(book))
}

/// Look up a title
///
/// # Errors
///
/// Returns `LedgerError::BookNotFound` if the title does not exist.
pub fn get_book(conn: &Connection, book: BookId) -> LedgerResult<Book> {
    let sql = format!("SELECT {} FROM books WHERE book_id = ?1", Book::COLUMNS);
    conn.query_row(&sql, params![book], Book::from_row)
        .optional()?
        .ok_or(LedgerError::BookNotFound(book))
}

/// Look up a copy
///
/// # Errors
///
/// Returns `LedgerError::CopyNotFound` if the copy does not exist.
pub fn get_copy(conn: &Connection, copy: CopyId) -> LedgerResult<BookCopy> {
    let sql = format!("SELECT {} FROM book_copies WHERE copy_id = ?1", BookCopy::COLUMNS);
    conn.query_row(&sql, params![copy], BookCopy::from_row)
        .optional()?
        .ok_or(LedgerError::CopyNotFound(copy))
}

/// All copies of a title, by copy id
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn copies_of(conn: &Connection, book: BookId) -> LedgerResult<Vec<BookCopy>> {
    let sql = format!(
        "SELECT {} FROM book_copies WHERE book_id = ?1 ORDER BY copy_id",
        BookCopy::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let copies: Vec<BookCopy> =
        stmt.query_map(params![book], BookCopy::from_row)?.collect::<Result<_, _>>()?;
    Ok(copies)
}

/// The available copy of `book` with the lowest id, if any
///
/// Callers that go on to lend the copy must already hold the write lock
/// (see `Store::write`), otherwise another session may pick the same copy.
///
/// # Errors
///
/// Returns `LedgerError::Storage` if the query fails.
pub fn find_available_copy(conn: &Connection, book: BookId) -> LedgerResult<Option<BookCopy>> {
    let sql = format!(
        "SELECT {} FROM book_copies WHERE book_id = ?1 AND is_available = 1 \
         ORDER BY copy_id LIMIT 1",
        BookCopy::COLUMNS
    );
    Ok(conn.query_row(&sql, params![book], BookCopy::from_row).optional()?)
}

/// Flip a copy's availability flag
///
/// # Errors
///
/// Returns `LedgerError::CopyNotFound` if no row was updated.
pub(crate) fn set_copy_availability(
    conn: &Connection,
    copy: CopyId,
    available: bool,
) -> LedgerResult<()> {
    let updated = conn.execute(
        "UPDATE book_copies SET is_available = ?1 WHERE copy_id = ?2",
        params![available, copy],
    )?;
    if updated == 0 {
        return Err(LedgerError::CopyNotFound(copy));
    }
    Ok(())
}

/// Add one new available copy of `book` with a generated barcode
fn add_copy(conn: &Connection, book: BookId, shelf_location: Option<&str>) -> LedgerResult<BookCopy> {
    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(copy_id), 0) + 1 FROM book_copies",
        [],
        |row| row.get(0),
    )?;
    let barcode = format!("LIB-{next:08}");
    conn.execute(
        "INSERT INTO book_copies (book_id, barcode, shelf_location, condition_code, is_available) \
         VALUES (?1, ?2, ?3, 1, 1)",
        params![book, barcode, shelf_location],
    )?;
    let id = CopyId(conn.last_insert_rowid());
    debug!(%book, copy = %id, %barcode, "copy added");
    get_copy(conn, id)
}

/// Find or create the author whose normalised name matches `name`
fn ensure_author(conn: &Connection, name: &str) -> LedgerResult<AuthorId> {
    let key = normalize_name(name);
    if key.is_empty() {
        return Err(LedgerError::InvalidInput(format!("author name `{name}` is empty")));
    }
    conn.execute(
        "INSERT INTO authors (full_name, normalized_name) VALUES (?1, ?2) \
         ON CONFLICT (normalized_name) DO NOTHING",
        params![name.trim(), key],
    )?;
    Ok(conn.query_row(
        "SELECT author_id FROM authors WHERE normalized_name = ?1",
        params![key],
        |row| row.get(0),
    )?)
}

/// Find or create the category called `name`
fn ensure_category(conn: &Connection, name: &str) -> LedgerResult<CategoryId> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::InvalidInput("category name is empty".to_string()));
    }
    conn.execute(
        "INSERT INTO categories (name) VALUES (?1) ON CONFLICT (name) DO NOTHING",
        params![name],
    )?;
    Ok(conn.query_row(
        "SELECT category_id FROM categories WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?)
}

/// Replace the author links of `book`
fn link_authors(conn: &Connection, book: BookId, authors: &[String]) -> LedgerResult<()> {
    conn.execute("DELETE FROM book_authors WHERE book_id = ?1", params![book])?;
    for name in authors {
        let author = ensure_author(conn, name)?;
        conn.execute(
            "INSERT OR IGNORE INTO book_authors (book_id, author_id) VALUES (?1, ?2)",
            params![book, author],
        )?;
    }
    Ok(())
}

/// Replace the category links of `book`
fn link_categories(conn: &Connection, book: BookId, categories: &[String]) -> LedgerResult<()> {
    conn.execute("DELETE FROM book_categories WHERE book_id = ?1", params![book])?;
    for name in categories {
        let category = ensure_category(conn, name)?;
        conn.execute(
            "INSERT OR IGNORE INTO book_categories (book_id, category_id) VALUES (?1, ?2)",
            params![book, category],
        )?;
    }
    Ok(())
}

/// Catalogue a new title with its credits and copies
///
/// # Errors
///
/// Returns `LedgerError::InvalidInput` for an empty title or author name, or
/// `LedgerError::Storage` if an insert fails.
pub fn add_book(conn: &Connection, new: &NewBook) -> LedgerResult<Book> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(LedgerError::InvalidInput("title is empty".to_string()));
    }
    conn.execute(
        "INSERT INTO books (title, isbn, published_year, description) VALUES (?1, ?2, ?3, ?4)",
        params![title, new.isbn, new.published_year, new.description],
    )?;
    let book = BookId(conn.last_insert_rowid());
    link_authors(conn, book, &new.authors)?;
    link_categories(conn, book, &new.categories)?;
    for _ in 0..new.copies {
        add_copy(conn, book, new.shelf_location.as_deref())?;
    }
    info!(%book, title, copies = new.copies, "book added");
    get_book(conn, book)
}

/// Edit a title; see [`BookUpdate`]
///
/// Shrinking the copy count removes available copies that were never lent,
/// newest first. Copies on loan or with lending history are never removed.
/// Returns the edited title and the ids of any copies added. Those copies are
/// on the shelf; `ledger::update_book` offers them to the wait-list before
/// the transaction commits.
///
/// # Errors
///
/// Returns `LedgerError::BookNotFound` for an unknown title,
/// `LedgerError::CopiesOnLoan` if the target is below the number on loan, and
/// `LedgerError::InvalidInput` if not enough never-lent copies can be removed.
pub(crate) fn update_book(
    conn: &Connection,
    book: BookId,
    update: &BookUpdate,
) -> LedgerResult<(Book, Vec<CopyId>)> {
    get_book(conn, book)?;
    if let Some(title) = &update.title {
        if title.trim().is_empty() {
            return Err(LedgerError::InvalidInput("title is empty".to_string()));
        }
        conn.execute(
            "UPDATE books SET title = ?1 WHERE book_id = ?2",
            params![title.trim(), book],
        )?;
    }
    if let Some(description) = &update.description {
        conn.execute(
            "UPDATE books SET description = ?1 WHERE book_id = ?2",
            params![description, book],
        )?;
    }
    if let Some(authors) = &update.authors {
        link_authors(conn, book, authors)?;
    }
    if let Some(categories) = &update.categories {
        link_categories(conn, book, categories)?;
    }
    let added = match update.copies {
        Some(target) => resize_copies(conn, book, target)?,
        None => Vec::new(),
    };
    info!(%book, added = added.len(), "book updated");
    Ok((get_book(conn, book)?, added))
}

/// Add or remove copies until `book` owns `target` of them; returns the added copies
fn resize_copies(conn: &Connection, book: BookId, target: u32) -> LedgerResult<Vec<CopyId>> {
    let current = summary(conn, book)?;
    let on_loan = current.total_copies.saturating_sub(current.available_copies);
    if target < on_loan {
        return Err(LedgerError::CopiesOnLoan { book, on_loan });
    }
    if target >= current.total_copies {
        return (current.total_copies..target)
            .map(|_| add_copy(conn, book, None).map(|copy| copy.id))
            .collect();
    }
    let surplus = current.total_copies.saturating_sub(target);
    let removed = conn.execute(
        "DELETE FROM book_copies WHERE copy_id IN ( \
            SELECT bc.copy_id FROM book_copies bc \
            WHERE bc.book_id = ?1 AND bc.is_available = 1 \
              AND NOT EXISTS (SELECT 1 FROM borrows br WHERE br.copy_id = bc.copy_id) \
            ORDER BY bc.copy_id DESC LIMIT ?2)",
        params![book, surplus],
    )?;
    if u32::try_from(removed).unwrap_or(u32::MAX) < surplus {
        return Err(LedgerError::InvalidInput(format!(
            "only {removed} of {surplus} surplus copies of book {book} have no lending history"
        )));
    }
    Ok(Vec::new())
}

/// Record a member's rating of a title
///
/// # Errors
///
/// Returns `LedgerError::InvalidInput` for a rating outside 1..=5 and
/// `LedgerError::UserNotFound` / `LedgerError::BookNotFound` for unknown ids.
pub fn add_review(
    conn: &Connection,
    user: UserId,
    book: BookId,
    rating: u8,
    comment: Option<&str>,
    today: NaiveDate,
) -> LedgerResult<Review> {
    if !(1..=5).contains(&rating) {
        return Err(LedgerError::InvalidInput(format!("rating {rating} is outside 1..=5")));
    }
    membership::get_user(conn, user)?;
    get_book(conn, book)?;
    conn.execute(
        "INSERT INTO reviews (user_id, book_id, rating, comment, review_date) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user, book, rating, comment, today],
    )?;
    Ok(Review {
        id: ReviewId(conn.last_insert_rowid()),
        user,
        book,
        rating,
        comment: comment.map(str::to_string),
        review_date: today,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn store() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    fn hobbit() -> NewBook {
        NewBook {
            title: "The Hobbit".to_string(),
            authors: vec!["J. R. R. Tolkien".to_string()],
            categories: vec!["Fantasy".to_string()],
            copies: 3,
            ..NewBook::default()
        }
    }

    #[test]
    fn test_add_book_creates_copies_and_links() {
        let mut store = store();
        let summary = store
            .write(|conn| {
                let book = add_book(conn, &hobbit())?;
                summary(conn, book.id)
            })
            .unwrap();
        assert_eq!(summary.total_copies, 3);
        assert_eq!(summary.available_copies, 3);
        assert_eq!(summary.authors, vec!["J. R. R. Tolkien".to_string()]);
        assert_eq!(summary.categories, vec!["Fantasy".to_string()]);
    }

    #[test]
    fn test_authors_deduplicated_by_normalised_name() {
        let mut store = store();
        let authors: i64 = store
            .write(|conn| {
                add_book(conn, &hobbit())?;
                let mut other = hobbit();
                other.title = "The Silmarillion".to_string();
                other.authors = vec!["j.r.r. tolkien".to_string()];
                add_book(conn, &other)?;
                Ok(conn.query_row("SELECT COUNT(*) FROM authors", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(authors, 1);
    }

    #[test]
    fn test_search_by_author_ignores_dots_and_spaces() {
        let mut store = store();
        let hits = store
            .write(|conn| {
                add_book(conn, &hobbit())?;
                search(conn, SearchField::Author, "JRR Tolk")
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "The Hobbit");
    }

    #[test]
    fn test_search_by_title_and_category() {
        let mut store = store();
        store.write(|conn| add_book(conn, &hobbit()).map(drop)).unwrap();
        let by_title = store.read(|conn| search(conn, SearchField::Title, "hob")).unwrap();
        let by_category = store.read(|conn| search(conn, SearchField::Category, "fant")).unwrap();
        let miss = store.read(|conn| search(conn, SearchField::Title, "%")).unwrap();
        assert_eq!(by_title.len(), 1);
        assert_eq!(by_category.len(), 1);
        assert!(miss.is_empty());
    }

    #[test]
    fn test_find_available_copy_picks_lowest_id() {
        let mut store = store();
        let (copies, picked) = store
            .write(|conn| {
                let book = add_book(conn, &hobbit())?;
                let copies = copies_of(conn, book.id)?;
                set_copy_availability(conn, copies[0].id, false)?;
                let picked = find_available_copy(conn, book.id)?;
                Ok((copies, picked))
            })
            .unwrap();
        assert_eq!(picked.map(|c| c.id), Some(copies[1].id));
    }

    #[test]
    fn test_shrinking_below_copies_on_loan_fails() {
        let mut store = store();
        let result = store.write(|conn| {
            let book = add_book(conn, &hobbit())?;
            for copy in copies_of(conn, book.id)?.iter().take(2) {
                set_copy_availability(conn, copy.id, false)?;
            }
            update_book(conn, book.id, &BookUpdate { copies: Some(1), ..BookUpdate::default() })
        });
        assert!(matches!(result, Err(LedgerError::CopiesOnLoan { on_loan: 2, .. })));
    }

    #[test]
    fn test_resize_copies_both_ways() {
        let mut store = store();
        let (added, grown, removed, shrunk) = store
            .write(|conn| {
                let book = add_book(conn, &hobbit())?;
                let (_, added) =
                    update_book(conn, book.id, &BookUpdate { copies: Some(5), ..BookUpdate::default() })?;
                let grown = summary(conn, book.id)?.total_copies;
                let (_, removed) =
                    update_book(conn, book.id, &BookUpdate { copies: Some(2), ..BookUpdate::default() })?;
                Ok((added, grown, removed, summary(conn, book.id)?.total_copies))
            })
            .unwrap();
        assert_eq!(added.len(), 2);
        assert_eq!(grown, 5);
        assert!(removed.is_empty());
        assert_eq!(shrunk, 2);
    }

    #[test]
    fn test_review_rating_range() {
        let mut store = store();
        let result = store.write(|conn| {
            let book = add_book(conn, &hobbit())?;
            add_review(conn, UserId(1), book.id, 6, None, NaiveDate::MIN)
        });
        assert!(matches!(result, Err(LedgerError::InvalidInput(_))));
    }
}

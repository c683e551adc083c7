//! Deterministic synthetic data for demos and benchmarks.
//!
//! Reference data (members, staff, authors, titles, copies) is inserted
//! directly. The lending history is then played day by day through a
//! [`Ledger`] driven by a [`ManualClock`], so every borrow, fine and
//! reservation obeys the same rules as live traffic.

use chrono::{Days, NaiveDate};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::IndexedRandom};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    catalog::{self, NewBook},
    clock::ManualClock,
    error::{ErrorKind, LedgerError, LedgerResult},
    fines,
    ledger::Ledger,
    membership::{self, NewLibrarian, NewUser},
    model::{BookId, LibrarianId, MembershipType, UserId, UserStatus},
};

/// Given names drawn for members, staff and authors
const FIRST_NAMES: [&str; 24] = [
    "Ada", "Alan", "Beatrix", "Carlos", "Chen", "Dorothy", "Emeka", "Farah", "Grace", "Hiro",
    "Ingrid", "Jamal", "Katya", "Leila", "Marcus", "Nadia", "Oscar", "Priya", "Quentin", "Rosa",
    "Sven", "Tomas", "Uma", "Yusuf",
];

/// Family names drawn for members, staff and authors
const LAST_NAMES: [&str; 20] = [
    "Achebe", "Borges", "Calvino", "Duras", "Eco", "Fuentes", "Gordimer", "Hesse", "Ishiguro",
    "Jansson", "Kafka", "Lessing", "Mahfouz", "Neruda", "Oz", "Pamuk", "Rushdie", "Saramago",
    "Tolstoy", "Woolf",
];

/// Vocabulary for generated titles
const TITLE_WORDS: [&str; 24] = [
    "Silent", "River", "Garden", "Empire", "Winter", "Glass", "Shadow", "Harbor", "Letters", "Night",
    "Machine", "Orchard", "Atlas", "Memory", "Storm", "Lantern", "Island", "Theory", "Salt", "Clock",
    "Mountain", "Echo", "Paper", "Light",
];

/// Subject headings assigned to generated titles
const CATEGORIES: [&str; 7] =
    ["Fiction", "Non-fiction", "Science", "Technology", "History", "Children", "Philosophy"];

/// How much data to generate
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SeedPlan {
    /// RNG seed; equal seeds give equal libraries
    pub seed: u64,
    /// Members to register
    pub users: u32,
    /// Staff to register
    pub librarians: u32,
    /// Distinct author names to draw credits from
    pub authors: u32,
    /// Titles to catalogue
    pub books: u32,
    /// Reviews to write once lending is done
    pub reviews: u32,
    /// First simulated day
    pub start: NaiveDate,
    /// Number of simulated days
    pub days: u32,
    /// Upper bound on lending actions per simulated day
    pub daily_activity: u32,
    /// Chance that a member is deactivated at the end
    pub inactive_ratio: f64,
}

impl Default for SeedPlan {
    fn default() -> Self {
        Self {
            seed: 42,
            users: 50,
            librarians: 5,
            authors: 30,
            books: 50,
            reviews: 60,
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            days: 120,
            daily_activity: 4,
            inactive_ratio: 0.1,
        }
    }
}

/// Row counts after seeding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SeedSummary {
    /// Registered members
    pub users: u32,
    /// Registered staff
    pub librarians: u32,
    /// Catalogued titles
    pub books: u32,
    /// Physical copies
    pub copies: u32,
    /// Borrows, open and closed
    pub borrows: u32,
    /// Fines assessed
    pub fines: u32,
    /// Reservations in any status
    pub reservations: u32,
    /// Reviews written
    pub reviews: u32,
}

/// Fill the ledger's store with a synthetic library
///
/// `clock` must be the clock `ledger` was built with; it is moved through the
/// simulated days and left on the last one.
///
/// # Errors
///
/// Returns `LedgerError::InvalidInput` if the simulated window leaves the
/// calendar, or any storage error raised while writing.
pub fn seed(ledger: &mut Ledger, clock: &ManualClock, plan: &SeedPlan) -> LedgerResult<SeedSummary> {
    info!(seed = plan.seed, users = plan.users, books = plan.books, days = plan.days, "seeding library");
    let mut rng = StdRng::seed_from_u64(plan.seed);
    let cast = ledger.store().write(|conn| populate(conn, &mut rng, plan))?;
    simulate(ledger, clock, &mut rng, plan, &cast)?;

    let today = ledger.today();
    ledger.store().write(|conn| {
        for _ in 0..plan.reviews {
            let (Some(&user), Some(&book)) = (cast.users.choose(&mut rng), cast.books.choose(&mut rng)) else {
                break;
            };
            let rating = rng.random_range(1..=5_u8);
            catalog::add_review(conn, user, book, rating, None, today)?;
        }
        for &user in &cast.users {
            if rng.random_bool(plan.inactive_ratio.clamp(0.0, 1.0)) {
                membership::set_status(conn, user, UserStatus::Inactive)?;
            }
        }
        Ok(())
    })?;

    let summary = ledger.store().read(summarize)?;
    info!(?summary, "library seeded");
    Ok(summary)
}

/// Ids created by [`populate`]
#[derive(Debug)]
struct Cast {
    /// Members
    users: Vec<UserId>,
    /// Staff
    librarians: Vec<LibrarianId>,
    /// Titles
    books: Vec<BookId>,
}

/// A random `(given, family)` name
fn person(rng: &mut StdRng) -> (&'static str, &'static str) {
    let first = FIRST_NAMES.choose(rng).copied().unwrap_or("Ada");
    let last = LAST_NAMES.choose(rng).copied().unwrap_or("Woolf");
    (first, last)
}

/// A random day between the start of `from` and the end of `to`
fn random_day(rng: &mut StdRng, from: i32, to: i32) -> NaiveDate {
    let year = rng.random_range(from..=to);
    let month = rng.random_range(1..=12);
    let day = rng.random_range(1..=28);
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

/// Insert members, staff, authors, categories, titles and copies
fn populate(conn: &Connection, rng: &mut StdRng, plan: &SeedPlan) -> LedgerResult<Cast> {
    let mut users = Vec::new();
    for i in 1..=plan.users {
        let (first, last) = person(rng);
        let membership_type = MembershipType::ALL.choose(rng).copied().unwrap_or_default();
        let login = format!("{}.{}{i}", first.to_ascii_lowercase(), last.to_ascii_lowercase());
        let phone = format!("555-{:04}", rng.random_range(0..10_000));
        let user = membership::add_user(
            conn,
            &NewUser {
                full_name: format!("{first} {last}"),
                email: format!("{login}@example.org"),
                phone: Some(phone),
                username: Some(login),
                membership_type,
                membership_date: random_day(rng, 2015, 2023),
            },
        )?;
        users.push(user.id);
    }

    let mut librarians = Vec::new();
    for i in 1..=plan.librarians {
        let (first, last) = person(rng);
        let librarian = membership::add_librarian(
            conn,
            &NewLibrarian {
                full_name: format!("{first} {last}"),
                email: format!("staff{i}@library.example.org"),
                username: format!("librarian{i}"),
            },
        )?;
        librarians.push(librarian.id);
    }

    let authors: Vec<String> = (0..plan.authors)
        .map(|_| {
            let (first, last) = person(rng);
            format!("{first} {last}")
        })
        .collect();

    let mut books = Vec::new();
    for _ in 0..plan.books {
        let words = rng.random_range(2..=4);
        let title = TITLE_WORDS.choose_multiple(rng, words).copied().collect::<Vec<_>>().join(" ");
        let credits = rng.random_range(1..=3);
        let headings = rng.random_range(1..=2);
        let isbn = format!("978-{:010}", rng.random_range(0..10_000_000_000_u64));
        let book = catalog::add_book(
            conn,
            &NewBook {
                title,
                isbn: Some(isbn),
                published_year: Some(rng.random_range(1980..=2023)),
                description: None,
                authors: authors.choose_multiple(rng, credits).cloned().collect(),
                categories: CATEGORIES.choose_multiple(rng, headings).map(|c| (*c).to_string()).collect(),
                copies: rng.random_range(2..=5),
                shelf_location: Some(format!("Shelf-{}", rng.random_range(1..=20))),
            },
        )?;
        books.push(book.id);
    }
    debug!(users = users.len(), librarians = librarians.len(), books = books.len(), "reference data inserted");
    Ok(Cast { users, librarians, books })
}

/// Play the lending history one simulated day at a time
fn simulate(
    ledger: &mut Ledger,
    clock: &ManualClock,
    rng: &mut StdRng,
    plan: &SeedPlan,
    cast: &Cast,
) -> LedgerResult<()> {
    for offset in 0..plan.days {
        let today = plan
            .start
            .checked_add_days(Days::new(u64::from(offset)))
            .ok_or_else(|| LedgerError::InvalidInput("seed window leaves the calendar".to_string()))?;
        clock.set(today);
        for _ in 0..rng.random_range(0..=plan.daily_activity) {
            if rng.random_bool(0.55) {
                lend_one(ledger, rng, cast)?;
            } else {
                return_one(ledger, rng)?;
            }
        }
    }
    Ok(())
}

/// Try to lend a random title to a random member, reserving it if none is free
fn lend_one(ledger: &mut Ledger, rng: &mut StdRng, cast: &Cast) -> LedgerResult<()> {
    let (Some(&user), Some(&book)) = (cast.users.choose(rng), cast.books.choose(rng)) else {
        return Ok(());
    };
    let librarian = cast.librarians.choose(rng).copied();
    let err = match ledger.issue(user, book, librarian) {
        Ok(_) => return Ok(()),
        Err(err) => err,
    };
    match err.kind() {
        ErrorKind::NoCopyAvailable => match ledger.reserve(user, book) {
            Err(e) if !matches!(e.kind(), ErrorKind::InvalidState | ErrorKind::IneligibleUser) => Err(e),
            _ => Ok(()),
        },
        ErrorKind::IneligibleUser if rng.random_bool(0.7) => settle_fines(ledger, user),
        ErrorKind::IneligibleUser => Ok(()),
        _ => Err(err),
    }
}

/// Return a random outstanding borrow; long-held copies come back late and are fined
fn return_one(ledger: &mut Ledger, rng: &mut StdRng) -> LedgerResult<()> {
    let active = ledger.list_active_borrows(None)?;
    if let Some(open) = active.choose(rng) {
        ledger.return_copy(open.borrow.id)?;
    }
    Ok(())
}

/// Pay every unpaid fine of `user`
fn settle_fines(ledger: &mut Ledger, user: UserId) -> LedgerResult<()> {
    let owed = ledger.store().read(|conn| fines::fines_for(conn, user))?;
    for fine in owed.into_iter().filter(|f| !f.paid) {
        ledger.pay_fine(fine.id)?;
    }
    Ok(())
}

/// Row count of one table
fn count(conn: &Connection, table: &str) -> LedgerResult<u32> {
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
}

/// Count what was generated
fn summarize(conn: &Connection) -> LedgerResult<SeedSummary> {
    Ok(SeedSummary {
        users: count(conn, "users")?,
        librarians: count(conn, "librarians")?,
        books: count(conn, "books")?,
        copies: count(conn, "book_copies")?,
        borrows: count(conn, "borrows")?,
        fines: count(conn, "fines")?,
        reservations: count(conn, "reservations")?,
        reviews: count(conn, "reviews")?,
    })
}

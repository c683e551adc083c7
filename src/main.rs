use std::{io, path::PathBuf, process::ExitCode};

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use lending_ledger::{
    Ledger, LedgerResult, LendingPolicy, ManualClock, NotificationService, Store, TransitionLogger,
    catalog::{self, BookSummary, BookUpdate, NewBook, SearchField},
    fines,
    ledger::{AccountSummary, with_conflict_retry},
    membership::{self, NewLibrarian, NewUser},
    model::{
        BookId, Borrow, BorrowDetails, BorrowId, BorrowState, Fine, FineId, LibrarianId, MembershipType,
        Money, Reservation, ReservationId, ReservationStatus, User, UserId, UserStatus,
    },
    report::{self, ReportKind},
    reservations,
    seed::{self, SeedPlan},
};
use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Times a lending operation is attempted while another session holds the lock
const CONFLICT_ATTEMPTS: u32 = 3;

/// Command-line client for the library lending ledger
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Library database file
    #[arg(long, default_value = "library.db")]
    db: PathBuf,

    /// JSON file with the lending policy
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose output with detailed operation logs
    #[arg(short, long)]
    verbose: bool,

    /// Let members borrow regardless of unpaid fines
    #[arg(long)]
    no_fine_cap: bool,

    /// Largest unpaid total that still allows borrowing
    #[arg(long, conflicts_with = "no_fine_cap")]
    fine_cap: Option<Money>,

    /// Late fee per overdue day
    #[arg(long)]
    daily_rate: Option<Money>,

    /// Loan period in days
    #[arg(long)]
    loan_days: Option<u32>,

    /// Operation to run
    #[command(subcommand)]
    command: Command,
}

/// Operations offered by the client
#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema
    Init,
    /// Fill an empty database with deterministic synthetic data
    Seed {
        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Members to register
        #[arg(long, default_value_t = 50)]
        users: u32,
        /// Titles to catalogue
        #[arg(long, default_value_t = 50)]
        books: u32,
        /// Days of lending history to simulate
        #[arg(long, default_value_t = 120)]
        days: u32,
    },
    /// Lend the lowest-numbered available copy of a book
    Issue {
        /// Borrowing member
        user: UserId,
        /// Requested title
        book: BookId,
        /// Librarian at the desk
        #[arg(long)]
        librarian: Option<LibrarianId>,
    },
    /// Return a borrowed copy
    Return {
        /// Borrow to close
        borrow: BorrowId,
    },
    /// Join the wait-list for a book with no copy on the shelf
    Reserve {
        /// Waiting member
        user: UserId,
        /// Requested title
        book: BookId,
    },
    /// Leave a wait-list
    CancelReservation {
        /// Reservation to cancel
        reservation: ReservationId,
    },
    /// Settle a fine
    PayFine {
        /// Fine to settle
        fine: FineId,
    },
    /// List copies currently on loan
    ActiveBorrows {
        /// Only this member's borrows
        #[arg(long)]
        user: Option<UserId>,
    },
    /// List every borrow, newest first
    History {
        /// Only this member's borrows
        #[arg(long)]
        user: Option<UserId>,
    },
    /// Show a member's borrowing totals and fines due
    Account {
        /// Member
        user: UserId,
    },
    /// List a member's fines
    Fines {
        /// Member
        user: UserId,
    },
    /// Catalogue a new title
    AddBook(AddBookArgs),
    /// Edit a title
    UpdateBook(UpdateBookArgs),
    /// Search the catalog; with no term, list every title
    Search {
        /// Text to look for
        term: Option<String>,
        /// Field to match: title, author or category
        #[arg(long, default_value = "title", value_parser = parse_search_field)]
        by: SearchField,
        /// Only titles with a copy on the shelf
        #[arg(long)]
        available: bool,
    },
    /// Register a member
    AddUser(AddUserArgs),
    /// Register a librarian
    AddLibrarian {
        /// Full name
        full_name: String,
        /// Email address
        email: String,
        /// Login handle
        username: String,
    },
    /// Activate or deactivate a member
    SetStatus {
        /// Member
        user: UserId,
        /// `active` or `inactive`
        status: UserStatus,
    },
    /// Change a member's name or phone number
    UpdateContact {
        /// Member
        user: UserId,
        /// New full name
        #[arg(long)]
        name: Option<String>,
        /// New phone number
        #[arg(long)]
        phone: Option<String>,
    },
    /// List members holding a student card
    Students,
    /// Reservations a member has placed, newest first
    Reservations {
        /// Member
        user: UserId,
    },
    /// Rate a title
    Review {
        /// Reviewer
        user: UserId,
        /// Reviewed title
        book: BookId,
        /// 1 to 5
        rating: u8,
        /// Free text
        #[arg(long)]
        comment: Option<String>,
    },
    /// Run a report
    Report {
        /// Which report
        kind: ReportKind,
        /// Rows returned by top-N reports
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

/// Fields of `add-book`
#[derive(Args, Debug)]
struct AddBookArgs {
    /// Title
    title: String,
    /// ISBN
    #[arg(long)]
    isbn: Option<String>,
    /// Year of publication
    #[arg(long)]
    year: Option<i32>,
    /// Blurb
    #[arg(long)]
    description: Option<String>,
    /// Author name; repeat for several
    #[arg(long = "author")]
    authors: Vec<String>,
    /// Category name; repeat for several
    #[arg(long = "category")]
    categories: Vec<String>,
    /// Copies to create
    #[arg(long, default_value_t = 1)]
    copies: u32,
    /// Shelf for the new copies
    #[arg(long)]
    shelf: Option<String>,
}

impl From<AddBookArgs> for NewBook {
    fn from(args: AddBookArgs) -> Self {
        Self {
            title: args.title,
            isbn: args.isbn,
            published_year: args.year,
            description: args.description,
            authors: args.authors,
            categories: args.categories,
            copies: args.copies,
            shelf_location: args.shelf,
        }
    }
}

/// Fields of `update-book`; omitted flags leave the title untouched
#[derive(Args, Debug)]
struct UpdateBookArgs {
    /// Title to edit
    book: BookId,
    /// New title
    #[arg(long)]
    title: Option<String>,
    /// New blurb
    #[arg(long)]
    description: Option<String>,
    /// Replacement author list; repeat for several
    #[arg(long = "author")]
    authors: Vec<String>,
    /// Replacement category list; repeat for several
    #[arg(long = "category")]
    categories: Vec<String>,
    /// Desired number of copies
    #[arg(long)]
    copies: Option<u32>,
}

impl From<UpdateBookArgs> for BookUpdate {
    fn from(args: UpdateBookArgs) -> Self {
        Self {
            title: args.title,
            description: args.description,
            authors: (!args.authors.is_empty()).then_some(args.authors),
            categories: (!args.categories.is_empty()).then_some(args.categories),
            copies: args.copies,
        }
    }
}

/// Fields of `add-user`
#[derive(Args, Debug)]
struct AddUserArgs {
    /// Full name
    full_name: String,
    /// Email address
    email: String,
    /// Phone number
    #[arg(long)]
    phone: Option<String>,
    /// Login handle
    #[arg(long)]
    username: Option<String>,
    /// Card type: student, teacher, guest, researcher or staff
    #[arg(long, default_value = "student")]
    membership: MembershipType,
    /// Membership start, defaults to today
    #[arg(long)]
    since: Option<NaiveDate>,
}

impl AddUserArgs {
    /// Registration record, dated `today` unless `--since` was given
    fn into_new_user(self, today: NaiveDate) -> NewUser {
        NewUser {
            full_name: self.full_name,
            email: self.email,
            phone: self.phone,
            username: self.username,
            membership_type: self.membership,
            membership_date: self.since.unwrap_or(today),
        }
    }
}

/// Parse the `--by` value of `search`
fn parse_search_field(s: &str) -> Result<SearchField, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "title" => Ok(SearchField::Title),
        "author" => Ok(SearchField::Author),
        "category" => Ok(SearchField::Category),
        other => Err(format!("cannot search by `{other}`, expected title, author or category")),
    }
}

/// Run one command and map its outcome to the process exit status
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err}", format!("error [{:?}]:", err.kind()).red().bold());
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                eprintln!("  {} {cause}", "caused by:".yellow());
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr; `RUST_LOG` wins over `--verbose`
fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

/// Policy from `--config`, then overridden by individual flags
fn resolve_policy(cli: &Cli) -> LedgerResult<LendingPolicy> {
    let mut policy = cli.config.as_deref().map_or_else(|| Ok(LendingPolicy::default()), LendingPolicy::load)?;
    if let Some(days) = cli.loan_days {
        policy.loan_period_days = days;
    }
    if let Some(rate) = cli.daily_rate {
        policy.daily_rate = rate;
    }
    if let Some(cap) = cli.fine_cap {
        policy.fine_cap = Some(cap);
    }
    if cli.no_fine_cap {
        policy.fine_cap = None;
    }
    policy.validate()?;
    debug!(?policy, "lending policy resolved");
    Ok(policy)
}

/// How results are printed
#[derive(Debug, Clone, Copy)]
struct Output {
    /// Serde JSON instead of text
    json: bool,
}

impl Output {
    /// Print `value` as JSON, or through `text`
    fn show<T: Serialize + ?Sized>(self, value: &T, text: impl FnOnce(&T)) -> LedgerResult<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value).map_err(io::Error::from)?);
        } else {
            text(value);
        }
        Ok(())
    }
}

/// Open the ledger described by `cli` and run its command
fn run(cli: Cli) -> LedgerResult<()> {
    let policy = resolve_policy(&cli)?;
    let mut store = Store::open(&cli.db, policy.busy_timeout())?;
    store.migrate()?;
    let out = Output { json: cli.json };

    if let Command::Seed { seed, users, books, days } = cli.command {
        let plan = SeedPlan { seed, users, books, days, ..SeedPlan::default() };
        let clock = ManualClock::new(plan.start);
        let mut ledger = Ledger::new(store, policy).with_clock(clock.clone());
        let summary = seed::seed(&mut ledger, &clock, &plan)?;
        return out.show(&summary, |s| {
            println!("{}", "Library seeded".green().bold());
            println!(
                "{} users, {} librarians, {} books ({} copies), {} borrows, {} fines, {} reservations, {} reviews",
                s.users, s.librarians, s.books, s.copies, s.borrows, s.fines, s.reservations, s.reviews
            );
        });
    }

    let notices = NotificationService::new();
    let mut ledger = Ledger::new(store, policy);
    ledger.register_observer(Box::new(TransitionLogger));
    ledger.register_observer(Box::new(notices.clone()));

    let outcome = dispatch(&mut ledger, out, cli.command);
    for notice in notices.drain() {
        eprintln!("{} member {}: {}", "notify".cyan(), notice.user, notice.message);
    }
    outcome
}

/// Run one command against an open ledger
fn dispatch(ledger: &mut Ledger, out: Output, command: Command) -> LedgerResult<()> {
    match command {
        Command::Init | Command::Seed { .. } => {
            let path = ledger.store().path().map_or_else(String::new, |p| p.display().to_string());
            out.show(&path, |p| println!("{} {p}", "Database ready:".green().bold()))
        }
        Command::Issue { user, book, librarian } => {
            let borrow = with_conflict_retry(CONFLICT_ATTEMPTS, || ledger.issue(user, book, librarian))?;
            out.show(&borrow, |b| print_borrow("Issued", b))
        }
        Command::Return { borrow } => return_copy(ledger, out, borrow),
        Command::Reserve { user, book } => {
            let reservation = with_conflict_retry(CONFLICT_ATTEMPTS, || ledger.reserve(user, book))?;
            out.show(&reservation, |r| {
                println!("{} reservation {} for book {} by member {}", "Reserved".green().bold(), r.id, r.book, r.user);
            })
        }
        Command::CancelReservation { reservation } => {
            let cancelled = ledger.cancel_reservation(reservation)?;
            out.show(&cancelled, |r| println!("{} reservation {}", "Cancelled".yellow().bold(), r.id))
        }
        Command::PayFine { fine } => {
            let paid = ledger.pay_fine(fine)?;
            out.show(&paid, print_fine)
        }
        Command::ActiveBorrows { user } => {
            let today = ledger.today();
            let rows = ledger.list_active_borrows(user)?;
            out.show(&rows, |r| print_details(r, today))
        }
        Command::History { user } => {
            let today = ledger.today();
            let rows = ledger.borrow_history(user)?;
            out.show(&rows, |r| print_details(r, today))
        }
        Command::Account { user } => {
            let summary = ledger.account_summary(user)?;
            out.show(&summary, print_account)
        }
        Command::Fines { user } => {
            let fines = ledger.store().read(|conn| fines::fines_for(conn, user))?;
            out.show(&fines, |all| all.iter().for_each(print_fine))
        }
        Command::AddBook(args) => {
            let new = NewBook::from(args);
            catalog_change(ledger, out, |conn| catalog::add_book(conn, &new).map(|book| book.id))
        }
        Command::UpdateBook(args) => update_book(ledger, out, args),
        Command::Search { term, by, available } => search(ledger, out, term.as_deref(), by, available),
        Command::AddUser(args) => {
            let new = args.into_new_user(ledger.today());
            let user = ledger.store().write(|conn| membership::add_user(conn, &new))?;
            out.show(&user, print_user)
        }
        Command::AddLibrarian { full_name, email, username } => {
            let new = NewLibrarian { full_name, email, username };
            let librarian = ledger.store().write(|conn| membership::add_librarian(conn, &new))?;
            out.show(&librarian, |l| println!("{} librarian {}: {}", "Registered".green().bold(), l.id, l.full_name))
        }
        Command::SetStatus { user, status } => {
            let updated = ledger.store().write(|conn| membership::set_status(conn, user, status))?;
            out.show(&updated, print_user)
        }
        Command::UpdateContact { user, name, phone } => {
            let updated = ledger
                .store()
                .write(|conn| membership::update_contact(conn, user, name.as_deref(), phone.as_deref()))?;
            out.show(&updated, print_user)
        }
        Command::Reservations { user } => {
            let placed = ledger.store().read(|conn| reservations::reservations_for(conn, user))?;
            out.show(&placed, |all| all.iter().for_each(print_reservation))
        }
        Command::Students => {
            let students = ledger.store().read(|conn| membership::list_members(conn, MembershipType::Student))?;
            out.show(&students, |all| all.iter().for_each(print_user))
        }
        Command::Review { user, book, rating, comment } => {
            let today = ledger.today();
            let review = ledger
                .store()
                .write(|conn| catalog::add_review(conn, user, book, rating, comment.as_deref(), today))?;
            out.show(&review, |r| println!("{} review {} ({}/5)", "Recorded".green().bold(), r.id, r.rating))
        }
        Command::Report { kind, limit } => {
            let today = ledger.today();
            let result = ledger.store().read(|conn| report::run(conn, kind, today, limit))?;
            out.show(&result, |r| print!("{}\n{r}", format!("=== {kind} ===").bold()))
        }
    }
}

/// Return a copy and show the fine and hand-over it caused
fn return_copy(ledger: &mut Ledger, out: Output, borrow: BorrowId) -> LedgerResult<()> {
    let outcome = with_conflict_retry(CONFLICT_ATTEMPTS, || ledger.return_copy(borrow))?;
    out.show(&outcome, |o| {
        print_borrow("Returned", &o.borrow);
        if let Some(fine) = &o.fine {
            print_fine(fine);
        }
        if let Some(next) = &o.reservation_borrow {
            print_borrow("Handed to waiting member", next);
        }
    })
}

/// Search the catalog, or list every title when no term is given
fn search(ledger: &mut Ledger, out: Output, term: Option<&str>, by: SearchField, available: bool) -> LedgerResult<()> {
    let hits = ledger.store().read(|conn| match term {
        None if available => catalog::available_books(conn),
        term => {
            let mut hits = catalog::search(conn, by, term.unwrap_or_default())?;
            hits.retain(|s| !available || s.available_copies > 0);
            Ok(hits)
        }
    })?;
    out.show(hits.as_slice(), print_summaries)
}

/// Edit a title and show the hand-overs any added copies caused
fn update_book(ledger: &mut Ledger, out: Output, args: UpdateBookArgs) -> LedgerResult<()> {
    let book = args.book;
    let outcome = ledger.update_book(book, &BookUpdate::from(args))?;
    let summary = ledger.store().read(|conn| catalog::summary(conn, book))?;
    out.show(&outcome, |o| {
        print_summaries(std::slice::from_ref(&summary));
        for next in &o.reservation_borrows {
            print_borrow("Handed to waiting member", next);
        }
    })
}

/// Apply a catalog edit in one transaction and show the resulting title
fn catalog_change(
    ledger: &mut Ledger,
    out: Output,
    change: impl FnOnce(&Connection) -> LedgerResult<BookId>,
) -> LedgerResult<()> {
    let summary = ledger.store().write(|conn| {
        let book = change(conn)?;
        catalog::summary(conn, book)
    })?;
    out.show(&summary, |s| print_summaries(std::slice::from_ref(s)))
}

/// One line describing a borrow
fn print_borrow(action: &str, borrow: &Borrow) {
    println!(
        "{} borrow {}: copy {} to member {}, due {}",
        action.green().bold(),
        borrow.id,
        borrow.copy,
        borrow.user,
        borrow.due_date
    );
}

/// One line describing a fine
fn print_fine(fine: &Fine) {
    let status = if fine.paid {
        format!("paid {}", fine.payment_date.map_or_else(String::new, |d| d.to_string())).green()
    } else {
        "unpaid".red().bold()
    };
    println!("fine {} on borrow {}: {} ({status})", fine.id, fine.borrow, fine.amount);
}

/// Borrow table with each row's state as of `today`
fn print_details(rows: &[BorrowDetails], today: NaiveDate) {
    if rows.is_empty() {
        println!("{}", "No borrows".dimmed());
    }
    for row in rows {
        let state = row.borrow.state(today);
        let label = match state {
            BorrowState::Active => state.get_description().green(),
            BorrowState::Overdue => state.get_description().red().bold(),
            BorrowState::Returned => state.get_description().dimmed(),
        };
        println!(
            "{:>6}  {:<24}  {:<32}  {}  {} -> {}  {label}",
            row.borrow.id, row.user_name, row.title, row.barcode, row.borrow.borrow_date, row.borrow.due_date
        );
    }
}

/// Member line followed by borrowing totals
fn print_account(summary: &AccountSummary) {
    print_user(&summary.user);
    let fines = if summary.fines_due.is_zero() {
        "no fines due".green()
    } else {
        format!("fines due {}", summary.fines_due).red().bold()
    };
    println!("  borrowed {} in total, {} outstanding, {fines}", summary.total_borrowed, summary.currently_borrowed);
}

/// One line describing a reservation
fn print_reservation(reservation: &Reservation) {
    let status = match reservation.status {
        ReservationStatus::Pending => reservation.status.to_string().yellow(),
        ReservationStatus::Fulfilled => reservation.status.to_string().green(),
        ReservationStatus::Cancelled => reservation.status.to_string().dimmed(),
    };
    println!(
        "{:>6}  book {:<6}  placed {}  {status}",
        reservation.id, reservation.book, reservation.reservation_date
    );
}

/// One line describing a member
fn print_user(user: &User) {
    let status = match user.status {
        UserStatus::Active => user.status.to_string().green(),
        UserStatus::Inactive => user.status.to_string().red(),
    };
    println!(
        "{:>6}  {:<30}  {:<32}  {:<10}  {status}",
        user.id,
        user.full_name,
        user.email,
        user.membership_type.name()
    );
}

/// Catalog table with copy counts
fn print_summaries(books: &[BookSummary]) {
    if books.is_empty() {
        println!("{}", "No matching books".dimmed());
    }
    for book in books {
        let copies = format!("{}/{} available", book.available_copies, book.total_copies);
        let copies = if book.available_copies > 0 { copies.green() } else { copies.red() };
        println!("{:>6}  {:<40}  {:<30}  {copies}", book.book, book.title, book.authors.join(", "));
    }
}

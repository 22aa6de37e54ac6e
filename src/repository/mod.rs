//! Repository layer: catalog store, loan ledger and the lending unit of work
//!
//! Both stores are traits so the services can run against Postgres in
//! production and against [`memory::MemoryStore`] in tests or demo mode.

pub mod catalog;
pub mod loans;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{
        author::{CreateAuthor, UpdateAuthor},
        book::{CreateBook, UpdateBook},
        loan::LoanQuery,
        member::{CreateMember, UpdateMember},
        Author, Book, BookListing, Loan, Member, NewLoan, Paging,
    },
};

/// Persisted authors, books and members
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Check the backing store is reachable
    async fn ping(&self) -> AppResult<()>;

    async fn list_authors(&self, paging: Paging) -> AppResult<(Vec<Author>, i64)>;
    async fn get_author(&self, id: i32) -> AppResult<Author>;
    async fn create_author(&self, data: &CreateAuthor) -> AppResult<Author>;
    async fn update_author(&self, id: i32, data: &UpdateAuthor) -> AppResult<Author>;
    /// Fails with `Conflict` while a book references the author
    async fn delete_author(&self, id: i32) -> AppResult<()>;

    async fn list_books(&self, paging: Paging) -> AppResult<(Vec<Book>, i64)>;
    async fn get_book(&self, id: i32) -> AppResult<Book>;
    /// New books start with every copy available
    async fn create_book(&self, data: &CreateBook) -> AppResult<Book>;
    /// Changing `total_copies` shifts `available_copies` by the same delta
    /// while holding the book's lending lock
    async fn update_book(&self, id: i32, data: &UpdateBook) -> AppResult<Book>;
    /// Fails with `Conflict` once the book has any loan history
    async fn delete_book(&self, id: i32) -> AppResult<()>;

    /// Title and author name of books ordered by id, plus the total book count
    async fn list_book_listings(&self, offset: i64, limit: i64) -> AppResult<(Vec<BookListing>, i64)>;

    async fn list_members(&self, paging: Paging) -> AppResult<(Vec<Member>, i64)>;
    async fn get_member(&self, id: i32) -> AppResult<Member>;
    async fn create_member(&self, data: &CreateMember) -> AppResult<Member>;
    async fn update_member(&self, id: i32, data: &UpdateMember) -> AppResult<Member>;
    /// Fails with `Conflict` once the member has any loan history
    async fn delete_member(&self, id: i32) -> AppResult<()>;
}

/// Persisted loans
#[async_trait]
pub trait LoanLedger: Send + Sync {
    async fn get_loan(&self, id: i32) -> AppResult<Loan>;
    async fn list_loans(&self, query: &LoanQuery) -> AppResult<(Vec<Loan>, i64)>;
    /// Active loans due strictly before `today`, earliest due first
    async fn overdue_loans(&self, today: NaiveDate) -> AppResult<Vec<Loan>>;
    /// Open a unit of work for a lending transition
    async fn begin(&self) -> AppResult<Box<dyn LendingUnit>>;
}

/// Transactional unit of work behind loan, return and extension.
///
/// Locks taken by a unit are held until it is committed or dropped. Dropping
/// a unit without calling [`LendingUnit::commit`] discards every write made
/// through it.
#[async_trait]
pub trait LendingUnit: Send {
    /// Lock a book against concurrent lending transitions and read it
    async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<Book>>;
    async fn member_exists(&mut self, member_id: i32) -> AppResult<bool>;
    async fn set_available_copies(&mut self, book_id: i32, available_copies: i32) -> AppResult<()>;
    async fn insert_loan(&mut self, loan: &NewLoan) -> AppResult<Loan>;
    /// Active loans of a member on a book, most recently created first.
    /// Requires the book lock.
    async fn active_loans(&mut self, book_id: i32, member_id: i32) -> AppResult<Vec<Loan>>;
    async fn mark_returned(&mut self, loan_id: i32, return_date: NaiveDate) -> AppResult<Loan>;
    /// Lock a single loan and read it
    async fn lock_loan(&mut self, loan_id: i32) -> AppResult<Option<Loan>>;
    async fn set_due_date(&mut self, loan_id: i32, due_date: NaiveDate) -> AppResult<Loan>;
    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Main repository struct holding the stores
#[derive(Clone)]
pub struct Repository {
    pub catalog: Arc<dyn CatalogStore>,
    pub loans: Arc<dyn LoanLedger>,
}

impl Repository {
    /// Create a Postgres-backed repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            catalog: Arc::new(catalog::PgCatalogStore::new(pool.clone())),
            loans: Arc::new(loans::PgLoanLedger::new(pool)),
        }
    }

    /// Create a repository over a fresh in-process store
    pub fn in_memory() -> Self {
        let store = memory::MemoryStore::default();
        Self {
            catalog: Arc::new(store.clone()),
            loans: Arc::new(store),
        }
    }
}

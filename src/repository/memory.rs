//! In-process catalog store and loan ledger
//!
//! Rows live in ordered maps behind a plain mutex that is never held across
//! an await. Lending units serialize on per-book, per-member and per-loan
//! async locks and stage their writes, which are applied in one step on
//! commit. Lock table entries are evicted once no holder or waiter is left.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::{CatalogStore, LendingUnit, LoanLedger};
use crate::{
    error::{AppError, AppResult},
    models::{
        author::{CreateAuthor, UpdateAuthor},
        book::{AuthorName, CreateBook, UpdateBook},
        loan::LoanQuery,
        member::{CreateMember, UpdateMember},
        Author, Book, BookListing, Loan, Member, NewLoan, Paging,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LockKey {
    Book(i32),
    Member(i32),
    Loan(i32),
}

#[derive(Default)]
struct Tables {
    authors: BTreeMap<i32, Author>,
    books: BTreeMap<i32, Book>,
    members: BTreeMap<i32, Member>,
    loans: BTreeMap<i32, Loan>,
    last_author_id: i32,
    last_book_id: i32,
    last_member_id: i32,
    last_loan_id: i32,
}

fn next_id(last: &mut i32) -> i32 {
    *last += 1;
    *last
}

fn page_of<T: Clone>(rows: &BTreeMap<i32, T>, paging: Paging) -> (Vec<T>, i64) {
    let page = rows
        .values()
        .skip(paging.offset() as usize)
        .take(paging.limit() as usize)
        .cloned()
        .collect();
    (page, rows.len() as i64)
}

#[derive(Default)]
struct Inner {
    tables: Mutex<Tables>,
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

/// Cheaply cloneable handle to one shared in-process store
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    fn tables(&self) -> AppResult<MutexGuard<'_, Tables>> {
        self.inner
            .tables
            .lock()
            .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))
    }

    async fn acquire(&self, key: LockKey) -> AppResult<RowLock> {
        let lock = {
            let mut locks = self
                .inner
                .locks
                .lock()
                .map_err(|_| AppError::Internal("memory lock table poisoned".to_string()))?;
            locks.entry(key).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        Ok(RowLock {
            inner: self.inner.clone(),
            key,
            guard: Some(guard),
        })
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.inner.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

/// Held row lock, released on drop
struct RowLock {
    inner: Arc<Inner>,
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RowLock {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.inner.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Only the table's handle is left: no unit holds or awaits this row
        if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.key);
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        self.tables().map(|_| ())
    }

    async fn list_authors(&self, paging: Paging) -> AppResult<(Vec<Author>, i64)> {
        Ok(page_of(&self.tables()?.authors, paging))
    }

    async fn get_author(&self, id: i32) -> AppResult<Author> {
        self.tables()?
            .authors
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Author {} not found", id)))
    }

    async fn create_author(&self, data: &CreateAuthor) -> AppResult<Author> {
        let mut tables = self.tables()?;
        let author = Author {
            id: next_id(&mut tables.last_author_id),
            first_name: data.first_name.clone(),
            last_name: data.last_name.clone(),
            biography: data.biography.clone(),
        };
        tables.authors.insert(author.id, author.clone());
        Ok(author)
    }

    async fn update_author(&self, id: i32, data: &UpdateAuthor) -> AppResult<Author> {
        let mut tables = self.tables()?;
        let author = tables
            .authors
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Author {} not found", id)))?;
        author.apply(data);
        Ok(author.clone())
    }

    async fn delete_author(&self, id: i32) -> AppResult<()> {
        let mut tables = self.tables()?;
        if tables.books.values().any(|b| b.author_id == id) {
            return Err(AppError::Conflict(format!(
                "Author {} still has books in the catalog",
                id
            )));
        }
        tables
            .authors
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Author {} not found", id)))
    }

    async fn list_books(&self, paging: Paging) -> AppResult<(Vec<Book>, i64)> {
        Ok(page_of(&self.tables()?.books, paging))
    }

    async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.tables()?
            .books
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", id)))
    }

    async fn create_book(&self, data: &CreateBook) -> AppResult<Book> {
        let mut tables = self.tables()?;
        if !tables.authors.contains_key(&data.author_id) {
            return Err(AppError::UnknownReference(format!(
                "Author {} does not exist",
                data.author_id
            )));
        }
        let book = Book {
            id: next_id(&mut tables.last_book_id),
            title: data.title.clone(),
            author_id: data.author_id,
            isbn: data.isbn.clone(),
            published_date: data.published_date,
            total_copies: data.total_copies,
            available_copies: data.total_copies,
        };
        tables.books.insert(book.id, book.clone());
        Ok(book)
    }

    async fn update_book(&self, id: i32, data: &UpdateBook) -> AppResult<Book> {
        let _lock = self.acquire(LockKey::Book(id)).await?;
        let mut tables = self.tables()?;

        if let Some(author_id) = data.author_id {
            if !tables.authors.contains_key(&author_id) {
                return Err(AppError::UnknownReference(format!(
                    "Author {} does not exist",
                    author_id
                )));
            }
        }

        let book = tables
            .books
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", id)))?;

        if let Some(total) = data.total_copies {
            let (total_copies, available_copies) = book.resized(total)?;
            book.total_copies = total_copies;
            book.available_copies = available_copies;
        }
        if let Some(ref title) = data.title {
            book.title = title.clone();
        }
        if let Some(author_id) = data.author_id {
            book.author_id = author_id;
        }
        if data.isbn.is_some() {
            book.isbn = data.isbn.clone();
        }
        if data.published_date.is_some() {
            book.published_date = data.published_date;
        }
        Ok(book.clone())
    }

    async fn delete_book(&self, id: i32) -> AppResult<()> {
        let _lock = self.acquire(LockKey::Book(id)).await?;
        let mut tables = self.tables()?;
        if tables.loans.values().any(|l| l.book_id == id) {
            return Err(AppError::Conflict(format!("Book {} has loan history", id)));
        }
        tables
            .books
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", id)))
    }

    async fn list_book_listings(&self, offset: i64, limit: i64) -> AppResult<(Vec<BookListing>, i64)> {
        let tables = self.tables()?;
        let listings = tables
            .books
            .values()
            .filter_map(|book| {
                tables.authors.get(&book.author_id).map(|author| BookListing {
                    title: book.title.clone(),
                    author: AuthorName {
                        first_name: author.first_name.clone(),
                        last_name: author.last_name.clone(),
                    },
                })
            })
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((listings, tables.books.len() as i64))
    }

    async fn list_members(&self, paging: Paging) -> AppResult<(Vec<Member>, i64)> {
        Ok(page_of(&self.tables()?.members, paging))
    }

    async fn get_member(&self, id: i32) -> AppResult<Member> {
        self.tables()?
            .members
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Member {} not found", id)))
    }

    async fn create_member(&self, data: &CreateMember) -> AppResult<Member> {
        let mut tables = self.tables()?;
        let member = Member {
            id: next_id(&mut tables.last_member_id),
            first_name: data.first_name.clone(),
            last_name: data.last_name.clone(),
            email: data.email.clone(),
            phone: data.phone.clone(),
            membership_date: data
                .membership_date
                .unwrap_or_else(|| Utc::now().date_naive()),
        };
        tables.members.insert(member.id, member.clone());
        Ok(member)
    }

    async fn update_member(&self, id: i32, data: &UpdateMember) -> AppResult<Member> {
        let mut tables = self.tables()?;
        let member = tables
            .members
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Member {} not found", id)))?;
        member.apply(data);
        Ok(member.clone())
    }

    async fn delete_member(&self, id: i32) -> AppResult<()> {
        let _lock = self.acquire(LockKey::Member(id)).await?;
        let mut tables = self.tables()?;
        if tables.loans.values().any(|l| l.member_id == id) {
            return Err(AppError::Conflict(format!("Member {} has loan history", id)));
        }
        tables
            .members
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Member {} not found", id)))
    }
}

#[async_trait]
impl LoanLedger for MemoryStore {
    async fn get_loan(&self, id: i32) -> AppResult<Loan> {
        self.tables()?
            .loans
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", id)))
    }

    async fn list_loans(&self, query: &LoanQuery) -> AppResult<(Vec<Loan>, i64)> {
        let paging = query.paging()?;
        let tables = self.tables()?;
        let matching: Vec<&Loan> = tables.loans.values().filter(|l| query.matches(l)).collect();
        let total = matching.len() as i64;
        let rows = matching
            .into_iter()
            .skip(paging.offset() as usize)
            .take(paging.limit() as usize)
            .cloned()
            .collect();
        Ok((rows, total))
    }

    async fn overdue_loans(&self, today: NaiveDate) -> AppResult<Vec<Loan>> {
        let mut rows: Vec<Loan> = self
            .tables()?
            .loans
            .values()
            .filter(|l| l.is_overdue(today))
            .cloned()
            .collect();
        rows.sort_by_key(|l| (l.due_date, l.id));
        Ok(rows)
    }

    async fn begin(&self) -> AppResult<Box<dyn LendingUnit>> {
        Ok(Box::new(MemoryUnit {
            store: self.clone(),
            held: HashSet::new(),
            guards: Vec::new(),
            writes: Vec::new(),
        }))
    }
}

/// A write staged by a [`MemoryUnit`]
#[derive(Debug, Clone)]
enum Write {
    AvailableCopies { book_id: i32, available_copies: i32 },
    InsertLoan(Loan),
    Returned { loan_id: i32, return_date: NaiveDate },
    DueDate { loan_id: i32, due_date: NaiveDate },
}

impl Write {
    fn apply_to_book(&self, book: &mut Book) {
        if let Write::AvailableCopies { book_id, available_copies } = self {
            if *book_id == book.id {
                book.available_copies = *available_copies;
            }
        }
    }

    fn apply_to_loan(&self, loan: &mut Loan) {
        match self {
            Write::Returned { loan_id, return_date } if *loan_id == loan.id => {
                loan.is_returned = true;
                loan.return_date = Some(*return_date);
            }
            Write::DueDate { loan_id, due_date } if *loan_id == loan.id => {
                loan.due_date = *due_date;
            }
            _ => {}
        }
    }

    fn commit(self, tables: &mut Tables) {
        match self {
            Write::InsertLoan(loan) => {
                tables.loans.insert(loan.id, loan);
            }
            Write::AvailableCopies { book_id, .. } => {
                if let Some(book) = tables.books.get_mut(&book_id) {
                    self.apply_to_book(book);
                }
            }
            Write::Returned { loan_id, .. } | Write::DueDate { loan_id, .. } => {
                if let Some(loan) = tables.loans.get_mut(&loan_id) {
                    self.apply_to_loan(loan);
                }
            }
        }
    }
}

/// Lending unit of work over a [`MemoryStore`]
pub struct MemoryUnit {
    store: MemoryStore,
    held: HashSet<LockKey>,
    guards: Vec<RowLock>,
    writes: Vec<Write>,
}

impl MemoryUnit {
    async fn hold(&mut self, key: LockKey) -> AppResult<()> {
        if self.held.insert(key) {
            let guard = self.store.acquire(key).await?;
            self.guards.push(guard);
        }
        Ok(())
    }

    fn book_view(&self, tables: &Tables, book_id: i32) -> Option<Book> {
        let mut book = tables.books.get(&book_id).cloned()?;
        for write in &self.writes {
            write.apply_to_book(&mut book);
        }
        Some(book)
    }

    fn loan_view(&self, tables: &Tables, loan_id: i32) -> Option<Loan> {
        let mut loan = tables.loans.get(&loan_id).cloned();
        for write in &self.writes {
            if let Write::InsertLoan(inserted) = write {
                if inserted.id == loan_id {
                    loan = Some(inserted.clone());
                }
                continue;
            }
            if let Some(current) = loan.as_mut() {
                write.apply_to_loan(current);
            }
        }
        loan
    }
}

#[async_trait]
impl LendingUnit for MemoryUnit {
    async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<Book>> {
        self.hold(LockKey::Book(book_id)).await?;
        let tables = self.store.tables()?;
        Ok(self.book_view(&tables, book_id))
    }

    async fn member_exists(&mut self, member_id: i32) -> AppResult<bool> {
        self.hold(LockKey::Member(member_id)).await?;
        Ok(self.store.tables()?.members.contains_key(&member_id))
    }

    async fn set_available_copies(&mut self, book_id: i32, available_copies: i32) -> AppResult<()> {
        let book = {
            let tables = self.store.tables()?;
            self.book_view(&tables, book_id)
        }
        .ok_or_else(|| AppError::NotFound(format!("Book {} not found", book_id)))?;

        // Mirrors the CHECK constraint on the books table
        if available_copies < 0 || available_copies > book.total_copies {
            return Err(AppError::CorruptState(format!(
                "available_copies {} outside 0..={} for book {}",
                available_copies, book.total_copies, book_id
            )));
        }
        self.writes.push(Write::AvailableCopies { book_id, available_copies });
        Ok(())
    }

    async fn insert_loan(&mut self, loan: &NewLoan) -> AppResult<Loan> {
        let id = next_id(&mut self.store.tables()?.last_loan_id);
        let loan = Loan {
            id,
            book_id: loan.book_id,
            member_id: loan.member_id,
            loan_date: loan.loan_date,
            due_date: loan.due_date,
            is_returned: false,
            return_date: None,
        };
        self.writes.push(Write::InsertLoan(loan.clone()));
        Ok(loan)
    }

    async fn active_loans(&mut self, book_id: i32, member_id: i32) -> AppResult<Vec<Loan>> {
        let tables = self.store.tables()?;
        let staged = self.writes.iter().filter_map(|w| match w {
            Write::InsertLoan(loan) => Some(loan.id),
            _ => None,
        });
        let ids: Vec<i32> = tables.loans.keys().copied().chain(staged).collect();

        let mut active: Vec<Loan> = ids
            .into_iter()
            .filter_map(|id| self.loan_view(&tables, id))
            .filter(|l| l.book_id == book_id && l.member_id == member_id && l.is_active())
            .collect();
        active.sort_by(|a, b| (b.loan_date, b.id).cmp(&(a.loan_date, a.id)));
        Ok(active)
    }

    async fn mark_returned(&mut self, loan_id: i32, return_date: NaiveDate) -> AppResult<Loan> {
        self.hold(LockKey::Loan(loan_id)).await?;
        let loan = {
            let tables = self.store.tables()?;
            self.loan_view(&tables, loan_id)
        }
        .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", loan_id)))?;

        if loan.is_returned {
            return Err(AppError::LoanAlreadyReturned { loan_id });
        }
        let write = Write::Returned { loan_id, return_date };
        let mut returned = loan;
        write.apply_to_loan(&mut returned);
        self.writes.push(write);
        Ok(returned)
    }

    async fn lock_loan(&mut self, loan_id: i32) -> AppResult<Option<Loan>> {
        self.hold(LockKey::Loan(loan_id)).await?;
        let tables = self.store.tables()?;
        Ok(self.loan_view(&tables, loan_id))
    }

    async fn set_due_date(&mut self, loan_id: i32, due_date: NaiveDate) -> AppResult<Loan> {
        let mut loan = {
            let tables = self.store.tables()?;
            self.loan_view(&tables, loan_id)
        }
        .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", loan_id)))?;

        let write = Write::DueDate { loan_id, due_date };
        write.apply_to_loan(&mut loan);
        self.writes.push(write);
        Ok(loan)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryUnit { store, writes, guards, .. } = *self;
        {
            let mut tables = store.tables()?;
            for write in writes {
                write.commit(&mut tables);
            }
        }
        drop(guards);
        Ok(())
    }
}

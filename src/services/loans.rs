//! Loan management service
//!
//! Every transition runs inside one [`LendingUnit`]: the book (or loan) is
//! locked first, rules are checked against the locked row, and the counter
//! update and loan write commit together. Any early return drops the unit,
//! which rolls it back.

use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};

use super::tasks::{Task, TaskQueue};
use crate::{
    config::LoansConfig,
    error::{AppError, AppResult},
    models::{loan::LoanQuery, Loan, NewLoan},
    repository::Repository,
};

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[derive(Clone)]
pub struct LoansService {
    repository: Repository,
    queue: Arc<dyn TaskQueue>,
    config: LoansConfig,
}

impl LoansService {
    pub fn new(repository: Repository, queue: Arc<dyn TaskQueue>, config: LoansConfig) -> Self {
        Self {
            repository,
            queue,
            config,
        }
    }

    /// Lend one copy of a book to a member
    pub async fn create_loan(&self, book_id: i32, member_id: i32) -> AppResult<Loan> {
        let mut unit = self.repository.loans.begin().await?;

        let book = unit
            .lock_book(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", book_id)))?;

        if !unit.member_exists(member_id).await? {
            return Err(AppError::UnknownReference(format!(
                "Member {} does not exist",
                member_id
            )));
        }

        if book.available_copies < 1 {
            return Err(AppError::NoCopiesAvailable { book_id });
        }

        let loan_date = today();
        let due_date = loan_date
            .checked_add_days(Days::new(u64::from(self.config.loan_period_days)))
            .ok_or_else(|| AppError::InvalidArgument("Loan period overflows the calendar".to_string()))?;

        unit.set_available_copies(book_id, book.available_copies - 1).await?;
        let loan = unit
            .insert_loan(&NewLoan {
                book_id,
                member_id,
                loan_date,
                due_date,
            })
            .await?;
        unit.commit().await?;

        tracing::info!(
            loan_id = loan.id,
            book_id,
            member_id,
            due_date = %loan.due_date,
            "Loan created"
        );

        if let Err(e) = self.queue.enqueue(Task::LoanCreated { loan_id: loan.id }) {
            tracing::warn!(loan_id = loan.id, error = %e, "Failed to enqueue loan notification");
        }

        Ok(loan)
    }

    /// Close the member's active loan on a book and put the copy back
    pub async fn return_loan(&self, book_id: i32, member_id: i32) -> AppResult<Loan> {
        let mut unit = self.repository.loans.begin().await?;

        let book = unit
            .lock_book(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", book_id)))?;

        let active = unit.active_loans(book_id, member_id).await?;
        let Some(current) = active.first() else {
            return Err(AppError::NoActiveLoan { book_id, member_id });
        };
        if active.len() > 1 {
            let duplicates: Vec<i32> = active[1..].iter().map(|loan| loan.id).collect();
            tracing::warn!(
                book_id,
                member_id,
                closing = current.id,
                ?duplicates,
                "Member holds several active loans on the same book"
            );
        }

        if book.available_copies >= book.total_copies {
            let err = AppError::CorruptState(format!(
                "Book {} already has all {} copies available while loan {} is active",
                book_id, book.total_copies, current.id
            ));
            tracing::error!(book_id, loan_id = current.id, error = %err, "Return rolled back");
            return Err(err);
        }

        let loan = unit.mark_returned(current.id, today()).await?;
        unit.set_available_copies(book_id, book.available_copies + 1).await?;
        unit.commit().await?;

        tracing::info!(loan_id = loan.id, book_id, member_id, "Loan returned");
        Ok(loan)
    }

    /// Push an active loan's due date back by whole days
    pub async fn extend_due_date(&self, loan_id: i32, additional_days: i64) -> AppResult<Loan> {
        if additional_days <= 0 {
            return Err(AppError::InvalidArgument(
                "additional_days must be a positive number".to_string(),
            ));
        }

        let mut unit = self.repository.loans.begin().await?;

        let loan = unit
            .lock_loan(loan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", loan_id)))?;

        if loan.is_returned {
            return Err(AppError::LoanAlreadyReturned { loan_id });
        }

        let due_date = loan
            .due_date
            .checked_add_days(Days::new(additional_days as u64))
            .ok_or_else(|| AppError::InvalidArgument("Extended due date overflows the calendar".to_string()))?;

        let updated = unit.set_due_date(loan_id, due_date).await?;
        unit.commit().await?;

        tracing::info!(
            loan_id,
            previous = %loan.due_date,
            due_date = %updated.due_date,
            "Loan due date extended"
        );
        Ok(updated)
    }

    pub async fn get_loan(&self, loan_id: i32) -> AppResult<Loan> {
        self.repository.loans.get_loan(loan_id).await
    }

    pub async fn list_loans(&self, query: &LoanQuery) -> AppResult<(Vec<Loan>, i64)> {
        self.repository.loans.list_loans(query).await
    }

    /// Active loans due before `today`
    pub async fn overdue_loans(&self, today: NaiveDate) -> AppResult<Vec<Loan>> {
        self.repository.loans.overdue_loans(today).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{tasks::MockTaskQueue, testing::Fixture};

    fn accepting_queue() -> MockTaskQueue {
        let mut queue = MockTaskQueue::new();
        queue.expect_enqueue().returning(|_| Ok(()));
        queue
    }

    fn service(fixture: &Fixture) -> LoansService {
        LoansService::new(
            fixture.repository.clone(),
            Arc::new(accepting_queue()),
            LoansConfig::default(),
        )
    }

    async fn available(fixture: &Fixture) -> i32 {
        fixture
            .repository
            .catalog
            .get_book(fixture.book.id)
            .await
            .unwrap()
            .available_copies
    }

    async fn active_count(fixture: &Fixture) -> i64 {
        let query = LoanQuery {
            book_id: Some(fixture.book.id),
            active: Some(true),
            ..Default::default()
        };
        fixture.repository.loans.list_loans(&query).await.unwrap().1
    }

    #[tokio::test]
    async fn last_copy_goes_to_the_first_borrower() {
        let fixture = Fixture::new(1).await;
        let other = fixture.add_member("grace@example.org").await;
        let service = service(&fixture);

        let loan = service.create_loan(fixture.book.id, fixture.member.id).await.unwrap();
        assert_eq!(loan.loan_date, today());
        assert_eq!(loan.due_date, today() + Days::new(14));
        assert!(!loan.is_returned);
        assert_eq!(available(&fixture).await, 0);

        let err = service.create_loan(fixture.book.id, other.id).await.unwrap_err();
        assert!(matches!(err, AppError::NoCopiesAvailable { book_id } if book_id == fixture.book.id));
        assert_eq!(available(&fixture).await, 0);

        let err = service.return_loan(fixture.book.id, other.id).await.unwrap_err();
        assert!(matches!(err, AppError::NoActiveLoan { .. }));
        assert_eq!(available(&fixture).await, 0);
    }

    #[tokio::test]
    async fn borrow_and_return_restores_the_book() {
        let fixture = Fixture::new(2).await;
        let service = service(&fixture);

        let loan = service.create_loan(fixture.book.id, fixture.member.id).await.unwrap();
        assert_eq!(available(&fixture).await, 1);

        let returned = service.return_loan(fixture.book.id, fixture.member.id).await.unwrap();
        assert_eq!(returned.id, loan.id);
        assert!(returned.is_returned);
        assert_eq!(returned.return_date, Some(today()));
        assert_eq!(returned.due_date, loan.due_date);
        assert_eq!(available(&fixture).await, 2);
        assert_eq!(active_count(&fixture).await, 0);

        let err = service.return_loan(fixture.book.id, fixture.member.id).await.unwrap_err();
        assert!(matches!(err, AppError::NoActiveLoan { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_borrowers_never_oversubscribe() {
        const COPIES: i32 = 3;
        const BORROWERS: usize = 12;

        let fixture = Fixture::new(COPIES).await;
        let mut members = Vec::new();
        for i in 0..BORROWERS {
            members.push(fixture.add_member(&format!("reader{}@example.org", i)).await);
        }
        let service = service(&fixture);

        let mut tasks = tokio::task::JoinSet::new();
        for member in members {
            let service = service.clone();
            let book_id = fixture.book.id;
            tasks.spawn(async move { service.create_loan(book_id, member.id).await });
        }

        let (mut granted, mut refused) = (0, 0);
        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap() {
                Ok(_) => granted += 1,
                Err(AppError::NoCopiesAvailable { .. }) => refused += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(granted, COPIES as usize);
        assert_eq!(refused, BORROWERS - COPIES as usize);
        assert_eq!(available(&fixture).await, 0);
        assert_eq!(active_count(&fixture).await, i64::from(COPIES));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn interleaved_loans_and_returns_keep_counts_consistent() {
        let fixture = Fixture::new(2).await;
        let mut members = Vec::new();
        for i in 0..6 {
            members.push(fixture.add_member(&format!("cycle{}@example.org", i)).await);
        }
        let service = service(&fixture);

        let mut tasks = tokio::task::JoinSet::new();
        for member in members {
            let service = service.clone();
            let book_id = fixture.book.id;
            tasks.spawn(async move {
                for _ in 0..5 {
                    if service.create_loan(book_id, member.id).await.is_ok() {
                        tokio::task::yield_now().await;
                        service.return_loan(book_id, member.id).await.unwrap();
                    }
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let book = fixture.repository.catalog.get_book(fixture.book.id).await.unwrap();
        assert_eq!(i64::from(book.total_copies - book.available_copies), active_count(&fixture).await);
        assert_eq!(book.available_copies, 2);
    }

    #[tokio::test]
    async fn extension_moves_only_the_due_date() {
        let fixture = Fixture::new(1).await;
        let service = service(&fixture);
        let loan = service.create_loan(fixture.book.id, fixture.member.id).await.unwrap();

        let extended = service.extend_due_date(loan.id, 5).await.unwrap();
        assert_eq!(extended.due_date, loan.due_date + Days::new(5));
        assert_eq!(extended.loan_date, loan.loan_date);
        assert_eq!(extended.book_id, loan.book_id);
        assert!(!extended.is_returned);
        assert_eq!(available(&fixture).await, 0);
    }

    #[tokio::test]
    async fn extension_rejects_bad_input_and_closed_loans() {
        let fixture = Fixture::new(1).await;
        let service = service(&fixture);
        let loan = service.create_loan(fixture.book.id, fixture.member.id).await.unwrap();

        for days in [0, -3] {
            let err = service.extend_due_date(loan.id, days).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidArgument(_)));
        }
        assert!(matches!(
            service.extend_due_date(9999, 5).await.unwrap_err(),
            AppError::NotFound(_)
        ));

        service.return_loan(fixture.book.id, fixture.member.id).await.unwrap();
        let err = service.extend_due_date(loan.id, 5).await.unwrap_err();
        assert!(matches!(err, AppError::LoanAlreadyReturned { loan_id } if loan_id == loan.id));
        assert_eq!(service.get_loan(loan.id).await.unwrap().due_date, loan.due_date);
    }

    #[tokio::test]
    async fn return_closes_the_most_recent_duplicate() {
        let fixture = Fixture::new(3).await;
        let older = fixture.lend_on(today() - Days::new(3)).await;
        let newer = fixture.lend_on(today() - Days::new(1)).await;
        let service = service(&fixture);

        let returned = service.return_loan(fixture.book.id, fixture.member.id).await.unwrap();
        assert_eq!(returned.id, newer.id);
        assert!(service.get_loan(older.id).await.unwrap().is_active());
        assert_eq!(available(&fixture).await, 2);
    }

    #[tokio::test]
    async fn return_refuses_to_overfill_the_shelf() {
        let fixture = Fixture::new(1).await;
        // A loan recorded without taking a copy off the shelf
        let stray = fixture.insert_loan_only(today()).await;
        let service = service(&fixture);

        let err = service.return_loan(fixture.book.id, fixture.member.id).await.unwrap_err();
        assert!(matches!(err, AppError::CorruptState(_)));

        assert_eq!(available(&fixture).await, 1);
        assert!(service.get_loan(stray.id).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn queue_failure_keeps_the_loan() {
        let fixture = Fixture::new(1).await;
        let mut queue = MockTaskQueue::new();
        queue
            .expect_enqueue()
            .times(1)
            .returning(|_| Err(AppError::Queue("task queue is full".into())));
        let service = LoansService::new(fixture.repository.clone(), Arc::new(queue), LoansConfig::default());

        let loan = service.create_loan(fixture.book.id, fixture.member.id).await.unwrap();
        assert!(service.get_loan(loan.id).await.unwrap().is_active());
        assert_eq!(available(&fixture).await, 0);
    }

    #[tokio::test]
    async fn loan_creation_enqueues_a_notification() {
        let fixture = Fixture::new(1).await;
        let mut queue = MockTaskQueue::new();
        queue
            .expect_enqueue()
            .withf(|task| matches!(task, Task::LoanCreated { .. }))
            .times(1)
            .returning(|_| Ok(()));
        let service = LoansService::new(fixture.repository.clone(), Arc::new(queue), LoansConfig::default());

        service.create_loan(fixture.book.id, fixture.member.id).await.unwrap();
    }

    #[tokio::test]
    async fn missing_book_and_member_are_reported_separately() {
        let fixture = Fixture::new(1).await;
        let service = service(&fixture);

        let err = service.create_loan(9999, fixture.member.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = service.create_loan(fixture.book.id, 9999).await.unwrap_err();
        assert!(matches!(err, AppError::UnknownReference(_)));
        assert_eq!(available(&fixture).await, 1);

        let err = service.return_loan(9999, fixture.member.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn configured_loan_period_sets_due_date() {
        let fixture = Fixture::new(1).await;
        let service = LoansService::new(
            fixture.repository.clone(),
            Arc::new(accepting_queue()),
            LoansConfig { loan_period_days: 21 },
        );

        let loan = service.create_loan(fixture.book.id, fixture.member.id).await.unwrap();
        assert_eq!(loan.due_date, loan.loan_date + Days::new(21));
    }

    #[tokio::test]
    async fn overdue_loans_are_ordered_by_due_date() {
        let fixture = Fixture::new(3).await;
        let recent = fixture.lend_on(today() - Days::new(15)).await;
        let oldest = fixture.lend_on(today() - Days::new(30)).await;
        fixture.lend_on(today()).await;
        let service = service(&fixture);

        let overdue = service.overdue_loans(today()).await.unwrap();
        let ids: Vec<i32> = overdue.iter().map(|loan| loan.id).collect();
        assert_eq!(ids, vec![oldest.id, recent.id]);
    }
}

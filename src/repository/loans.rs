//! Loans repository for database operations

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Pool, Postgres, Transaction};

use super::{LendingUnit, LoanLedger};
use crate::{
    error::{AppError, AppResult},
    models::{loan::LoanQuery, Book, Loan, NewLoan},
};

#[derive(Clone)]
pub struct PgLoanLedger {
    pool: Pool<Postgres>,
}

impl PgLoanLedger {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LoanLedger for PgLoanLedger {
    async fn get_loan(&self, id: i32) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", id)))
    }

    async fn list_loans(&self, query: &LoanQuery) -> AppResult<(Vec<Loan>, i64)> {
        let paging = query.paging()?;

        // NULL parameters disable their filter
        let where_clause = r#"
            WHERE ($1::int IS NULL OR book_id = $1)
              AND ($2::int IS NULL OR member_id = $2)
              AND ($3::bool IS NULL OR is_returned <> $3)
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM loans {}", where_clause))
            .bind(query.book_id)
            .bind(query.member_id)
            .bind(query.active)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, Loan>(&format!(
            "SELECT * FROM loans {} ORDER BY id LIMIT $4 OFFSET $5",
            where_clause
        ))
        .bind(query.book_id)
        .bind(query.member_id)
        .bind(query.active)
        .bind(paging.limit())
        .bind(paging.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok((rows, total))
    }

    async fn overdue_loans(&self, today: NaiveDate) -> AppResult<Vec<Loan>> {
        let rows = sqlx::query_as::<_, Loan>(
            r#"
            SELECT * FROM loans
            WHERE is_returned = FALSE AND due_date < $1
            ORDER BY due_date, id
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn begin(&self) -> AppResult<Box<dyn LendingUnit>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLendingUnit { tx }))
    }
}

/// Lending unit of work over a Postgres transaction.
///
/// Row locks come from `SELECT ... FOR UPDATE`; dropping the transaction
/// without commit rolls it back.
pub struct PgLendingUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LendingUnit for PgLendingUnit {
    async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1 FOR UPDATE")
            .bind(book_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(book)
    }

    async fn member_exists(&mut self, member_id: i32) -> AppResult<bool> {
        // KEY SHARE keeps the member from being deleted until commit
        let id: Option<i32> = sqlx::query_scalar("SELECT id FROM members WHERE id = $1 FOR KEY SHARE")
            .bind(member_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(id.is_some())
    }

    async fn set_available_copies(&mut self, book_id: i32, available_copies: i32) -> AppResult<()> {
        let result = sqlx::query("UPDATE books SET available_copies = $1 WHERE id = $2")
            .bind(available_copies)
            .bind(book_id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Book {} not found", book_id)));
        }
        Ok(())
    }

    async fn insert_loan(&mut self, loan: &NewLoan) -> AppResult<Loan> {
        let row = sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (book_id, member_id, loan_date, due_date, is_returned)
            VALUES ($1, $2, $3, $4, FALSE)
            RETURNING *
            "#,
        )
        .bind(loan.book_id)
        .bind(loan.member_id)
        .bind(loan.loan_date)
        .bind(loan.due_date)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn active_loans(&mut self, book_id: i32, member_id: i32) -> AppResult<Vec<Loan>> {
        let rows = sqlx::query_as::<_, Loan>(
            r#"
            SELECT * FROM loans
            WHERE book_id = $1 AND member_id = $2 AND is_returned = FALSE
            ORDER BY loan_date DESC, id DESC
            FOR UPDATE
            "#,
        )
        .bind(book_id)
        .bind(member_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn mark_returned(&mut self, loan_id: i32, return_date: NaiveDate) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans SET is_returned = TRUE, return_date = $1
            WHERE id = $2 AND is_returned = FALSE
            RETURNING *
            "#,
        )
        .bind(return_date)
        .bind(loan_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(AppError::LoanAlreadyReturned { loan_id })
    }

    async fn lock_loan(&mut self, loan_id: i32) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1 FOR UPDATE")
            .bind(loan_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(loan)
    }

    async fn set_due_date(&mut self, loan_id: i32, due_date: NaiveDate) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>("UPDATE loans SET due_date = $1 WHERE id = $2 RETURNING *")
            .bind(due_date)
            .bind(loan_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", loan_id)))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

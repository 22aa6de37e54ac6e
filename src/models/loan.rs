//! Loan model and related types

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

use super::Paging;
use crate::error::AppResult;

/// Loan record from database. Loans are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Loan {
    pub id: i32,
    pub book_id: i32,
    pub member_id: i32,
    pub loan_date: NaiveDate,
    pub due_date: NaiveDate,
    pub is_returned: bool,
    /// Set exactly when `is_returned` is true
    pub return_date: Option<NaiveDate>,
}

impl Loan {
    pub fn is_active(&self) -> bool {
        !self.is_returned
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.is_active() && self.due_date < today
    }
}

/// Values for a loan about to be inserted
#[derive(Debug, Clone)]
pub struct NewLoan {
    pub book_id: i32,
    pub member_id: i32,
    pub loan_date: NaiveDate,
    pub due_date: NaiveDate,
}

/// Loan list filters
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoanQuery {
    pub book_id: Option<i32>,
    pub member_id: Option<i32>,
    /// Only active (true) or only returned (false) loans
    pub active: Option<bool>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl LoanQuery {
    pub fn paging(&self) -> AppResult<Paging> {
        Paging::new(self.page, self.per_page)
    }

    pub fn matches(&self, loan: &Loan) -> bool {
        self.book_id.map_or(true, |id| loan.book_id == id)
            && self.member_id.map_or(true, |id| loan.member_id == id)
            && self.active.map_or(true, |active| loan.is_active() == active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loan(due: NaiveDate, returned: bool) -> Loan {
        Loan {
            id: 1,
            book_id: 2,
            member_id: 3,
            loan_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            due_date: due,
            is_returned: returned,
            return_date: returned.then(|| NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()),
        }
    }

    #[test]
    fn overdue_only_when_active_and_past_due() {
        let due = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        assert!(loan(due, false).is_overdue(today));
        assert!(!loan(due, true).is_overdue(today));
        assert!(!loan(due, false).is_overdue(due));
    }

    #[test]
    fn query_filters() {
        let l = loan(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(), false);
        assert!(LoanQuery::default().matches(&l));
        assert!(LoanQuery { book_id: Some(2), active: Some(true), ..Default::default() }.matches(&l));
        assert!(!LoanQuery { member_id: Some(4), ..Default::default() }.matches(&l));
        assert!(!LoanQuery { active: Some(false), ..Default::default() }.matches(&l));
    }
}

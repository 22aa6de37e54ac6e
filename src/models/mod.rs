//! Data models for Lending Desk

pub mod author;
pub mod book;
pub mod loan;
pub mod member;

use serde::Deserialize;
use utoipa::IntoParams;

use crate::error::{AppError, AppResult};

// Re-export commonly used types
pub use author::Author;
pub use book::{Book, BookListing, BookPage};
pub use loan::{Loan, NewLoan};
pub use member::Member;

const DEFAULT_PER_PAGE: i64 = 50;
const MAX_PER_PAGE: i64 = 200;

/// Row offset of a 1-based page, `None` when it does not fit in an `i64`
pub fn window_offset(page: i64, page_size: i64) -> Option<i64> {
    page.checked_sub(1)?.checked_mul(page_size)
}

/// Page parameters of the administrative list endpoints
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Page number (default: 1)
    pub page: Option<i64>,
    /// Rows per page (default: 50)
    pub per_page: Option<i64>,
}

impl ListQuery {
    pub fn paging(&self) -> AppResult<Paging> {
        Paging::new(self.page, self.per_page)
    }
}

/// Validated page window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page: i64,
    pub per_page: i64,
}

impl Paging {
    pub fn new(page: Option<i64>, per_page: Option<i64>) -> AppResult<Self> {
        let page = page.unwrap_or(1);
        let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE);
        if page < 1 {
            return Err(AppError::InvalidArgument("page must be at least 1".to_string()));
        }
        if !(1..=MAX_PER_PAGE).contains(&per_page) {
            return Err(AppError::InvalidArgument(format!(
                "per_page must be between 1 and {}",
                MAX_PER_PAGE
            )));
        }
        if window_offset(page, per_page).is_none() {
            return Err(AppError::InvalidArgument(format!("page {} is out of range", page)));
        }
        Ok(Self { page, per_page })
    }

    pub fn offset(&self) -> i64 {
        window_offset(self.page, self.per_page).unwrap_or(i64::MAX)
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }
}

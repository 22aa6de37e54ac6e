//! Book model, copy accounting and the listing projection

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Book record from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author_id: i32,
    pub isbn: Option<String>,
    pub published_date: Option<NaiveDate>,
    pub total_copies: i32,
    /// Always within `0..=total_copies`
    pub available_copies: i32,
}

impl Book {
    /// Copies currently out on loan
    pub fn on_loan(&self) -> i32 {
        self.total_copies - self.available_copies
    }

    /// New `(total, available)` pair after changing the number of owned copies.
    ///
    /// Copies on loan stay on loan, so the available count moves by the same
    /// delta as the total.
    pub fn resized(&self, total_copies: i32) -> AppResult<(i32, i32)> {
        let on_loan = self.on_loan();
        if total_copies < on_loan {
            return Err(AppError::InvalidArgument(format!(
                "Book {} has {} copies on loan, total_copies cannot drop to {}",
                self.id, on_loan, total_copies
            )));
        }
        Ok((total_copies, total_copies - on_loan))
    }
}

/// Create book request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, message = "Title must not be empty"))]
    pub title: String,
    pub author_id: i32,
    pub isbn: Option<String>,
    pub published_date: Option<NaiveDate>,
    #[validate(range(min = 0, message = "total_copies must not be negative"))]
    pub total_copies: i32,
}

/// Update book request
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1, message = "Title must not be empty"))]
    pub title: Option<String>,
    pub author_id: Option<i32>,
    pub isbn: Option<String>,
    pub published_date: Option<NaiveDate>,
    #[validate(range(min = 0, message = "total_copies must not be negative"))]
    pub total_copies: Option<i32>,
}

/// Author name as shown in book listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthorName {
    pub first_name: String,
    pub last_name: String,
}

/// Public listing projection of a book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BookListing {
    pub title: String,
    pub author: AuthorName,
}

/// Flat row of the listing join
#[derive(Debug, FromRow)]
pub struct BookListingRow {
    pub title: String,
    pub first_name: String,
    pub last_name: String,
}

impl From<BookListingRow> for BookListing {
    fn from(row: BookListingRow) -> Self {
        Self {
            title: row.title,
            author: AuthorName {
                first_name: row.first_name,
                last_name: row.last_name,
            },
        }
    }
}

/// One rendered page of the book listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BookPage {
    /// Total number of books
    pub count: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub next: Option<i64>,
    pub previous: Option<i64>,
    pub results: Vec<BookListing>,
}

impl BookPage {
    pub fn new(results: Vec<BookListing>, count: i64, page: i64, page_size: i64) -> Self {
        let total_pages = total_pages(count, page_size);
        Self {
            count,
            page,
            page_size,
            total_pages,
            next: (page < total_pages).then_some(page + 1),
            previous: (page > 1).then_some(page - 1),
            results,
        }
    }
}

/// Number of pages for `count` rows, an empty listing still has one page
pub fn total_pages(count: i64, page_size: i64) -> i64 {
    if count <= 0 {
        1
    } else {
        (count + page_size - 1) / page_size
    }
}

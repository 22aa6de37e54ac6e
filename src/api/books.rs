//! Book endpoints: catalog CRUD, lending transitions and the cached listing

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{PaginatedBooks, PaginatedResponse, StatusResponse};
use crate::{
    error::AppResult,
    models::{
        book::{CreateBook, UpdateBook},
        Book, BookPage, ListQuery,
    },
    AppState,
};

/// Member performing a loan or a return
#[derive(Deserialize, ToSchema)]
pub struct MemberRequest {
    pub member_id: i32,
}

#[derive(Serialize, ToSchema)]
pub struct LoanCreatedResponse {
    pub status: String,
    pub loan_id: i32,
    pub due_date: NaiveDate,
}

/// Listing page parameters
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListingQuery {
    /// Page number (default: 1)
    pub page: Option<i64>,
    /// Books per page (default: 10)
    pub page_size: Option<i64>,
}

/// List books with full copy accounting
#[utoipa::path(
    get,
    path = "/books",
    tag = "books",
    params(ListQuery),
    responses(
        (status = 200, description = "List of books", body = PaginatedBooks),
        (status = 400, description = "Invalid page parameters")
    )
)]
pub async fn list_books(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<PaginatedResponse<Book>>> {
    let paging = query.paging()?;
    let (books, total) = state.services.catalog.list_books(paging).await?;
    Ok(Json(PaginatedResponse::new(books, total, paging)))
}

/// Cached listing of titles and author names
#[utoipa::path(
    get,
    path = "/books/list",
    tag = "books",
    params(ListingQuery),
    responses(
        (status = 200, description = "Page of book listings", body = BookPage),
        (status = 400, description = "Invalid page parameters"),
        (status = 404, description = "Page past the end of the catalog")
    )
)]
pub async fn list_book_page(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> AppResult<Response> {
    let rendered = state
        .services
        .listing
        .list_books(query.page, query.page_size)
        .await?;
    // Served verbatim so cache hits are byte-identical
    Ok(([(header::CONTENT_TYPE, "application/json")], rendered).into_response())
}

/// Get book by ID
#[utoipa::path(
    get,
    path = "/books/{id}",
    tag = "books",
    params(("id" = i32, Path, description = "Book ID")),
    responses(
        (status = 200, description = "Book details", body = Book),
        (status = 404, description = "Book not found")
    )
)]
pub async fn get_book(State(state): State<AppState>, Path(id): Path<i32>) -> AppResult<Json<Book>> {
    let book = state.services.catalog.get_book(id).await?;
    Ok(Json(book))
}

/// Create a book, every copy starts available
#[utoipa::path(
    post,
    path = "/books",
    tag = "books",
    request_body = CreateBook,
    responses(
        (status = 201, description = "Book created", body = Book),
        (status = 400, description = "Invalid input or unknown author")
    )
)]
pub async fn create_book(
    State(state): State<AppState>,
    Json(data): Json<CreateBook>,
) -> AppResult<(StatusCode, Json<Book>)> {
    let book = state.services.catalog.create_book(data).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

/// Update a book
#[utoipa::path(
    put,
    path = "/books/{id}",
    tag = "books",
    params(("id" = i32, Path, description = "Book ID")),
    request_body = UpdateBook,
    responses(
        (status = 200, description = "Book updated", body = Book),
        (status = 400, description = "Invalid input, unknown author or too few copies"),
        (status = 404, description = "Book not found")
    )
)]
pub async fn update_book(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(data): Json<UpdateBook>,
) -> AppResult<Json<Book>> {
    let book = state.services.catalog.update_book(id, data).await?;
    Ok(Json(book))
}

/// Delete a book without loan history
#[utoipa::path(
    delete,
    path = "/books/{id}",
    tag = "books",
    params(("id" = i32, Path, description = "Book ID")),
    responses(
        (status = 204, description = "Book deleted"),
        (status = 404, description = "Book not found"),
        (status = 409, description = "Book has loan history")
    )
)]
pub async fn delete_book(State(state): State<AppState>, Path(id): Path<i32>) -> AppResult<StatusCode> {
    state.services.catalog.delete_book(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Lend a copy of the book to a member
#[utoipa::path(
    post,
    path = "/books/{id}/loan",
    tag = "loans",
    params(("id" = i32, Path, description = "Book ID")),
    request_body = MemberRequest,
    responses(
        (status = 201, description = "Book loaned", body = LoanCreatedResponse),
        (status = 400, description = "No copies available or unknown member", body = crate::error::ErrorResponse),
        (status = 404, description = "Book not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn loan_book(
    State(state): State<AppState>,
    Path(book_id): Path<i32>,
    Json(request): Json<MemberRequest>,
) -> AppResult<(StatusCode, Json<LoanCreatedResponse>)> {
    let loan = state
        .services
        .loans
        .create_loan(book_id, request.member_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(LoanCreatedResponse {
            status: "Book loaned successfully.".to_string(),
            loan_id: loan.id,
            due_date: loan.due_date,
        }),
    ))
}

/// Return the member's copy of the book
#[utoipa::path(
    post,
    path = "/books/{id}/return_book",
    tag = "loans",
    params(("id" = i32, Path, description = "Book ID")),
    request_body = MemberRequest,
    responses(
        (status = 200, description = "Book returned", body = StatusResponse),
        (status = 400, description = "No active loan", body = crate::error::ErrorResponse),
        (status = 404, description = "Book not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn return_book(
    State(state): State<AppState>,
    Path(book_id): Path<i32>,
    Json(request): Json<MemberRequest>,
) -> AppResult<Json<StatusResponse>> {
    state
        .services
        .loans
        .return_loan(book_id, request.member_id)
        .await?;

    Ok(Json(StatusResponse {
        status: "Book returned successfully.".to_string(),
    }))
}

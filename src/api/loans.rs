//! Loan management endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{PaginatedLoans, PaginatedResponse};
use crate::{
    error::AppResult,
    models::{loan::LoanQuery, Loan},
    AppState,
};

#[derive(Deserialize, ToSchema)]
pub struct ExtendDueDateRequest {
    /// Whole days to add, must be positive
    pub additional_days: i64,
}

#[derive(Serialize, ToSchema)]
pub struct ExtendDueDateResponse {
    pub status: String,
    pub due_date: NaiveDate,
}

/// List loans
#[utoipa::path(
    get,
    path = "/loans",
    tag = "loans",
    params(LoanQuery),
    responses(
        (status = 200, description = "List of loans", body = PaginatedLoans),
        (status = 400, description = "Invalid page parameters")
    )
)]
pub async fn list_loans(
    State(state): State<AppState>,
    Query(query): Query<LoanQuery>,
) -> AppResult<Json<PaginatedResponse<Loan>>> {
    let paging = query.paging()?;
    let (loans, total) = state.services.loans.list_loans(&query).await?;
    Ok(Json(PaginatedResponse::new(loans, total, paging)))
}

/// Get loan by ID
#[utoipa::path(
    get,
    path = "/loans/{id}",
    tag = "loans",
    params(("id" = i32, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Loan details", body = Loan),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan(State(state): State<AppState>, Path(id): Path<i32>) -> AppResult<Json<Loan>> {
    let loan = state.services.loans.get_loan(id).await?;
    Ok(Json(loan))
}

/// Extend the due date of an active loan
#[utoipa::path(
    post,
    path = "/loans/{id}/extend-due-date",
    tag = "loans",
    params(("id" = i32, Path, description = "Loan ID")),
    request_body = ExtendDueDateRequest,
    responses(
        (status = 200, description = "Due date extended", body = ExtendDueDateResponse),
        (status = 400, description = "Invalid day count or loan already returned", body = crate::error::ErrorResponse),
        (status = 404, description = "Loan not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn extend_due_date(
    State(state): State<AppState>,
    Path(loan_id): Path<i32>,
    Json(request): Json<ExtendDueDateRequest>,
) -> AppResult<Json<ExtendDueDateResponse>> {
    let loan = state
        .services
        .loans
        .extend_due_date(loan_id, request.additional_days)
        .await?;

    Ok(Json(ExtendDueDateResponse {
        status: "Loan extended successfully.".to_string(),
        due_date: loan.due_date,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use chrono::Days;
    use serde_json::json;

    use crate::{
        api::test_support::{router, send},
        services::loans::today,
    };

    #[tokio::test]
    async fn extension_reports_the_new_due_date() {
        let (router, _) = router();
        let (_, author) = send(
            &router,
            "POST",
            "/api/v1/authors",
            Some(json!({"first_name": "Octavia", "last_name": "Butler"})),
        )
        .await;
        let (_, book) = send(
            &router,
            "POST",
            "/api/v1/books",
            Some(json!({"title": "Dawn", "author_id": author["id"], "total_copies": 1})),
        )
        .await;
        let (_, member) = send(
            &router,
            "POST",
            "/api/v1/members",
            Some(json!({"first_name": "Ada", "last_name": "Lovelace", "email": "ada@example.org"})),
        )
        .await;
        let (_, loan) = send(
            &router,
            "POST",
            &format!("/api/v1/books/{}/loan", book["id"]),
            Some(json!({"member_id": member["id"]})),
        )
        .await;
        let loan_id = loan["loan_id"].as_i64().unwrap();

        let (status, body) = send(
            &router,
            "POST",
            &format!("/api/v1/loans/{}/extend-due-date", loan_id),
            Some(json!({"additional_days": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let expected = (today() + Days::new(19)).to_string();
        assert_eq!(body["due_date"], expected.as_str());

        let (status, body) = send(
            &router,
            "POST",
            &format!("/api/v1/loans/{}/extend-due-date", loan_id),
            Some(json!({"additional_days": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "InvalidArgument");

        let (status, _) = send(
            &router,
            "POST",
            "/api/v1/loans/999/extend-due-date",
            Some(json!({"additional_days": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, page) = send(
            &router,
            "GET",
            &format!("/api/v1/loans?member_id={}&active=true", member["id"]),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 1);
        assert_eq!(page["items"][0]["due_date"], expected.as_str());
    }
}

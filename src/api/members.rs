//! Member endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use super::{PaginatedMembers, PaginatedResponse};
use crate::{
    error::AppResult,
    models::{
        member::{CreateMember, UpdateMember},
        ListQuery, Member,
    },
    AppState,
};

/// List members
#[utoipa::path(
    get,
    path = "/members",
    tag = "members",
    params(ListQuery),
    responses(
        (status = 200, description = "List of members", body = PaginatedMembers),
        (status = 400, description = "Invalid page parameters")
    )
)]
pub async fn list_members(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<PaginatedResponse<Member>>> {
    let paging = query.paging()?;
    let (members, total) = state.services.catalog.list_members(paging).await?;
    Ok(Json(PaginatedResponse::new(members, total, paging)))
}

/// Get member by ID
#[utoipa::path(
    get,
    path = "/members/{id}",
    tag = "members",
    params(("id" = i32, Path, description = "Member ID")),
    responses(
        (status = 200, description = "Member details", body = Member),
        (status = 404, description = "Member not found")
    )
)]
pub async fn get_member(State(state): State<AppState>, Path(id): Path<i32>) -> AppResult<Json<Member>> {
    let member = state.services.catalog.get_member(id).await?;
    Ok(Json(member))
}

/// Register a member, membership starts today unless given
#[utoipa::path(
    post,
    path = "/members",
    tag = "members",
    request_body = CreateMember,
    responses(
        (status = 201, description = "Member created", body = Member),
        (status = 400, description = "Invalid input")
    )
)]
pub async fn create_member(
    State(state): State<AppState>,
    Json(data): Json<CreateMember>,
) -> AppResult<(StatusCode, Json<Member>)> {
    let member = state.services.catalog.create_member(data).await?;
    Ok((StatusCode::CREATED, Json(member)))
}

#[utoipa::path(
    put,
    path = "/members/{id}",
    tag = "members",
    params(("id" = i32, Path, description = "Member ID")),
    request_body = UpdateMember,
    responses(
        (status = 200, description = "Member updated", body = Member),
        (status = 400, description = "Invalid input"),
        (status = 404, description = "Member not found")
    )
)]
pub async fn update_member(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(data): Json<UpdateMember>,
) -> AppResult<Json<Member>> {
    let member = state.services.catalog.update_member(id, data).await?;
    Ok(Json(member))
}

#[utoipa::path(
    delete,
    path = "/members/{id}",
    tag = "members",
    params(("id" = i32, Path, description = "Member ID")),
    responses(
        (status = 204, description = "Member deleted"),
        (status = 404, description = "Member not found"),
        (status = 409, description = "Member has loan history")
    )
)]
pub async fn delete_member(State(state): State<AppState>, Path(id): Path<i32>) -> AppResult<StatusCode> {
    state.services.catalog.delete_member(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::api::test_support::{router, send};

    #[tokio::test]
    async fn invalid_email_is_rejected() {
        let (router, _) = router();
        let (status, body) = send(
            &router,
            "POST",
            "/api/v1/members",
            Some(json!({"first_name": "Grace", "last_name": "Hopper", "email": "grace"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "InvalidArgument");
    }

    #[tokio::test]
    async fn membership_date_is_kept_when_given() {
        let (router, _) = router();
        let (status, member) = send(
            &router,
            "POST",
            "/api/v1/members",
            Some(json!({
                "first_name": "Grace",
                "last_name": "Hopper",
                "email": "grace@example.org",
                "membership_date": "2020-02-29"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(member["membership_date"], "2020-02-29");

        let (status, page) = send(&router, "GET", "/api/v1/members", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["items"][0]["email"], "grace@example.org");
        assert_eq!(page["per_page"], 50);
    }
}

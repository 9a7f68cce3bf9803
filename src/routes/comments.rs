use crate::{
    error::Result,
    models::{comment::*, response::ApiResponse},
    routes::posts::PageQuery,
    services::{auth::AuthUser, database::PaginatedResult},
    state::AppState,
    utils::{
        middleware::{ApiJson, ApiPath, ApiQuery},
        permissions::{authenticated, owner_or_read_only},
    },
};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::Json,
    routing::get,
    Router,
};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    let own = Router::new()
        .route("/", get(list_my_comments).post(create_comment))
        .route_layer(middleware::from_fn(authenticated));

    let detail = Router::new()
        .route(
            "/:id",
            get(get_comment)
                .put(update_comment)
                .patch(update_comment)
                .delete(delete_comment),
        )
        .route_layer(middleware::from_fn(owner_or_read_only));

    own.merge(detail)
}

/// 当前用户自己的评论
/// GET /api/social/comments
async fn list_my_comments(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<Comment>>>> {
    let pagination = state.pagination(query.page, query.limit);
    let comments = match state.profile_service.get_by_user(user.user_id).await? {
        Some(profile) => {
            state
                .comment_service
                .list_profile_comments(profile.id, pagination)
                .await?
        }
        None => PaginatedResult::new(Vec::new(), 0, pagination),
    };

    Ok(Json(ApiResponse::success(comments)))
}

/// POST /api/social/comments
async fn create_comment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreateCommentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Comment>>)> {
    let profile = state.profile_service.require_profile(user.user_id).await?;
    let comment = state.comment_service.create_comment(profile.id, request).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(comment))))
}

/// GET /api/social/comments/:id
async fn get_comment(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ApiResponse<Comment>>> {
    let comment = state.comment_service.get_comment(id).await?;
    Ok(Json(ApiResponse::success(comment)))
}

/// PUT/PATCH /api/social/comments/:id
async fn update_comment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateCommentRequest>,
) -> Result<Json<ApiResponse<Comment>>> {
    let comment = state
        .comment_service
        .update_comment(user.user_id, id, request)
        .await?;
    Ok(Json(ApiResponse::success(comment)))
}

/// DELETE /api/social/comments/:id
async fn delete_comment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode> {
    state.comment_service.delete_comment(user.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

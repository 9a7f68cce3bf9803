use crate::{
    error::Result,
    models::{like::*, response::ApiResponse},
    services::{auth::AuthUser, database::PaginatedResult},
    state::AppState,
    utils::{
        middleware::{ApiPath, ApiQuery},
        permissions::{allow_any, owner_or_read_only},
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
    let collection = Router::new()
        .route("/", get(list_likes))
        .route_layer(middleware::from_fn(allow_any));

    let detail = Router::new()
        .route("/:id", get(get_like).delete(delete_like))
        .route_layer(middleware::from_fn(owner_or_read_only));

    collection.merge(detail)
}

/// GET /api/social/likes?post=&profile=
async fn list_likes(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<LikeListQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<Like>>>> {
    let likes = state
        .like_service
        .list_likes(query.post, query.profile, state.pagination(query.page, query.limit))
        .await?;
    Ok(Json(ApiResponse::success(likes)))
}

/// GET /api/social/likes/:id
async fn get_like(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ApiResponse<Like>>> {
    let like = state.like_service.get_like(id).await?;
    Ok(Json(ApiResponse::success(like)))
}

/// DELETE /api/social/likes/:id
async fn delete_like(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode> {
    state.like_service.delete_like(user.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

use crate::{
    error::Result,
    models::{hashtag::*, response::ApiResponse},
    services::{auth::AuthUser, database::PaginatedResult},
    state::AppState,
    utils::{
        middleware::{ApiJson, ApiPath, ApiQuery},
        permissions::authenticated_or_read_only,
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
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct HashtagListQuery {
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_hashtags).post(create_hashtag))
        .route(
            "/:id",
            get(get_hashtag)
                .put(update_hashtag)
                .patch(update_hashtag)
                .delete(delete_hashtag),
        )
        .route_layer(middleware::from_fn(authenticated_or_read_only))
}

/// GET /api/social/hashtags?search=
async fn list_hashtags(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<HashtagListQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<Hashtag>>>> {
    let hashtags = state
        .hashtag_service
        .list_hashtags(query.search.as_deref(), state.pagination(query.page, query.limit))
        .await?;
    Ok(Json(ApiResponse::success(hashtags)))
}

/// POST /api/social/hashtags
async fn create_hashtag(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<HashtagRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Hashtag>>)> {
    debug!("User {} creating hashtag {}", user.user_id, request.name);
    let hashtag = state.hashtag_service.create_hashtag(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(hashtag))))
}

/// GET /api/social/hashtags/:id
async fn get_hashtag(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ApiResponse<Hashtag>>> {
    let hashtag = state.hashtag_service.get_hashtag(id).await?;
    Ok(Json(ApiResponse::success(hashtag)))
}

/// PUT/PATCH /api/social/hashtags/:id
async fn update_hashtag(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<HashtagRequest>,
) -> Result<Json<ApiResponse<Hashtag>>> {
    debug!("User {} renaming hashtag {}", user.user_id, id);
    let hashtag = state.hashtag_service.update_hashtag(id, request).await?;
    Ok(Json(ApiResponse::success(hashtag)))
}

/// DELETE /api/social/hashtags/:id
async fn delete_hashtag(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode> {
    debug!("User {} deleting hashtag {}", user.user_id, id);
    state.hashtag_service.delete_hashtag(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

use crate::{
    error::Result,
    models::{comment::*, like::*, post::*, response::ApiResponse},
    routes::{read_upload, viewer_profile_id},
    services::{auth::AuthUser, database::PaginatedResult, media::MediaKind},
    state::AppState,
    utils::{
        middleware::{ApiJson, ApiPath, ApiQuery, OptionalAuth},
        permissions::{allow_any, authenticated, authenticated_or_read_only, owner_or_read_only},
    },
};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

pub fn router() -> Router<Arc<AppState>> {
    let collection = Router::new()
        .route("/", get(list_posts).post(create_post))
        .route_layer(middleware::from_fn(authenticated_or_read_only));

    let interactions = Router::new()
        .route("/feed", get(feed))
        .route("/:id/like", post(toggle_like))
        .route("/:id/add_comment", post(add_comment))
        .route_layer(middleware::from_fn(authenticated));

    let detail = Router::new()
        .route(
            "/:id",
            get(get_post).put(update_post).patch(update_post).delete(delete_post),
        )
        .route("/:id/upload-image", post(upload_image))
        .route_layer(middleware::from_fn(owner_or_read_only));

    let public = Router::new()
        .route("/:id/likes", get(list_post_likes))
        .route("/:id/comments", get(list_post_comments))
        .route_layer(middleware::from_fn(allow_any));

    collection.merge(interactions).merge(detail).merge(public)
}

/// GET /api/social/posts?hashtags=1,2&author=3&search=
async fn list_posts(
    State(state): State<Arc<AppState>>,
    OptionalAuth(user): OptionalAuth,
    ApiQuery(query): ApiQuery<PostListQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<PostWithDetails>>>> {
    let filter = query.to_filter()?;
    let viewer = viewer_profile_id(&state, user.as_ref()).await?;

    let posts = state
        .post_service
        .list_posts(&filter, viewer, state.pagination(query.page, query.limit))
        .await?;

    Ok(Json(ApiResponse::success(posts)))
}

/// POST /api/social/posts
async fn create_post(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreatePostRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PostWithDetails>>)> {
    let profile = state.profile_service.require_profile(user.user_id).await?;
    let post = state.post_service.create_post(profile.id, request).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(post))))
}

/// 自己和关注对象的帖子
/// GET /api/social/posts/feed
async fn feed(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<PostWithDetails>>>> {
    let profile = state.profile_service.require_profile(user.user_id).await?;
    let posts = state
        .post_service
        .feed(profile.id, state.pagination(query.page, query.limit))
        .await?;

    Ok(Json(ApiResponse::success(posts)))
}

/// GET /api/social/posts/:id
async fn get_post(
    State(state): State<Arc<AppState>>,
    OptionalAuth(user): OptionalAuth,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ApiResponse<PostWithDetails>>> {
    let viewer = viewer_profile_id(&state, user.as_ref()).await?;
    let post = state.post_service.get_post_details(id, viewer).await?;
    Ok(Json(ApiResponse::success(post)))
}

/// PUT/PATCH /api/social/posts/:id
async fn update_post(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdatePostRequest>,
) -> Result<Json<ApiResponse<PostWithDetails>>> {
    let post = state.post_service.update_post(user.user_id, id, request).await?;
    Ok(Json(ApiResponse::success(post)))
}

/// DELETE /api/social/posts/:id
async fn delete_post(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode> {
    let post = state.post_service.delete_post(user.user_id, id).await?;

    if let Some(image) = post.image {
        if let Err(e) = state.media_service.remove(&image).await {
            warn!("Failed to remove image {} of deleted post {}: {}", image, id, e);
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// 上传帖子图片（multipart 字段 `image`）
/// POST /api/social/posts/:id/upload-image
async fn upload_image(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<PostWithDetails>>> {
    state.post_service.ensure_author(user.user_id, id).await?;

    let upload = read_upload(multipart, "image").await?;
    debug!("Uploading image for post {} ({} bytes)", id, upload.data.len());

    let image_url = state
        .media_service
        .save_image(MediaKind::Post, upload.filename.as_deref(), &upload.data)
        .await?;

    let (post, previous) = match state.post_service.set_image(user.user_id, id, &image_url).await {
        Ok(result) => result,
        Err(e) => {
            state.media_service.remove(&image_url).await?;
            return Err(e);
        }
    };

    if let Some(previous) = previous {
        state.media_service.remove(&previous).await?;
    }

    info!("Post {} image set to {}", id, image_url);
    Ok(Json(ApiResponse::success(post)))
}

/// 点赞 / 取消点赞
/// POST /api/social/posts/:id/like
async fn toggle_like(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ApiResponse<LikeToggleResponse>>> {
    let profile = state.profile_service.require_profile(user.user_id).await?;
    let result = state.like_service.toggle_like(profile.id, id).await?;

    let message = if result.liked { "Post liked" } else { "Post unliked" };
    Ok(Json(ApiResponse::success_with_message(result, message)))
}

/// GET /api/social/posts/:id/likes
async fn list_post_likes(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<Like>>>> {
    // 帖子不存在时返回 404
    state.post_service.get_post(id).await?;

    let likes = state
        .like_service
        .list_likes(Some(id), None, state.pagination(query.page, query.limit))
        .await?;
    Ok(Json(ApiResponse::success(likes)))
}

/// POST /api/social/posts/:id/add_comment
async fn add_comment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<AddCommentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Comment>>)> {
    let profile = state.profile_service.require_profile(user.user_id).await?;
    let comment = state.comment_service.add_comment(profile.id, id, request).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(comment))))
}

/// 按创建时间升序
/// GET /api/social/posts/:id/comments
async fn list_post_comments(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<Comment>>>> {
    let comments = state
        .comment_service
        .list_post_comments(id, state.pagination(query.page, query.limit))
        .await?;
    Ok(Json(ApiResponse::success(comments)))
}

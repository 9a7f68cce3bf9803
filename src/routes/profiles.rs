use crate::{
    error::Result,
    models::{follow::*, profile::*, response::ApiResponse},
    routes::read_upload,
    services::{auth::AuthUser, database::PaginatedResult, media::MediaKind},
    state::AppState,
    utils::{
        middleware::{ApiJson, ApiPath, ApiQuery},
        permissions::{allow_any, authenticated, authenticated_or_read_only, ensure_owner, owner_or_read_only},
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
use std::sync::Arc;
use tracing::{debug, info, warn};

pub fn router() -> Router<Arc<AppState>> {
    let collection = Router::new()
        .route("/", get(list_profiles).post(create_profile))
        .route_layer(middleware::from_fn(authenticated_or_read_only));

    let own = Router::new()
        .route("/me", get(get_my_profile))
        .route("/:id/follow", post(follow))
        .route("/:id/unfollow", post(unfollow))
        .route("/:id/toggle-follow", post(toggle_follow))
        .route_layer(middleware::from_fn(authenticated));

    let detail = Router::new()
        .route(
            "/:id",
            get(get_profile)
                .put(update_profile)
                .patch(update_profile)
                .delete(delete_profile),
        )
        .route("/:id/upload-image", post(upload_picture))
        .route_layer(middleware::from_fn(owner_or_read_only));

    let public = Router::new()
        .route("/:id/followers", get(get_followers))
        .route("/:id/following", get(get_following))
        .route_layer(middleware::from_fn(allow_any));

    collection.merge(own).merge(detail).merge(public)
}

/// GET /api/social/profiles?search=
async fn list_profiles(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<ProfileListQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<Profile>>>> {
    let profiles = state
        .profile_service
        .list_profiles(query.search.as_deref(), state.pagination(query.page, query.limit))
        .await?;

    Ok(Json(ApiResponse::success(profiles)))
}

/// 获取或创建当前用户的资料：新建返回 201，已存在返回 200
/// POST /api/social/profiles
async fn create_profile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreateProfileRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Profile>>)> {
    let (profile, created) = state.profile_service.create_profile(user.user_id, request).await?;

    if created {
        Ok((
            StatusCode::CREATED,
            Json(ApiResponse::success_with_message(profile, "Profile created")),
        ))
    } else {
        Ok((
            StatusCode::OK,
            Json(ApiResponse::success_with_message(profile, "Profile already exists")),
        ))
    }
}

/// GET /api/social/profiles/me
async fn get_my_profile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Profile>>> {
    let profile = state.profile_service.require_profile(user.user_id).await?;
    Ok(Json(ApiResponse::success(profile)))
}

/// GET /api/social/profiles/:id
async fn get_profile(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ApiResponse<Profile>>> {
    let profile = state.profile_service.get_profile(id).await?;
    Ok(Json(ApiResponse::success(profile)))
}

/// PUT/PATCH /api/social/profiles/:id
async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<Profile>>> {
    let profile = state
        .profile_service
        .update_profile(user.user_id, id, request)
        .await?;
    Ok(Json(ApiResponse::success(profile)))
}

/// DELETE /api/social/profiles/:id
async fn delete_profile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode> {
    let profile = state.profile_service.get_profile(id).await?;
    ensure_owner(user.user_id, profile.user_id, "profile")?;

    let images = state.post_service.image_urls_for_profile(id).await?;
    state.profile_service.delete_profile(user.user_id, id).await?;

    for url in images.iter().chain(profile.picture.iter()) {
        if let Err(e) = state.media_service.remove(url).await {
            warn!("Failed to remove media {} of deleted profile {}: {}", url, id, e);
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// 上传头像（multipart 字段 `picture`）
/// POST /api/social/profiles/:id/upload-image
async fn upload_picture(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<Profile>>> {
    let profile = state.profile_service.get_profile(id).await?;
    ensure_owner(user.user_id, profile.user_id, "profile")?;

    let upload = read_upload(multipart, "picture").await?;
    debug!("Uploading picture for profile {} ({} bytes)", id, upload.data.len());

    let image_url = state
        .media_service
        .save_image(MediaKind::Profile, upload.filename.as_deref(), &upload.data)
        .await?;

    let (profile, previous) = match state.profile_service.set_picture(user.user_id, id, &image_url).await {
        Ok(result) => result,
        Err(e) => {
            state.media_service.remove(&image_url).await?;
            return Err(e);
        }
    };

    if let Some(previous) = previous {
        state.media_service.remove(&previous).await?;
    }

    info!("Profile {} picture set to {}", id, image_url);
    Ok(Json(ApiResponse::success(profile)))
}

/// POST /api/social/profiles/:id/follow
async fn follow(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ApiResponse<FollowStatus>>> {
    let me = state.profile_service.require_profile(user.user_id).await?;
    let status = state.follow_service.follow(me.id, id).await?;
    Ok(Json(ApiResponse::success_with_message(status, "Followed")))
}

/// POST /api/social/profiles/:id/unfollow
async fn unfollow(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ApiResponse<FollowStatus>>> {
    let me = state.profile_service.require_profile(user.user_id).await?;
    let status = state.follow_service.unfollow(me.id, id).await?;
    Ok(Json(ApiResponse::success_with_message(status, "Unfollowed")))
}

/// POST /api/social/profiles/:id/toggle-follow
async fn toggle_follow(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ApiResponse<FollowStatus>>> {
    let me = state.profile_service.require_profile(user.user_id).await?;
    let status = state.follow_service.toggle_follow(me.id, id).await?;
    let message = if status.is_following { "Followed" } else { "Unfollowed" };
    Ok(Json(ApiResponse::success_with_message(status, message)))
}

/// GET /api/social/profiles/:id/followers
async fn get_followers(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<FollowQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<Profile>>>> {
    let followers = state
        .follow_service
        .get_followers(id, state.pagination(query.page, query.limit))
        .await?;
    Ok(Json(ApiResponse::success(followers)))
}

/// GET /api/social/profiles/:id/following
async fn get_following(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<FollowQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<Profile>>>> {
    let following = state
        .follow_service
        .get_following(id, state.pagination(query.page, query.limit))
        .await?;
    Ok(Json(ApiResponse::success(following)))
}

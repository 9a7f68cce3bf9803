use crate::{
    error::{AppError, Result},
    models::{response::ApiResponse, user::*},
    services::auth::{AuthUser, TokenType},
    services::database::PaginatedResult,
    state::AppState,
    utils::{
        middleware::{ApiJson, ApiQuery},
        permissions::{allow_any, authenticated},
    },
};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub fn router() -> Router<Arc<AppState>> {
    let public = Router::new()
        .route("/register", post(register))
        .route("/token", post(obtain_token))
        .route("/token/refresh", post(refresh_token))
        .route("/token/verify", post(verify_token))
        .route_layer(middleware::from_fn(allow_any));

    let private = Router::new()
        .route("/logout", post(logout))
        .route(
            "/me",
            get(get_me).put(update_me).patch(update_me).delete(delete_me),
        )
        .route("/users", get(list_users))
        .route_layer(middleware::from_fn(authenticated));

    public.merge(private)
}

/// 注册
/// POST /api/user/register
async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UserResponse>>)> {
    let user = state.user_service.register(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message(
            user.to_response(),
            "User registered successfully",
        )),
    ))
}

/// 用邮箱和密码换取令牌对
/// POST /api/user/token
async fn obtain_token(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<TokenRequest>,
) -> Result<Json<ApiResponse<TokenPairResponse>>> {
    let user = state
        .user_service
        .authenticate(&request.email, &request.password)
        .await?;
    let pair = state.auth_service.issue_token_pair(&user)?;

    Ok(Json(ApiResponse::success(pair)))
}

/// POST /api/user/token/refresh
async fn refresh_token(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> Result<Json<ApiResponse<AccessTokenResponse>>> {
    let claims = state
        .auth_service
        .verify_token(&request.refresh, TokenType::Refresh)
        .await?;
    let user = state.user_service.get_active_user(claims.user_id()?).await?;
    let access = state
        .auth_service
        .refresh_access_token(&request.refresh, &user)
        .await?;

    Ok(Json(ApiResponse::success(access)))
}

/// 验证任意类型的令牌
/// POST /api/user/token/verify
async fn verify_token(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<VerifyRequest>,
) -> Result<Json<ApiResponse<Value>>> {
    let claims = state.auth_service.verify_jwt(&request.token)?;
    if state.auth_service.is_revoked(&claims.jti).await? {
        return Err(AppError::unauthorized("Token is blacklisted"));
    }

    Ok(Json(ApiResponse::success(json!({
        "valid": true,
        "token_type": claims.token_type,
        "user_id": claims.user_id()?,
        "expires_at": claims.expires_at(),
    }))))
}

/// 吊销当前 access 令牌，以及请求体中可选的 refresh 令牌
/// POST /api/user/logout
async fn logout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    request: Option<Json<LogoutRequest>>,
) -> Result<Json<ApiResponse<Value>>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();

    if let Some(refresh) = request.refresh {
        let refresh_claims = state
            .auth_service
            .verify_token(&refresh, TokenType::Refresh)
            .await?;
        if refresh_claims.user_id()? != user.user_id {
            return Err(AppError::forbidden("Token does not belong to this user"));
        }
        state.auth_service.revoke(&refresh_claims).await?;
    }

    state.auth_service.revoke(&user.claims).await?;
    info!("User {} logged out", user.user_id);

    Ok(Json(ApiResponse::success_with_message(
        json!({}),
        "Successfully logged out.",
    )))
}

/// GET /api/user/me
async fn get_me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<ApiResponse<UserResponse>>> {
    let account = state.user_service.get_active_user(user.user_id).await?;
    Ok(Json(ApiResponse::success(account.to_response())))
}

/// PUT/PATCH /api/user/me
async fn update_me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<UpdateUserRequest>,
) -> Result<Json<ApiResponse<UserResponse>>> {
    let account = state.user_service.update_user(user.user_id, request).await?;
    Ok(Json(ApiResponse::success(account.to_response())))
}

/// 删除账户及其全部内容
/// DELETE /api/user/me
async fn delete_me(State(state): State<Arc<AppState>>, user: AuthUser) -> Result<StatusCode> {
    let mut images = Vec::new();
    if let Some(profile) = state.profile_service.get_by_user(user.user_id).await? {
        images = state.post_service.image_urls_for_profile(profile.id).await?;
        images.extend(profile.picture);
    }

    state.user_service.delete_user(user.user_id).await?;
    state.auth_service.revoke(&user.claims).await?;

    // 账户已删除，文件清理失败只记录日志
    for url in &images {
        if let Err(e) = state.media_service.remove(url).await {
            warn!("Failed to remove media {} of deleted user {}: {}", url, user.user_id, e);
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/user/users?search=&email=
async fn list_users(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<UserListQuery>,
) -> Result<Json<ApiResponse<PaginatedResult<UserResponse>>>> {
    debug!("User {} listing users", user.user_id);

    let users = state
        .user_service
        .list_users(
            query.search.as_deref(),
            query.email.as_deref(),
            state.pagination(query.page, query.limit),
        )
        .await?;

    Ok(Json(ApiResponse::success(users)))
}

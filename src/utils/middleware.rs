use crate::{
    error::AppError,
    services::auth::{AuthFailure, AuthUser, TokenType},
    state::AppState,
};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, ConnectInfo, FromRequest, FromRequestParts, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderValue, Request},
    middleware::Next,
    response::Response,
    Json,
};
use serde::de::DeserializeOwned;
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, warn};

/// 认证中间件
///
/// 携带有效 Bearer 令牌时把 [`AuthUser`] 放入请求扩展；令牌无效时记录
/// [`AuthFailure`] 并作为未认证请求继续处理，由提取器或权限层决定是否拒绝。
pub async fn auth_middleware(
    State(app_state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next<Body>,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());

    if let Some(token) = token {
        match authenticate(&app_state, &token).await {
            Ok(user) => {
                debug!("Authenticated user: {} ({})", user.user_id, user.email);
                request.extensions_mut().insert(user);
            }
            Err(AppError::Authentication(reason)) => {
                warn!("Rejected bearer token on {}: {}", request.uri().path(), reason);
                request.extensions_mut().insert(AuthFailure(reason));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(next.run(request).await)
}

async fn authenticate(app_state: &AppState, token: &str) -> Result<AuthUser, AppError> {
    let claims = app_state.auth_service.verify_token(token, TokenType::Access).await?;
    let user = app_state.user_service.get_active_user(claims.user_id()?).await?;

    Ok(AuthUser {
        user_id: user.id,
        email: user.email,
        claims,
    })
}

/// 速率限制中间件
pub async fn rate_limit_middleware(
    State(app_state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next<Body>,
) -> Result<Response, AppError> {
    // 获取客户端 IP
    let client_ip = get_client_ip(&request);

    // 检查速率限制
    match app_state.rate_limiter.check_key(&client_ip) {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            warn!("Rate limit exceeded for IP: {}", client_ip);
            Err(AppError::RateLimitExceeded)
        }
    }
}

/// 请求 ID 中间件，沿用客户端传入的 `x-request-id`
pub async fn request_id_middleware(mut request: Request<Body>, next: Next<Body>) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .filter(|id| !id.is_empty() && id.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // 添加到请求扩展中
    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    // 添加到响应头中
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

/// 获取客户端 IP 地址
fn get_client_ip(request: &Request<Body>) -> String {
    let headers = request.headers();

    // 检查常见的代理头
    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.split(',').next())
    {
        return ip.trim().to_string();
    }

    if let Some(ip) = headers.get("x-real-ip").and_then(|h| h.to_str().ok()) {
        return ip.trim().to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// 请求 ID 包装器
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// 可选认证提取器，匿名请求得到 `None`
pub struct OptionalAuth(pub Option<AuthUser>);

#[async_trait]
impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts.extensions.get::<AuthUser>().cloned();
        Ok(OptionalAuth(user))
    }
}

/// JSON 请求体，反序列化失败时返回 [`AppError`] 信封
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S, B> FromRequest<S, B> for ApiJson<T>
where
    Json<T>: FromRequest<S, B, Rejection = JsonRejection>,
    S: Send + Sync,
    B: Send + 'static,
{
    type Rejection = AppError;

    async fn from_request(request: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(request, state).await?;
        Ok(ApiJson(value))
    }
}

/// 路径参数
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(ApiPath(value))
    }
}

/// 查询参数
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(ApiQuery(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_from_forwarded_header() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(get_client_ip(&request), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_fallbacks() {
        let request = Request::builder()
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(get_client_ip(&request), "198.51.100.2");

        let anonymous = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(get_client_ip(&anonymous), "unknown");
    }
}

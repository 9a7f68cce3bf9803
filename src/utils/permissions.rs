//! 请求级与对象级的权限规则。
//!
//! 路由级规则通过 [`enforce`]（及 `authenticated` 等包装函数）作为 route layer 挂在路由上，
//! 对象级的“仅作者可修改”在服务层通过 [`ensure_owner`] 检查。

use crate::{error::{AppError, Result}, services::auth::AuthUser};
use axum::{
    body::Body,
    http::{Method, Request},
    middleware::Next,
    response::Response,
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// 公开访问
    AllowAny,
    /// 必须携带有效令牌
    IsAuthenticated,
    /// 安全方法公开，写操作需要令牌
    IsAuthenticatedOrReadOnly,
    /// 安全方法公开，写操作只允许资源所有者（所有权由服务层的 [`ensure_owner`] 判定）
    IsOwnerOrReadOnly,
}

/// GET / HEAD / OPTIONS 视为只读
pub fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

impl Permission {
    pub fn has_permission(&self, method: &Method, authenticated: bool) -> Result<()> {
        let allowed = match self {
            Permission::AllowAny => true,
            Permission::IsAuthenticated => authenticated,
            Permission::IsAuthenticatedOrReadOnly | Permission::IsOwnerOrReadOnly => {
                is_safe_method(method) || authenticated
            }
        };

        if allowed {
            Ok(())
        } else {
            Err(AppError::unauthorized("Authentication credentials were not provided."))
        }
    }
}

/// 对象级检查：请求者必须是资源所有者
pub fn ensure_owner(requester_id: i64, owner_id: i64, resource: &str) -> Result<()> {
    if requester_id == owner_id {
        Ok(())
    } else {
        debug!("Requester {} is not the owner of {} (owner {})", requester_id, resource, owner_id);
        Err(AppError::Authorization(format!(
            "You do not have permission to modify this {}.",
            resource
        )))
    }
}

/// 路由层中间件：按权限类拦截请求
pub async fn enforce(
    permission: Permission,
    request: Request<Body>,
    next: Next<Body>,
) -> std::result::Result<Response, AppError> {
    let authenticated = request.extensions().get::<AuthUser>().is_some();
    permission.has_permission(request.method(), authenticated)?;
    Ok(next.run(request).await)
}

pub async fn allow_any(request: Request<Body>, next: Next<Body>) -> std::result::Result<Response, AppError> {
    enforce(Permission::AllowAny, request, next).await
}

pub async fn authenticated(request: Request<Body>, next: Next<Body>) -> std::result::Result<Response, AppError> {
    enforce(Permission::IsAuthenticated, request, next).await
}

pub async fn authenticated_or_read_only(
    request: Request<Body>,
    next: Next<Body>,
) -> std::result::Result<Response, AppError> {
    enforce(Permission::IsAuthenticatedOrReadOnly, request, next).await
}

pub async fn owner_or_read_only(request: Request<Body>, next: Next<Body>) -> std::result::Result<Response, AppError> {
    enforce(Permission::IsOwnerOrReadOnly, request, next).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_methods() {
        assert!(is_safe_method(&Method::GET));
        assert!(is_safe_method(&Method::HEAD));
        assert!(!is_safe_method(&Method::POST));
        assert!(!is_safe_method(&Method::DELETE));
    }

    #[test]
    fn test_authenticated_or_read_only() {
        let permission = Permission::IsAuthenticatedOrReadOnly;
        assert!(permission.has_permission(&Method::GET, false).is_ok());
        assert!(permission.has_permission(&Method::POST, true).is_ok());
        assert!(matches!(
            permission.has_permission(&Method::PATCH, false),
            Err(AppError::Authentication(_))
        ));
    }

    #[test]
    fn test_is_authenticated_blocks_reads() {
        assert!(Permission::IsAuthenticated.has_permission(&Method::GET, false).is_err());
        assert!(Permission::IsAuthenticated.has_permission(&Method::DELETE, true).is_ok());
    }

    #[test]
    fn test_allow_any() {
        assert!(Permission::AllowAny.has_permission(&Method::POST, false).is_ok());
    }

    #[test]
    fn test_owner_or_read_only() {
        let permission = Permission::IsOwnerOrReadOnly;
        assert!(permission.has_permission(&Method::GET, false).is_ok());
        assert!(permission.has_permission(&Method::PUT, false).is_err());
        assert!(permission.has_permission(&Method::DELETE, true).is_ok());
    }

    #[test]
    fn test_ensure_owner() {
        assert!(ensure_owner(7, 7, "post").is_ok());
        assert!(matches!(ensure_owner(7, 8, "post"), Err(AppError::Authorization(_))));
    }
}

use crate::{
    error::{AppError, Result},
    models::user::*,
    services::{
        auth::{hash_password, verify_password},
        database::{contains_pattern, PaginatedResult, Pagination},
        Database,
    },
    utils::validation::normalize_email,
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use std::sync::Arc;
use tracing::{debug, info, warn};
use validator::Validate;

const DUPLICATE_EMAIL: &str = "user with this email already exists.";

#[derive(Clone)]
pub struct UserService {
    db: Arc<Database>,
}

impl UserService {
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self { db })
    }

    /// 注册新账户，邮箱重复时返回 409
    pub async fn register(&self, request: RegisterRequest) -> Result<User> {
        request.validate()?;
        if let Some(confirm) = &request.password_confirm {
            if confirm != &request.password {
                return Err(AppError::invalid_field("password_confirm", "Passwords do not match."));
            }
        }

        let email = normalize_email(&request.email);
        debug!("Registering user: {}", email);

        let password_hash = hash_password(&request.password)?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, is_active, is_staff, date_joined)
            VALUES (?, ?, 1, 0, ?)
            RETURNING id, email, password_hash, is_active, is_staff, date_joined
            "#,
        )
        .bind(&email)
        .bind(&password_hash)
        .bind(Utc::now())
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| AppError::from_unique_violation(e, "email", DUPLICATE_EMAIL))?;

        info!("User {} registered ({})", user.id, user.email);
        Ok(user)
    }

    /// 校验邮箱和密码，失败一律返回 401
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        let user = self.get_by_email(&normalize_email(email)).await?;

        match user {
            Some(user) if user.is_active && verify_password(password, &user.password_hash) => Ok(user),
            Some(user) if !user.is_active => {
                warn!("Inactive user {} attempted to log in", user.id);
                Err(AppError::unauthorized("No active account found with the given credentials"))
            }
            _ => Err(AppError::unauthorized("No active account found with the given credentials")),
        }
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, is_active, is_staff, date_joined FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(user)
    }

    /// 获取活跃用户，不存在或已停用返回 401
    pub async fn get_active_user(&self, user_id: i64) -> Result<User> {
        match self.get_user(user_id).await? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(AppError::unauthorized("User not found or inactive")),
        }
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, is_active, is_staff, date_joined FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(user)
    }

    pub async fn update_user(&self, user_id: i64, request: UpdateUserRequest) -> Result<User> {
        request.validate()?;

        let mut user = self
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User"))?;

        if let Some(email) = request.email {
            user.email = normalize_email(&email);
        }
        if let Some(password) = request.password {
            user.password_hash = hash_password(&password)?;
        }

        sqlx::query("UPDATE users SET email = ?, password_hash = ? WHERE id = ?")
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| AppError::from_unique_violation(e, "email", DUPLICATE_EMAIL))?;

        info!("User {} updated account", user_id);
        Ok(user)
    }

    /// 删除账户，资料、帖子、评论、点赞和关注关系级联删除
    pub async fn delete_user(&self, user_id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("User"));
        }

        info!("User {} deleted account", user_id);
        Ok(())
    }

    /// 用户列表，`search` 与 `email` 均为不区分大小写的子串匹配
    pub async fn list_users(
        &self,
        search: Option<&str>,
        email: Option<&str>,
        pagination: Pagination,
    ) -> Result<PaginatedResult<UserResponse>> {
        let filters: Vec<String> = [search, email]
            .into_iter()
            .flatten()
            .filter(|term| !term.trim().is_empty())
            .map(contains_pattern)
            .collect();

        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users WHERE 1 = 1");
        let mut list_query = QueryBuilder::<Sqlite>::new(
            "SELECT id, email, password_hash, is_active, is_staff, date_joined FROM users WHERE 1 = 1",
        );
        for pattern in &filters {
            count_query
                .push(" AND email LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\'");
            list_query
                .push(" AND email LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\'");
        }
        list_query
            .push(" ORDER BY id LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(self.db.pool())
            .await?;
        let users: Vec<User> = list_query
            .build_query_as()
            .fetch_all(self.db.pool())
            .await?;

        Ok(PaginatedResult::new(
            users.iter().map(User::to_response).collect(),
            total,
            pagination,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn service() -> UserService {
        let db = Arc::new(Database::new(&Config::for_tests()).await.unwrap());
        UserService::new(db).await.unwrap()
    }

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: "correct-horse".to_string(),
            password_confirm: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let users = service().await;
        users.register(register_request("alice@example.com")).await.unwrap();

        let err = users
            .register(register_request("alice@EXAMPLE.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Duplicate { ref field, .. } if field == "email"));

        // 本地部分大小写不同也视为同一邮箱
        assert!(users.register(register_request("Alice@example.com")).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_registration_is_validation_error() {
        let users = service().await;
        let err = users
            .register(RegisterRequest {
                email: "nope".to_string(),
                password: "x".to_string(),
                password_confirm: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidatorError(_)));
    }

    #[tokio::test]
    async fn test_password_confirmation_must_match() {
        let users = service().await;
        let err = users
            .register(RegisterRequest {
                password_confirm: Some("different-horse".to_string()),
                ..register_request("mismatch@example.com")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidField { ref field, .. } if field == "password_confirm"));

        let confirmed = RegisterRequest {
            password_confirm: Some("correct-horse".to_string()),
            ..register_request("match@example.com")
        };
        assert!(users.register(confirmed).await.is_ok());
    }

    #[tokio::test]
    async fn test_authenticate() {
        let users = service().await;
        let user = users.register(register_request("bob@example.com")).await.unwrap();

        let found = users.authenticate("bob@example.com", "correct-horse").await.unwrap();
        assert_eq!(found.id, user.id);

        assert!(users.authenticate("bob@example.com", "wrong").await.is_err());
        assert!(users.authenticate("nobody@example.com", "correct-horse").await.is_err());
    }

    #[tokio::test]
    async fn test_inactive_user_cannot_authenticate() {
        let users = service().await;
        let user = users.register(register_request("carol@example.com")).await.unwrap();
        sqlx::query("UPDATE users SET is_active = 0 WHERE id = ?")
            .bind(user.id)
            .execute(users.db.pool())
            .await
            .unwrap();

        assert!(users.authenticate("carol@example.com", "correct-horse").await.is_err());
        assert!(users.get_active_user(user.id).await.is_err());
    }

    #[tokio::test]
    async fn test_update_password() {
        let users = service().await;
        let user = users.register(register_request("dave@example.com")).await.unwrap();

        users
            .update_user(
                user.id,
                UpdateUserRequest {
                    email: None,
                    password: Some("new-password-1".to_string()),
                },
            )
            .await
            .unwrap();

        assert!(users.authenticate("dave@example.com", "correct-horse").await.is_err());
        assert!(users.authenticate("dave@example.com", "new-password-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_list_users_filters_by_email() {
        let users = service().await;
        users.register(register_request("erin@alpha.com")).await.unwrap();
        users.register(register_request("frank@beta.com")).await.unwrap();
        users.register(register_request("grace@alpha.com")).await.unwrap();

        let page = users
            .list_users(None, Some("ALPHA"), Pagination::new(None, None, 20))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert!(page.data.iter().all(|u| u.email.ends_with("@alpha.com")));

        let all = users
            .list_users(None, None, Pagination::new(Some(1), Some(2), 20))
            .await
            .unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.data.len(), 2);
        assert_eq!(all.total_pages, 2);
    }
}

use crate::{
    config::Config,
    error::{AppError, Result},
    models::user::{AccessTokenResponse, TokenPairResponse, User},
    services::Database,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use axum::http::request::Parts;
use axum::extract::FromRequestParts;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,        // 用户ID
    pub email: String,      // 邮箱
    pub exp: i64,           // 过期时间
    pub iat: i64,           // 签发时间
    pub jti: String,        // 令牌ID，用于吊销
    pub token_type: TokenType,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64> {
        self.sub
            .parse()
            .map_err(|_| AppError::unauthorized("Token contained no recognizable user identification"))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// 经过认证的请求者，由认证中间件放入请求扩展
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub email: String,
    pub claims: Claims,
}

/// 令牌存在但无效时记录的原因，用于 401 响应
#[derive(Debug, Clone)]
pub struct AuthFailure(pub String);

#[derive(Clone)]
pub struct AuthService {
    config: Config,
    db: Arc<Database>,
}

impl AuthService {
    pub async fn new(config: &Config, db: Arc<Database>) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            db,
        })
    }

    fn encode_token(&self, user: &User, token_type: TokenType, lifetime: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            exp: (now + lifetime).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.secret_key.as_ref()),
        )?;
        Ok(token)
    }

    /// 签发 access + refresh 令牌对
    pub fn issue_token_pair(&self, user: &User) -> Result<TokenPairResponse> {
        let access_lifetime = Duration::minutes(self.config.access_token_lifetime_minutes);
        let refresh_lifetime = Duration::minutes(self.config.refresh_token_lifetime_minutes);

        let access = self.encode_token(user, TokenType::Access, access_lifetime)?;
        let refresh = self.encode_token(user, TokenType::Refresh, refresh_lifetime)?;

        info!("Issued token pair for user {}", user.id);

        Ok(TokenPairResponse {
            access,
            refresh,
            token_type: "Bearer".to_string(),
            expires_in: access_lifetime.num_seconds(),
        })
    }

    /// 只验证签名和过期时间，不查询吊销表
    pub fn verify_jwt(&self, token: &str) -> Result<Claims> {
        let decoding_key = DecodingKey::from_secret(self.config.secret_key.as_ref());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(token_data) => {
                debug!("JWT token verified for user: {}", token_data.claims.sub);
                Ok(token_data.claims)
            }
            Err(e) => {
                warn!("JWT verification failed: {}", e);
                Err(AppError::unauthorized("Given token not valid for any token type"))
            }
        }
    }

    /// 完整验证：签名、过期、类型、吊销状态
    pub async fn verify_token(&self, token: &str, expected: TokenType) -> Result<Claims> {
        let claims = self.verify_jwt(token)?;

        if claims.token_type != expected {
            return Err(AppError::unauthorized("Token has wrong type"));
        }

        if self.is_revoked(&claims.jti).await? {
            return Err(AppError::unauthorized("Token is blacklisted"));
        }

        Ok(claims)
    }

    /// 用 refresh 令牌换取新的 access 令牌
    pub async fn refresh_access_token(&self, refresh_token: &str, user: &User) -> Result<AccessTokenResponse> {
        let claims = self.verify_token(refresh_token, TokenType::Refresh).await?;
        if claims.user_id()? != user.id {
            return Err(AppError::unauthorized("Token does not belong to this user"));
        }

        let lifetime = Duration::minutes(self.config.access_token_lifetime_minutes);
        let access = self.encode_token(user, TokenType::Access, lifetime)?;

        Ok(AccessTokenResponse {
            access,
            token_type: "Bearer".to_string(),
            expires_in: lifetime.num_seconds(),
        })
    }

    /// 吊销令牌，重复吊销是幂等的
    pub async fn revoke(&self, claims: &Claims) -> Result<()> {
        let user_id = claims.user_id()?;
        sqlx::query(
            r#"
            INSERT INTO revoked_tokens (jti, user_id, expires_at, revoked_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (jti) DO NOTHING
            "#,
        )
        .bind(&claims.jti)
        .bind(user_id)
        .bind(claims.expires_at())
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;

        info!("Revoked {:?} token {} of user {}", claims.token_type, claims.jti, user_id);
        Ok(())
    }

    pub async fn is_revoked(&self, jti: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM revoked_tokens WHERE jti = ?")
            .bind(jti)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count > 0)
    }

    /// 清理已过期的吊销记录（过期令牌本身已无法通过验证）
    pub async fn cleanup_revoked_tokens(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < ?")
            .bind(Utc::now())
            .execute(self.db.pool())
            .await?;

        let removed = result.rows_affected();
        debug!("Cleaned {} expired revoked tokens", removed);
        Ok(removed)
    }
}

/// Argon2id 哈希密码
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Stored password hash is malformed: {}", e);
            false
        }
    }
}

// Axum extractor for authentication
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        match parts.extensions.get::<AuthFailure>() {
            Some(AuthFailure(reason)) => Err(AppError::Authentication(reason.clone())),
            None => Err(AppError::unauthorized("Authentication credentials were not provided.")),
        }
    }
}

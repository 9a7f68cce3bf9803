use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub log_level: String,
    pub log_format: String,

    // Database configuration
    pub database_url: String,
    pub database_max_connections: u32,

    // Authentication configuration
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub access_token_lifetime_minutes: i64,
    pub refresh_token_lifetime_minutes: i64,

    // Media configuration
    pub media_root: String,
    pub media_url: String,
    pub max_upload_size: usize,
    pub allowed_image_types: String,

    // Content settings
    pub default_page_size: u32,

    // Rate limiting
    pub rate_limit_requests: u32,

    // CORS configuration
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .context("SERVER_PORT must be a port number")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "social_api=debug,tower_http=debug".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://social.db".to_string()),
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a number")?,

            secret_key: env::var("SECRET_KEY").context("SECRET_KEY must be set")?,
            access_token_lifetime_minutes: env::var("ACCESS_TOKEN_LIFETIME_MINUTES")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("ACCESS_TOKEN_LIFETIME_MINUTES must be a number")?,
            refresh_token_lifetime_minutes: env::var("REFRESH_TOKEN_LIFETIME_MINUTES")
                .unwrap_or_else(|_| "1440".to_string())
                .parse()
                .context("REFRESH_TOKEN_LIFETIME_MINUTES must be a number")?,

            media_root: env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".to_string()),
            media_url: env::var("MEDIA_URL").unwrap_or_else(|_| "/media".to_string()),
            max_upload_size: env::var("MAX_UPLOAD_SIZE")
                .unwrap_or_else(|_| "5242880".to_string())
                .parse()
                .context("MAX_UPLOAD_SIZE must be a number of bytes")?,
            allowed_image_types: env::var("ALLOWED_IMAGE_TYPES")
                .unwrap_or_else(|_| "jpeg,jpg,png,gif,webp".to_string()),

            default_page_size: env::var("DEFAULT_PAGE_SIZE")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("DEFAULT_PAGE_SIZE must be a number")?,

            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .context("RATE_LIMIT_REQUESTS must be a number")?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string()),
        })
    }

    /// 测试用配置：内存数据库，固定密钥
    pub fn for_tests() -> Self {
        Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            environment: "test".to_string(),
            log_level: "social_api=debug".to_string(),
            log_format: "text".to_string(),
            database_url: "sqlite::memory:".to_string(),
            database_max_connections: 1,
            secret_key: "test-secret-key".to_string(),
            access_token_lifetime_minutes: 60,
            refresh_token_lifetime_minutes: 1440,
            media_root: std::env::temp_dir()
                .join(format!("social-api-media-{}", uuid::Uuid::new_v4()))
                .to_string_lossy()
                .into_owned(),
            media_url: "/media".to_string(),
            max_upload_size: 5 * 1024 * 1024,
            allowed_image_types: "jpeg,jpg,png,gif,webp".to_string(),
            default_page_size: 20,
            rate_limit_requests: 10_000,
            cors_allowed_origins: "*".to_string(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// 允许上传的图片扩展名
    pub fn allowed_image_extensions(&self) -> Vec<String> {
        self.allowed_image_types
            .split(',')
            .map(|ext| ext.trim().to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect()
    }
}

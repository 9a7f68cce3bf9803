use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::utils::validation::validate_username_field;

/// 用户的公开资料，附带关注统计
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    pub email: String,
    pub picture: Option<String>,
    pub followers_count: i64,
    pub following_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateProfileRequest {
    #[validate(custom = "validate_username_field")]
    pub username: String,

    #[validate(length(max = 150))]
    pub first_name: Option<String>,

    #[validate(length(max = 150))]
    pub last_name: Option<String>,

    #[validate(length(max = 500))]
    pub bio: Option<String>,

    #[validate(email(message = "Enter a valid email address."))]
    pub email: Option<String>,

    /// 创建时立即关注的资料 ID
    #[serde(default)]
    pub follow: Vec<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(custom = "validate_username_field")]
    pub username: Option<String>,

    #[validate(length(max = 150))]
    pub first_name: Option<String>,

    #[validate(length(max = 150))]
    pub last_name: Option<String>,

    #[validate(length(max = 500))]
    pub bio: Option<String>,

    #[validate(email(message = "Enter a valid email address."))]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileListQuery {
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_profile_request_defaults() {
        let request: CreateProfileRequest =
            serde_json::from_value(serde_json::json!({ "username": "alice" })).unwrap();
        assert!(request.follow.is_empty());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_invalid_username_rejected() {
        let request = UpdateProfileRequest {
            username: Some("no spaces allowed".to_string()),
            ..Default::default()
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("username"));
    }
}

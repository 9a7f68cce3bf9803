use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub profile_id: i64,
    pub author_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateCommentRequest {
    pub post_id: i64,
    #[validate(length(min = 1, max = 2000, message = "Comment must be 1 to 2000 characters long."))]
    pub content: String,
}

/// `POST /posts/:id/add_comment` 的请求体，帖子来自路径
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddCommentRequest {
    #[validate(length(min = 1, max = 2000, message = "Comment must be 1 to 2000 characters long."))]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateCommentRequest {
    #[validate(length(min = 1, max = 2000, message = "Comment must be 1 to 2000 characters long."))]
    pub content: String,
}

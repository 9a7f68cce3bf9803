use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Like {
    pub id: i64,
    pub profile_id: i64,
    pub username: String,
    pub post_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeToggleResponse {
    pub post_id: i64,
    pub liked: bool,
    pub like_count: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct LikeListQuery {
    pub post: Option<i64>,
    pub profile: Option<i64>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

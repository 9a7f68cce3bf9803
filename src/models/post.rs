use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{error::Result, models::hashtag::Hashtag, utils::validation::parse_id_list};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub profile_id: i64,
    pub author_username: String,
    pub content: String,
    pub image: Option<String>,
    pub like_count: i64,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostWithDetails {
    #[serde(flatten)]
    pub post: Post,
    pub hashtags: Vec<Hashtag>,
    pub liked_by_me: bool,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreatePostRequest {
    #[validate(length(min = 1, max = 5000, message = "Content must be 1 to 5000 characters long."))]
    pub content: String,

    #[serde(default)]
    pub hashtags: Vec<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct UpdatePostRequest {
    #[validate(length(min = 1, max = 5000, message = "Content must be 1 to 5000 characters long."))]
    pub content: Option<String>,

    pub hashtags: Option<Vec<i64>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PostListQuery {
    /// 逗号分隔的标签 ID，例如 `?hashtags=1,3`
    pub hashtags: Option<String>,
    pub author: Option<i64>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// 解析后的帖子过滤条件
#[derive(Debug, Default, Clone)]
pub struct PostFilter {
    pub hashtag_ids: Vec<i64>,
    pub author_id: Option<i64>,
    pub search: Option<String>,
    /// 只看该资料自己及其关注对象的帖子
    pub feed_for: Option<i64>,
}

impl PostListQuery {
    /// 解析查询参数，`hashtags=1,2` 中的非整数 ID 返回 400
    pub fn to_filter(&self) -> Result<PostFilter> {
        Ok(PostFilter {
            hashtag_ids: match &self.hashtags {
                Some(raw) => parse_id_list(raw)?,
                None => Vec::new(),
            },
            author_id: self.author,
            search: self
                .search
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            feed_for: None,
        })
    }
}

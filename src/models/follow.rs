use serde::{Deserialize, Serialize};

/// 关注操作之后的关系状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowStatus {
    pub profile_id: i64,
    pub is_following: bool,
    pub followers_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct FollowQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

use crate::{
    config::Config,
    error::{AppError, Result},
    services::{
        database::{Database, Pagination},
        AuthService, CommentService, FollowService, HashtagService, LikeService, MediaService,
        PostService, ProfileService, UserService,
    },
};
use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use std::{num::NonZeroU32, sync::Arc};
use tracing::info;

/// 按客户端 IP 计数的限流器
pub type KeyedRateLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

/// 应用程序的共享状态
/// 包含所有服务和配置的引用
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 数据库连接
    pub db: Arc<Database>,

    /// 认证服务
    pub auth_service: AuthService,

    /// 用户服务
    pub user_service: UserService,

    /// 资料服务
    pub profile_service: ProfileService,

    /// 关注服务
    pub follow_service: FollowService,

    /// 帖子服务
    pub post_service: PostService,

    /// 标签服务
    pub hashtag_service: HashtagService,

    /// 评论服务
    pub comment_service: CommentService,

    /// 点赞服务
    pub like_service: LikeService,

    /// 媒体服务
    pub media_service: MediaService,

    pub rate_limiter: KeyedRateLimiter,
}

impl AppState {
    /// 连接数据库并初始化所有服务
    pub async fn new(config: Config) -> Result<Self> {
        let db = Arc::new(Database::new(&config).await?);

        let auth_service = AuthService::new(&config, db.clone()).await?;
        let user_service = UserService::new(db.clone()).await?;
        let follow_service = FollowService::new(db.clone()).await?;
        let profile_service = ProfileService::new(db.clone(), follow_service.clone()).await?;
        let hashtag_service = HashtagService::new(db.clone()).await?;
        let like_service = LikeService::new(db.clone()).await?;
        let post_service = PostService::new(db.clone(), hashtag_service.clone(), like_service.clone()).await?;
        let comment_service = CommentService::new(db.clone()).await?;
        let media_service = MediaService::new(&config).await?;

        let per_minute = NonZeroU32::new(config.rate_limit_requests)
            .ok_or_else(|| AppError::internal("RATE_LIMIT_REQUESTS must be greater than zero"))?;
        let rate_limiter = RateLimiter::dashmap(Quota::per_minute(per_minute));

        info!("Application state initialized");

        Ok(Self {
            config,
            db,
            auth_service,
            user_service,
            profile_service,
            follow_service,
            post_service,
            hashtag_service,
            comment_service,
            like_service,
            media_service,
            rate_limiter,
        })
    }

    /// 清除限流窗口已恢复的客户端，返回仍在跟踪的数量
    pub fn prune_rate_limiter(&self) -> usize {
        self.rate_limiter.retain_recent();
        self.rate_limiter.shrink_to_fit();
        self.rate_limiter.len()
    }

    /// 按配置的默认页大小构造分页参数
    pub fn pagination(&self, page: Option<u32>, limit: Option<u32>) -> Pagination {
        Pagination::new(page, limit, self.config.default_page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prune_keeps_recently_limited_clients() {
        let state = AppState::new(Config::for_tests()).await.unwrap();
        assert_eq!(state.prune_rate_limiter(), 0);

        state.rate_limiter.check_key(&"203.0.113.7".to_string()).unwrap();
        assert_eq!(state.prune_rate_limiter(), 1);
    }
}

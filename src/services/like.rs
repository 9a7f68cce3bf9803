use crate::{
    error::{AppError, Result},
    models::like::*,
    services::{
        database::{PaginatedResult, Pagination},
        Database,
    },
    utils::permissions::ensure_owner,
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use std::sync::Arc;
use tracing::{debug, info};

const LIKE_SELECT: &str = r#"
    SELECT l.id, l.profile_id, pr.username, l.post_id, l.created_at
    FROM likes l
    JOIN profiles pr ON pr.id = l.profile_id
"#;

#[derive(Clone)]
pub struct LikeService {
    db: Arc<Database>,
}

impl LikeService {
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self { db })
    }

    /// 已点赞则取消，否则点赞；并发重复请求最多产生一条记录
    pub async fn toggle_like(&self, profile_id: i64, post_id: i64) -> Result<LikeToggleResponse> {
        debug!("Profile {} toggling like on post {}", profile_id, post_id);

        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_one(self.db.pool())
            .await?;
        if exists == 0 {
            return Err(AppError::not_found("Post"));
        }

        let mut tx = self.db.begin_transaction().await?;

        let removed = sqlx::query("DELETE FROM likes WHERE profile_id = ? AND post_id = ?")
            .bind(profile_id)
            .bind(post_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if removed == 0 {
            sqlx::query(
                r#"
                INSERT INTO likes (profile_id, post_id, created_at)
                VALUES (?, ?, ?)
                ON CONFLICT (profile_id, post_id) DO NOTHING
                "#,
            )
            .bind(profile_id)
            .bind(post_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }

        let like_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM likes WHERE post_id = ?")
            .bind(post_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        let liked = removed == 0;
        info!("Profile {} {} post {}", profile_id, if liked { "liked" } else { "unliked" }, post_id);

        Ok(LikeToggleResponse {
            post_id,
            liked,
            like_count,
        })
    }

    pub async fn get_like(&self, like_id: i64) -> Result<Like> {
        let query = format!("{} WHERE l.id = ?", LIKE_SELECT);
        sqlx::query_as::<_, Like>(&query)
            .bind(like_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AppError::not_found("Like"))
    }

    /// 按帖子和/或资料过滤点赞，最新的在前
    pub async fn list_likes(
        &self,
        post_id: Option<i64>,
        profile_id: Option<i64>,
        pagination: Pagination,
    ) -> Result<PaginatedResult<Like>> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM likes l WHERE 1 = 1");
        let mut list_query = QueryBuilder::<Sqlite>::new(LIKE_SELECT);
        list_query.push(" WHERE 1 = 1");

        for query in [&mut count_query, &mut list_query] {
            if let Some(post_id) = post_id {
                query.push(" AND l.post_id = ").push_bind(post_id);
            }
            if let Some(profile_id) = profile_id {
                query.push(" AND l.profile_id = ").push_bind(profile_id);
            }
        }

        list_query
            .push(" ORDER BY l.created_at DESC, l.id DESC LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(self.db.pool())
            .await?;
        let likes: Vec<Like> = list_query
            .build_query_as()
            .fetch_all(self.db.pool())
            .await?;

        Ok(PaginatedResult::new(likes, total, pagination))
    }

    /// 只有点赞者本人可以删除
    pub async fn delete_like(&self, user_id: i64, like_id: i64) -> Result<()> {
        let owner: Option<i64> = sqlx::query_scalar(
            "SELECT pr.user_id FROM likes l JOIN profiles pr ON pr.id = l.profile_id WHERE l.id = ?",
        )
        .bind(like_id)
        .fetch_optional(self.db.pool())
        .await?;
        let owner = owner.ok_or_else(|| AppError::not_found("Like"))?;
        ensure_owner(user_id, owner, "like")?;

        sqlx::query("DELETE FROM likes WHERE id = ?")
            .bind(like_id)
            .execute(self.db.pool())
            .await?;

        info!("Like {} deleted by user {}", like_id, user_id);
        Ok(())
    }

    pub async fn has_liked(&self, profile_id: i64, post_id: i64) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM likes WHERE profile_id = ? AND post_id = ?")
                .bind(profile_id)
                .bind(post_id)
                .fetch_one(self.db.pool())
                .await?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    /// 两个用户各一个资料，第一个资料发了一条帖子；返回 (服务, 资料ID, 帖子ID)
    async fn setup() -> (LikeService, Vec<i64>, i64) {
        let db = Arc::new(Database::new(&Config::for_tests()).await.unwrap());
        let now = Utc::now();
        let mut profiles = Vec::new();
        for i in 0..2 {
            let user_id: i64 = sqlx::query_scalar(
                "INSERT INTO users (email, password_hash, date_joined) VALUES (?, 'x', ?) RETURNING id",
            )
            .bind(format!("liker{}@example.com", i))
            .bind(now)
            .fetch_one(db.pool())
            .await
            .unwrap();
            let profile_id: i64 = sqlx::query_scalar(
                "INSERT INTO profiles (user_id, username, created_at, updated_at) VALUES (?, ?, ?, ?) RETURNING id",
            )
            .bind(user_id)
            .bind(format!("liker{}", i))
            .bind(now)
            .bind(now)
            .fetch_one(db.pool())
            .await
            .unwrap();
            profiles.push(profile_id);
        }
        let post_id: i64 = sqlx::query_scalar(
            "INSERT INTO posts (profile_id, content, created_at, updated_at) VALUES (?, 'hi', ?, ?) RETURNING id",
        )
        .bind(profiles[0])
        .bind(now)
        .bind(now)
        .fetch_one(db.pool())
        .await
        .unwrap();

        (LikeService::new(db).await.unwrap(), profiles, post_id)
    }

    #[tokio::test]
    async fn test_toggle_twice_returns_to_zero() {
        let (likes, profiles, post_id) = setup().await;

        let first = likes.toggle_like(profiles[1], post_id).await.unwrap();
        assert!(first.liked);
        assert_eq!(first.like_count, 1);
        assert!(likes.has_liked(profiles[1], post_id).await.unwrap());

        let second = likes.toggle_like(profiles[1], post_id).await.unwrap();
        assert!(!second.liked);
        assert_eq!(second.like_count, 0);
    }

    #[tokio::test]
    async fn test_duplicate_like_rows_impossible() {
        let (likes, profiles, post_id) = setup().await;
        likes.toggle_like(profiles[0], post_id).await.unwrap();

        let result = sqlx::query("INSERT INTO likes (profile_id, post_id, created_at) VALUES (?, ?, ?)")
            .bind(profiles[0])
            .bind(post_id)
            .bind(Utc::now())
            .execute(likes.db.pool())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_toggle_unknown_post() {
        let (likes, profiles, _) = setup().await;
        assert!(matches!(
            likes.toggle_like(profiles[0], 4242).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let (likes, profiles, post_id) = setup().await;
        likes.toggle_like(profiles[0], post_id).await.unwrap();
        likes.toggle_like(profiles[1], post_id).await.unwrap();

        let all = Pagination::new(None, None, 20);
        assert_eq!(likes.list_likes(Some(post_id), None, all).await.unwrap().total, 2);
        let mine = likes.list_likes(None, Some(profiles[1]), all).await.unwrap();
        assert_eq!(mine.total, 1);
        assert_eq!(mine.data[0].username, "liker1");

        let like = likes.get_like(mine.data[0].id).await.unwrap();
        let liker_user: i64 = sqlx::query_scalar("SELECT user_id FROM profiles WHERE id = ?")
            .bind(profiles[1])
            .fetch_one(likes.db.pool())
            .await
            .unwrap();
        let other_user: i64 = sqlx::query_scalar("SELECT user_id FROM profiles WHERE id = ?")
            .bind(profiles[0])
            .fetch_one(likes.db.pool())
            .await
            .unwrap();

        assert!(matches!(
            likes.delete_like(other_user, like.id).await,
            Err(AppError::Authorization(_))
        ));
        likes.delete_like(liker_user, like.id).await.unwrap();
        assert!(matches!(likes.get_like(like.id).await, Err(AppError::NotFound(_))));
    }
}

use crate::{
    error::{AppError, Result},
    models::{follow::*, profile::Profile},
    services::{
        database::{PaginatedResult, Pagination},
        profile::PROFILE_SELECT,
        Database,
    },
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct FollowService {
    db: Arc<Database>,
}

impl FollowService {
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self { db })
    }

    async fn check_target(&self, follower_id: i64, following_id: i64) -> Result<()> {
        // 防止自己关注自己
        if follower_id == following_id {
            return Err(AppError::bad_request("You cannot follow yourself."));
        }

        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles WHERE id = ?")
            .bind(following_id)
            .fetch_one(self.db.pool())
            .await?;
        if exists == 0 {
            return Err(AppError::not_found("Profile"));
        }

        Ok(())
    }

    /// 确认批量关注的目标资料都存在，错误归到 `field` 字段下
    pub async fn ensure_targets_exist(&self, field: &str, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut unique = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let mut query = QueryBuilder::<Sqlite>::new("SELECT id FROM profiles WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in &unique {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let found: Vec<i64> = query
            .build_query_scalar()
            .fetch_all(self.db.pool())
            .await?;

        if let Some(missing) = unique.iter().find(|id| !found.contains(id)) {
            return Err(AppError::invalid_field(
                field,
                &format!("Invalid pk \"{}\" - object does not exist.", missing),
            ));
        }

        Ok(())
    }

    /// 关注，已关注时不做任何改变
    pub async fn follow(&self, follower_id: i64, following_id: i64) -> Result<FollowStatus> {
        debug!("Profile {} following profile {}", follower_id, following_id);
        self.check_target(follower_id, following_id).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO follows (follower_id, following_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT (follower_id, following_id) DO NOTHING
            "#,
        )
        .bind(follower_id)
        .bind(following_id)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() > 0 {
            info!("Profile {} now follows profile {}", follower_id, following_id);
        }

        self.status(follower_id, following_id).await
    }

    /// 取消关注，未关注时不做任何改变
    pub async fn unfollow(&self, follower_id: i64, following_id: i64) -> Result<FollowStatus> {
        debug!("Profile {} unfollowing profile {}", follower_id, following_id);
        self.check_target(follower_id, following_id).await?;

        let result = sqlx::query("DELETE FROM follows WHERE follower_id = ? AND following_id = ?")
            .bind(follower_id)
            .bind(following_id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() > 0 {
            info!("Profile {} unfollowed profile {}", follower_id, following_id);
        }

        self.status(follower_id, following_id).await
    }

    /// 切换关注状态
    pub async fn toggle_follow(&self, follower_id: i64, following_id: i64) -> Result<FollowStatus> {
        self.check_target(follower_id, following_id).await?;

        let mut tx = self.db.begin_transaction().await?;

        let removed = sqlx::query("DELETE FROM follows WHERE follower_id = ? AND following_id = ?")
            .bind(follower_id)
            .bind(following_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if removed == 0 {
            sqlx::query(
                r#"
                INSERT INTO follows (follower_id, following_id, created_at)
                VALUES (?, ?, ?)
                ON CONFLICT (follower_id, following_id) DO NOTHING
                "#,
            )
            .bind(follower_id)
            .bind(following_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            "Profile {} toggled follow on {} (following: {})",
            follower_id,
            following_id,
            removed == 0
        );
        self.status(follower_id, following_id).await
    }

    pub async fn is_following(&self, follower_id: i64, following_id: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM follows WHERE follower_id = ? AND following_id = ?",
        )
        .bind(follower_id)
        .bind(following_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(count > 0)
    }

    async fn status(&self, follower_id: i64, following_id: i64) -> Result<FollowStatus> {
        let followers_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE following_id = ?")
                .bind(following_id)
                .fetch_one(self.db.pool())
                .await?;

        Ok(FollowStatus {
            profile_id: following_id,
            is_following: self.is_following(follower_id, following_id).await?,
            followers_count,
        })
    }

    /// 关注了 `profile_id` 的资料，最近关注的在前
    pub async fn get_followers(&self, profile_id: i64, pagination: Pagination) -> Result<PaginatedResult<Profile>> {
        self.related_profiles(profile_id, "following_id", "follower_id", pagination)
            .await
    }

    /// `profile_id` 关注的资料，最近关注的在前
    pub async fn get_following(&self, profile_id: i64, pagination: Pagination) -> Result<PaginatedResult<Profile>> {
        self.related_profiles(profile_id, "follower_id", "following_id", pagination)
            .await
    }

    async fn related_profiles(
        &self,
        profile_id: i64,
        anchor_column: &str,
        other_column: &str,
        pagination: Pagination,
    ) -> Result<PaginatedResult<Profile>> {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles WHERE id = ?")
            .bind(profile_id)
            .fetch_one(self.db.pool())
            .await?;
        if exists == 0 {
            return Err(AppError::not_found("Profile"));
        }

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM follows WHERE {} = ?",
            anchor_column
        ))
        .bind(profile_id)
        .fetch_one(self.db.pool())
        .await?;

        let query = format!(
            "{} JOIN follows fl ON fl.{} = p.id WHERE fl.{} = ? ORDER BY fl.created_at DESC, fl.id DESC LIMIT ? OFFSET ?",
            PROFILE_SELECT, other_column, anchor_column
        );
        let profiles = sqlx::query_as::<_, Profile>(&query)
            .bind(profile_id)
            .bind(pagination.limit())
            .bind(pagination.offset())
            .fetch_all(self.db.pool())
            .await?;

        Ok(PaginatedResult::new(profiles, total, pagination))
    }
}

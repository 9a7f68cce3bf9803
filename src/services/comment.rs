use crate::{
    error::{AppError, Result},
    models::comment::*,
    services::{
        database::{PaginatedResult, Pagination},
        Database,
    },
    utils::permissions::ensure_owner,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use validator::Validate;

const COMMENT_SELECT: &str = r#"
    SELECT c.id, c.post_id, c.profile_id, pr.username AS author_username, c.content, c.created_at, c.updated_at
    FROM comments c
    JOIN profiles pr ON pr.id = c.profile_id
"#;

#[derive(Clone)]
pub struct CommentService {
    db: Arc<Database>,
}

impl CommentService {
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self { db })
    }

    async fn post_exists(&self, post_id: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count > 0)
    }

    /// `POST /comments`：帖子 ID 在请求体里，不存在时是字段错误
    pub async fn create_comment(&self, profile_id: i64, request: CreateCommentRequest) -> Result<Comment> {
        request.validate()?;

        if !self.post_exists(request.post_id).await? {
            return Err(AppError::invalid_field(
                "post_id",
                &format!("Invalid pk \"{}\" - object does not exist.", request.post_id),
            ));
        }

        self.insert(profile_id, request.post_id, &request.content).await
    }

    /// `POST /posts/{id}/add_comment`：帖子不存在时返回 404
    pub async fn add_comment(&self, profile_id: i64, post_id: i64, request: AddCommentRequest) -> Result<Comment> {
        request.validate()?;

        if !self.post_exists(post_id).await? {
            return Err(AppError::not_found("Post"));
        }

        self.insert(profile_id, post_id, &request.content).await
    }

    async fn insert(&self, profile_id: i64, post_id: i64, content: &str) -> Result<Comment> {
        debug!("Profile {} commenting on post {}", profile_id, post_id);

        let now = Utc::now();
        let comment_id: i64 = sqlx::query_scalar(
            "INSERT INTO comments (post_id, profile_id, content, created_at, updated_at) VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(post_id)
        .bind(profile_id)
        .bind(content)
        .bind(now)
        .bind(now)
        .fetch_one(self.db.pool())
        .await?;

        info!("Comment {} added to post {} by profile {}", comment_id, post_id, profile_id);
        self.get_comment(comment_id).await
    }

    pub async fn get_comment(&self, comment_id: i64) -> Result<Comment> {
        let query = format!("{} WHERE c.id = ?", COMMENT_SELECT);
        sqlx::query_as::<_, Comment>(&query)
            .bind(comment_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AppError::not_found("Comment"))
    }

    /// 帖子的评论，按创建时间升序
    pub async fn list_post_comments(&self, post_id: i64, pagination: Pagination) -> Result<PaginatedResult<Comment>> {
        if !self.post_exists(post_id).await? {
            return Err(AppError::not_found("Post"));
        }

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE post_id = ?")
            .bind(post_id)
            .fetch_one(self.db.pool())
            .await?;

        let query = format!(
            "{} WHERE c.post_id = ? ORDER BY c.created_at ASC, c.id ASC LIMIT ? OFFSET ?",
            COMMENT_SELECT
        );
        let comments = sqlx::query_as::<_, Comment>(&query)
            .bind(post_id)
            .bind(pagination.limit())
            .bind(pagination.offset())
            .fetch_all(self.db.pool())
            .await?;

        Ok(PaginatedResult::new(comments, total, pagination))
    }

    /// 某个资料写的评论，最新的在前
    pub async fn list_profile_comments(&self, profile_id: i64, pagination: Pagination) -> Result<PaginatedResult<Comment>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE profile_id = ?")
            .bind(profile_id)
            .fetch_one(self.db.pool())
            .await?;

        let query = format!(
            "{} WHERE c.profile_id = ? ORDER BY c.created_at DESC, c.id DESC LIMIT ? OFFSET ?",
            COMMENT_SELECT
        );
        let comments = sqlx::query_as::<_, Comment>(&query)
            .bind(profile_id)
            .bind(pagination.limit())
            .bind(pagination.offset())
            .fetch_all(self.db.pool())
            .await?;

        Ok(PaginatedResult::new(comments, total, pagination))
    }

    async fn owner_user_id(&self, comment_id: i64) -> Result<i64> {
        let owner: Option<i64> = sqlx::query_scalar(
            "SELECT pr.user_id FROM comments c JOIN profiles pr ON pr.id = c.profile_id WHERE c.id = ?",
        )
        .bind(comment_id)
        .fetch_optional(self.db.pool())
        .await?;
        owner.ok_or_else(|| AppError::not_found("Comment"))
    }

    pub async fn update_comment(&self, user_id: i64, comment_id: i64, request: UpdateCommentRequest) -> Result<Comment> {
        ensure_owner(user_id, self.owner_user_id(comment_id).await?, "comment")?;
        request.validate()?;

        sqlx::query("UPDATE comments SET content = ?, updated_at = ? WHERE id = ?")
            .bind(&request.content)
            .bind(Utc::now())
            .bind(comment_id)
            .execute(self.db.pool())
            .await?;

        info!("Comment {} updated by user {}", comment_id, user_id);
        self.get_comment(comment_id).await
    }

    pub async fn delete_comment(&self, user_id: i64, comment_id: i64) -> Result<()> {
        ensure_owner(user_id, self.owner_user_id(comment_id).await?, "comment")?;

        sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(comment_id)
            .execute(self.db.pool())
            .await?;

        info!("Comment {} deleted by user {}", comment_id, user_id);
        Ok(())
    }
}

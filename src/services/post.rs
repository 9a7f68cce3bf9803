use crate::{
    error::{AppError, Result},
    models::post::*,
    services::{
        database::{contains_pattern, PaginatedResult, Pagination},
        Database, HashtagService, LikeService,
    },
    utils::permissions::ensure_owner,
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use std::sync::Arc;
use tracing::{debug, info};
use validator::Validate;

const POST_SELECT: &str = r#"
    SELECT
        po.id, po.profile_id, pr.username AS author_username, po.content, po.image,
        (SELECT COUNT(*) FROM likes l WHERE l.post_id = po.id) AS like_count,
        (SELECT COUNT(*) FROM comments c WHERE c.post_id = po.id) AS comment_count,
        po.created_at, po.updated_at
    FROM posts po
    JOIN profiles pr ON pr.id = po.profile_id
"#;

#[derive(Clone)]
pub struct PostService {
    db: Arc<Database>,
    hashtag_service: HashtagService,
    like_service: LikeService,
}

impl PostService {
    pub async fn new(db: Arc<Database>, hashtag_service: HashtagService, like_service: LikeService) -> Result<Self> {
        Ok(Self {
            db,
            hashtag_service,
            like_service,
        })
    }

    pub async fn create_post(&self, profile_id: i64, request: CreatePostRequest) -> Result<PostWithDetails> {
        request.validate()?;
        debug!("Profile {} creating post with hashtags {:?}", profile_id, request.hashtags);

        self.hashtag_service.ensure_exist(&request.hashtags).await?;

        let now = Utc::now();
        let mut tx = self.db.begin_transaction().await?;

        let post_id: i64 = sqlx::query_scalar(
            "INSERT INTO posts (profile_id, content, created_at, updated_at) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(profile_id)
        .bind(&request.content)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for hashtag_id in &request.hashtags {
            sqlx::query("INSERT INTO post_hashtags (post_id, hashtag_id) VALUES (?, ?) ON CONFLICT DO NOTHING")
                .bind(post_id)
                .bind(hashtag_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        info!("Post {} created by profile {}", post_id, profile_id);
        self.get_post_details(post_id, Some(profile_id)).await
    }

    pub async fn get_post(&self, post_id: i64) -> Result<Post> {
        let query = format!("{} WHERE po.id = ?", POST_SELECT);
        sqlx::query_as::<_, Post>(&query)
            .bind(post_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AppError::not_found("Post"))
    }

    /// `viewer` 为请求者的资料 ID，用于计算 `liked_by_me`
    pub async fn get_post_details(&self, post_id: i64, viewer: Option<i64>) -> Result<PostWithDetails> {
        let post = self.get_post(post_id).await?;
        self.with_details(post, viewer).await
    }

    async fn with_details(&self, post: Post, viewer: Option<i64>) -> Result<PostWithDetails> {
        let hashtags = self.hashtag_service.hashtags_for_post(post.id).await?;
        let liked_by_me = match viewer {
            Some(profile_id) => self.like_service.has_liked(profile_id, post.id).await?,
            None => false,
        };
        Ok(PostWithDetails {
            post,
            hashtags,
            liked_by_me,
        })
    }

    fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &PostFilter) {
        query.push(" WHERE 1 = 1");

        if !filter.hashtag_ids.is_empty() {
            // 子查询保证同一帖子匹配多个标签时只出现一次
            query.push(" AND po.id IN (SELECT ph.post_id FROM post_hashtags ph WHERE ph.hashtag_id IN (");
            let mut separated = query.separated(", ");
            for id in &filter.hashtag_ids {
                separated.push_bind(*id);
            }
            separated.push_unseparated("))");
        }
        if let Some(author_id) = filter.author_id {
            query.push(" AND po.profile_id = ").push_bind(author_id);
        }
        if let Some(search) = &filter.search {
            query
                .push(" AND po.content LIKE ")
                .push_bind(contains_pattern(search))
                .push(" ESCAPE '\\'");
        }
        if let Some(profile_id) = filter.feed_for {
            query
                .push(" AND (po.profile_id = ")
                .push_bind(profile_id)
                .push(" OR po.profile_id IN (SELECT f.following_id FROM follows f WHERE f.follower_id = ")
                .push_bind(profile_id)
                .push("))");
        }
    }

    /// 帖子列表，最新的在前
    pub async fn list_posts(
        &self,
        filter: &PostFilter,
        viewer: Option<i64>,
        pagination: Pagination,
    ) -> Result<PaginatedResult<PostWithDetails>> {
        debug!("Listing posts with filter {:?}", filter);

        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM posts po");
        Self::push_filters(&mut count_query, filter);

        let mut list_query = QueryBuilder::<Sqlite>::new(POST_SELECT);
        Self::push_filters(&mut list_query, filter);
        list_query
            .push(" ORDER BY po.created_at DESC, po.id DESC LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(self.db.pool())
            .await?;
        let posts: Vec<Post> = list_query
            .build_query_as()
            .fetch_all(self.db.pool())
            .await?;

        let mut data = Vec::with_capacity(posts.len());
        for post in posts {
            data.push(self.with_details(post, viewer).await?);
        }

        Ok(PaginatedResult::new(data, total, pagination))
    }

    /// 自己和关注对象的帖子
    pub async fn feed(&self, profile_id: i64, pagination: Pagination) -> Result<PaginatedResult<PostWithDetails>> {
        let filter = PostFilter {
            feed_for: Some(profile_id),
            ..Default::default()
        };
        self.list_posts(&filter, Some(profile_id), pagination).await
    }

    /// 帖子作者对应的账户 ID
    async fn owner_user_id(&self, post_id: i64) -> Result<i64> {
        let owner: Option<i64> = sqlx::query_scalar(
            "SELECT pr.user_id FROM posts po JOIN profiles pr ON pr.id = po.profile_id WHERE po.id = ?",
        )
        .bind(post_id)
        .fetch_optional(self.db.pool())
        .await?;
        owner.ok_or_else(|| AppError::not_found("Post"))
    }

    pub async fn update_post(&self, user_id: i64, post_id: i64, request: UpdatePostRequest) -> Result<PostWithDetails> {
        ensure_owner(user_id, self.owner_user_id(post_id).await?, "post")?;
        request.validate()?;

        if let Some(hashtags) = &request.hashtags {
            self.hashtag_service.ensure_exist(hashtags).await?;
        }

        let mut tx = self.db.begin_transaction().await?;

        sqlx::query("UPDATE posts SET content = COALESCE(?, content), updated_at = ? WHERE id = ?")
            .bind(&request.content)
            .bind(Utc::now())
            .bind(post_id)
            .execute(&mut *tx)
            .await?;

        if let Some(hashtags) = &request.hashtags {
            sqlx::query("DELETE FROM post_hashtags WHERE post_id = ?")
                .bind(post_id)
                .execute(&mut *tx)
                .await?;
            for hashtag_id in hashtags {
                sqlx::query("INSERT INTO post_hashtags (post_id, hashtag_id) VALUES (?, ?) ON CONFLICT DO NOTHING")
                    .bind(post_id)
                    .bind(hashtag_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;

        info!("Post {} updated by user {}", post_id, user_id);
        let viewer: Option<i64> = sqlx::query_scalar("SELECT profile_id FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(self.db.pool())
            .await?;
        self.get_post_details(post_id, viewer).await
    }

    /// 删除帖子，返回被删除的帖子（调用方据此清理图片）
    pub async fn delete_post(&self, user_id: i64, post_id: i64) -> Result<Post> {
        ensure_owner(user_id, self.owner_user_id(post_id).await?, "post")?;
        let post = self.get_post(post_id).await?;

        sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(post_id)
            .execute(self.db.pool())
            .await?;

        info!("Post {} deleted by user {}", post_id, user_id);
        Ok(post)
    }

    /// 某个资料所有帖子的图片 URL
    pub async fn image_urls_for_profile(&self, profile_id: i64) -> Result<Vec<String>> {
        let urls = sqlx::query_scalar("SELECT image FROM posts WHERE profile_id = ? AND image IS NOT NULL")
            .bind(profile_id)
            .fetch_all(self.db.pool())
            .await?;
        Ok(urls)
    }

    /// 只检查所有权，供上传图片前调用
    pub async fn ensure_author(&self, user_id: i64, post_id: i64) -> Result<()> {
        ensure_owner(user_id, self.owner_user_id(post_id).await?, "post")
    }

    /// 设置帖子图片，返回更新后的帖子和旧图片 URL
    pub async fn set_image(&self, user_id: i64, post_id: i64, image_url: &str) -> Result<(PostWithDetails, Option<String>)> {
        self.ensure_author(user_id, post_id).await?;
        let previous = self.get_post(post_id).await?;

        sqlx::query("UPDATE posts SET image = ?, updated_at = ? WHERE id = ?")
            .bind(image_url)
            .bind(Utc::now())
            .bind(post_id)
            .execute(self.db.pool())
            .await?;

        let details = self.get_post_details(post_id, Some(previous.profile_id)).await?;
        Ok((details, previous.image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, models::hashtag::HashtagRequest};

    struct Fixture {
        db: Arc<Database>,
        posts: PostService,
        hashtags: HashtagService,
        likes: LikeService,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(Database::new(&Config::for_tests()).await.unwrap());
        let hashtags = HashtagService::new(db.clone()).await.unwrap();
        let likes = LikeService::new(db.clone()).await.unwrap();
        Fixture {
            posts: PostService::new(db.clone(), hashtags.clone(), likes.clone()).await.unwrap(),
            db,
            hashtags,
            likes,
        }
    }

    /// 返回 (user_id, profile_id)
    async fn account(fx: &Fixture, name: &str) -> (i64, i64) {
        let now = Utc::now();
        let user_id: i64 = sqlx::query_scalar(
            "INSERT INTO users (email, password_hash, date_joined) VALUES (?, 'x', ?) RETURNING id",
        )
        .bind(format!("{}@example.com", name))
        .bind(now)
        .fetch_one(fx.db.pool())
        .await
        .unwrap();
        let profile_id: i64 = sqlx::query_scalar(
            "INSERT INTO profiles (user_id, username, created_at, updated_at) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(user_id)
        .bind(name)
        .bind(now)
        .bind(now)
        .fetch_one(fx.db.pool())
        .await
        .unwrap();
        (user_id, profile_id)
    }

    fn post(content: &str, hashtags: Vec<i64>) -> CreatePostRequest {
        CreatePostRequest {
            content: content.to_string(),
            hashtags,
        }
    }

    async fn tag(fx: &Fixture, name: &str) -> i64 {
        fx.hashtags
            .create_hashtag(HashtagRequest {
                name: name.to_string(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_create_with_hashtags() {
        let fx = fixture().await;
        let (_, profile) = account(&fx, "alice").await;
        let rust = tag(&fx, "rust").await;

        let created = fx.posts.create_post(profile, post("hello", vec![rust, rust])).await.unwrap();
        assert_eq!(created.post.author_username, "alice");
        assert_eq!(created.hashtags.len(), 1);
        assert!(!created.liked_by_me);

        let err = fx.posts.create_post(profile, post("bad", vec![999])).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidField { .. }));
    }

    #[tokio::test]
    async fn test_filter_by_hashtags_is_distinct() {
        let fx = fixture().await;
        let (_, profile) = account(&fx, "bob").await;
        let a = tag(&fx, "a").await;
        let b = tag(&fx, "b").await;

        fx.posts.create_post(profile, post("both", vec![a, b])).await.unwrap();
        fx.posts.create_post(profile, post("only a", vec![a])).await.unwrap();
        fx.posts.create_post(profile, post("none", vec![])).await.unwrap();

        let filter = PostFilter {
            hashtag_ids: vec![a, b],
            ..Default::default()
        };
        let page = fx.posts.list_posts(&filter, None, Pagination::new(None, None, 20)).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.data.len(), 2);
        // 最新的在前
        assert_eq!(page.data[0].post.content, "only a");
    }

    #[tokio::test]
    async fn test_search_and_author_filters() {
        let fx = fixture().await;
        let (_, alice) = account(&fx, "alice").await;
        let (_, bob) = account(&fx, "bob").await;
        fx.posts.create_post(alice, post("Rust is 100% fun", vec![])).await.unwrap();
        fx.posts.create_post(bob, post("rust again", vec![])).await.unwrap();

        let all = Pagination::new(None, None, 20);
        let search = PostFilter {
            search: Some("RUST".to_string()),
            ..Default::default()
        };
        assert_eq!(fx.posts.list_posts(&search, None, all).await.unwrap().total, 2);

        let percent = PostFilter {
            search: Some("100%".to_string()),
            ..Default::default()
        };
        assert_eq!(fx.posts.list_posts(&percent, None, all).await.unwrap().total, 1);

        let by_bob = PostFilter {
            author_id: Some(bob),
            ..Default::default()
        };
        let page = fx.posts.list_posts(&by_bob, None, all).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.data[0].post.author_username, "bob");
    }

    #[tokio::test]
    async fn test_feed_contains_own_and_followed() {
        let fx = fixture().await;
        let (_, alice) = account(&fx, "alice").await;
        let (_, bob) = account(&fx, "bob").await;
        let (_, carol) = account(&fx, "carol").await;

        sqlx::query("INSERT INTO follows (follower_id, following_id, created_at) VALUES (?, ?, ?)")
            .bind(alice)
            .bind(bob)
            .bind(Utc::now())
            .execute(fx.db.pool())
            .await
            .unwrap();

        fx.posts.create_post(alice, post("mine", vec![])).await.unwrap();
        fx.posts.create_post(bob, post("followed", vec![])).await.unwrap();
        fx.posts.create_post(carol, post("stranger", vec![])).await.unwrap();

        let feed = fx.posts.feed(alice, Pagination::new(None, None, 20)).await.unwrap();
        let contents: Vec<&str> = feed.data.iter().map(|p| p.post.content.as_str()).collect();
        assert_eq!(contents, vec!["followed", "mine"]);
    }

    #[tokio::test]
    async fn test_only_author_can_modify() {
        let fx = fixture().await;
        let (alice_user, alice) = account(&fx, "alice").await;
        let (bob_user, _) = account(&fx, "bob").await;
        let created = fx.posts.create_post(alice, post("original", vec![])).await.unwrap();
        let id = created.post.id;

        let patch = UpdatePostRequest {
            content: Some("hijacked".to_string()),
            hashtags: None,
        };
        assert!(matches!(
            fx.posts.update_post(bob_user, id, patch).await,
            Err(AppError::Authorization(_))
        ));
        assert!(matches!(
            fx.posts.delete_post(bob_user, id).await,
            Err(AppError::Authorization(_))
        ));

        let patch = UpdatePostRequest {
            content: None,
            hashtags: Some(vec![tag(&fx, "edited").await]),
        };
        let updated = fx.posts.update_post(alice_user, id, patch).await.unwrap();
        assert_eq!(updated.post.content, "original");
        assert_eq!(updated.hashtags[0].name, "edited");

        fx.posts.delete_post(alice_user, id).await.unwrap();
        assert!(matches!(fx.posts.get_post(id).await, Err(AppError::NotFound(_))));
        assert!(matches!(
            fx.posts.delete_post(alice_user, id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_counts_and_liked_by_me() {
        let fx = fixture().await;
        let (_, alice) = account(&fx, "alice").await;
        let (_, bob) = account(&fx, "bob").await;
        let created = fx.posts.create_post(alice, post("like me", vec![])).await.unwrap();

        fx.likes.toggle_like(bob, created.post.id).await.unwrap();

        let seen_by_bob = fx.posts.get_post_details(created.post.id, Some(bob)).await.unwrap();
        assert_eq!(seen_by_bob.post.like_count, 1);
        assert!(seen_by_bob.liked_by_me);

        let anonymous = fx.posts.get_post_details(created.post.id, None).await.unwrap();
        assert!(!anonymous.liked_by_me);
    }
}

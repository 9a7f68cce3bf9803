use crate::{
    error::{AppError, Result},
    models::profile::*,
    services::{
        database::{contains_pattern, PaginatedResult, Pagination},
        Database, FollowService,
    },
    utils::{permissions::ensure_owner, validation::normalize_email},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use validator::Validate;

/// 资料查询的公共 SELECT，带关注统计；后面可以直接拼 JOIN / WHERE
pub const PROFILE_SELECT: &str = r#"
    SELECT
        p.id, p.user_id, p.username, p.first_name, p.last_name, p.bio, p.email, p.picture,
        (SELECT COUNT(*) FROM follows f WHERE f.following_id = p.id) AS followers_count,
        (SELECT COUNT(*) FROM follows f WHERE f.follower_id = p.id) AS following_count,
        p.created_at, p.updated_at
    FROM profiles p
"#;

const DUPLICATE_USERNAME: &str = "profile with this username already exists.";

#[derive(Clone)]
pub struct ProfileService {
    db: Arc<Database>,
    follow_service: FollowService,
}

impl ProfileService {
    pub async fn new(db: Arc<Database>, follow_service: FollowService) -> Result<Self> {
        Ok(Self { db, follow_service })
    }

    /// 获取或创建当前用户的资料，返回 (资料, 是否新建)
    pub async fn create_profile(&self, user_id: i64, request: CreateProfileRequest) -> Result<(Profile, bool)> {
        if let Some(existing) = self.get_by_user(user_id).await? {
            debug!("User {} already owns profile {}", user_id, existing.id);
            return Ok((existing, false));
        }

        request.validate()?;
        // 目标先校验，避免资料已写入而关注失败
        self.follow_service.ensure_targets_exist("follow", &request.follow).await?;

        let now = Utc::now();
        let mut tx = self.db.begin_transaction().await?;
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO profiles (user_id, username, first_name, last_name, bio, email, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, COALESCE(?, (SELECT email FROM users WHERE id = ?)), ?, ?)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(request.username.trim())
        .bind(request.first_name.unwrap_or_default())
        .bind(request.last_name.unwrap_or_default())
        .bind(request.bio.unwrap_or_default())
        .bind(request.email.as_deref().map(normalize_email))
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        let profile_id = match inserted {
            Ok(id) => id,
            Err(e) => {
                tx.rollback().await?;
                // 并发创建时 user_id 唯一约束冲突，返回已存在的资料
                if let Some(existing) = self.get_by_user(user_id).await? {
                    return Ok((existing, false));
                }
                return Err(AppError::from_unique_violation(e, "username", DUPLICATE_USERNAME));
            }
        };

        for target_id in &request.follow {
            sqlx::query(
                r#"
                INSERT INTO follows (follower_id, following_id, created_at)
                VALUES (?, ?, ?)
                ON CONFLICT (follower_id, following_id) DO NOTHING
                "#,
            )
            .bind(profile_id)
            .bind(target_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!("User {} created profile {}", user_id, profile_id);
        Ok((self.get_profile(profile_id).await?, true))
    }

    pub async fn get_profile(&self, profile_id: i64) -> Result<Profile> {
        let query = format!("{} WHERE p.id = ?", PROFILE_SELECT);
        sqlx::query_as::<_, Profile>(&query)
            .bind(profile_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AppError::not_found("Profile"))
    }

    pub async fn get_by_user(&self, user_id: i64) -> Result<Option<Profile>> {
        let query = format!("{} WHERE p.user_id = ?", PROFILE_SELECT);
        let profile = sqlx::query_as::<_, Profile>(&query)
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(profile)
    }

    /// 发帖、评论、点赞、关注都需要请求者先拥有资料
    pub async fn require_profile(&self, user_id: i64) -> Result<Profile> {
        self.get_by_user(user_id)
            .await?
            .ok_or_else(|| AppError::bad_request("Create a profile first"))
    }

    /// 资料列表，`search` 匹配用户名或邮箱子串（不区分大小写）
    pub async fn list_profiles(&self, search: Option<&str>, pagination: Pagination) -> Result<PaginatedResult<Profile>> {
        let pattern = search
            .filter(|term| !term.trim().is_empty())
            .map(contains_pattern);
        debug!("Listing profiles with pattern {:?}", pattern);

        const WHERE: &str = r#"
            WHERE (?1 IS NULL OR p.username LIKE ?1 ESCAPE '\' OR p.email LIKE ?1 ESCAPE '\')
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM profiles p {}", WHERE))
            .bind(&pattern)
            .fetch_one(self.db.pool())
            .await?;

        let query = format!("{} {} ORDER BY p.id LIMIT ?2 OFFSET ?3", PROFILE_SELECT, WHERE);
        let profiles = sqlx::query_as::<_, Profile>(&query)
            .bind(&pattern)
            .bind(pagination.limit())
            .bind(pagination.offset())
            .fetch_all(self.db.pool())
            .await?;

        Ok(PaginatedResult::new(profiles, total, pagination))
    }

    pub async fn update_profile(&self, user_id: i64, profile_id: i64, request: UpdateProfileRequest) -> Result<Profile> {
        request.validate()?;

        let mut profile = self.get_profile(profile_id).await?;
        ensure_owner(user_id, profile.user_id, "profile")?;

        if let Some(username) = request.username {
            profile.username = username.trim().to_string();
        }
        if let Some(first_name) = request.first_name {
            profile.first_name = first_name;
        }
        if let Some(last_name) = request.last_name {
            profile.last_name = last_name;
        }
        if let Some(bio) = request.bio {
            profile.bio = bio;
        }
        if let Some(email) = request.email {
            profile.email = normalize_email(&email);
        }

        sqlx::query(
            r#"
            UPDATE profiles
            SET username = ?, first_name = ?, last_name = ?, bio = ?, email = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&profile.username)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.bio)
        .bind(&profile.email)
        .bind(Utc::now())
        .bind(profile_id)
        .execute(self.db.pool())
        .await
        .map_err(|e| AppError::from_unique_violation(e, "username", DUPLICATE_USERNAME))?;

        info!("Profile {} updated", profile_id);
        self.get_profile(profile_id).await
    }

    /// 删除资料，其帖子、评论、点赞和关注关系一并删除
    pub async fn delete_profile(&self, user_id: i64, profile_id: i64) -> Result<()> {
        let profile = self.get_profile(profile_id).await?;
        ensure_owner(user_id, profile.user_id, "profile")?;

        sqlx::query("DELETE FROM profiles WHERE id = ?")
            .bind(profile_id)
            .execute(self.db.pool())
            .await?;

        info!("Profile {} deleted by user {}", profile_id, user_id);
        Ok(())
    }

    /// 更新头像路径，返回更新后的资料和旧头像路径
    pub async fn set_picture(&self, user_id: i64, profile_id: i64, picture: &str) -> Result<(Profile, Option<String>)> {
        let profile = self.get_profile(profile_id).await?;
        ensure_owner(user_id, profile.user_id, "profile")?;

        sqlx::query("UPDATE profiles SET picture = ?, updated_at = ? WHERE id = ?")
            .bind(picture)
            .bind(Utc::now())
            .bind(profile_id)
            .execute(self.db.pool())
            .await?;

        Ok((self.get_profile(profile_id).await?, profile.picture))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, models::user::RegisterRequest, services::UserService};

    struct Fixture {
        users: UserService,
        profiles: ProfileService,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(Database::new(&Config::for_tests()).await.unwrap());
        let follows = FollowService::new(db.clone()).await.unwrap();
        Fixture {
            users: UserService::new(db.clone()).await.unwrap(),
            profiles: ProfileService::new(db, follows).await.unwrap(),
        }
    }

    async fn register(fx: &Fixture, email: &str) -> i64 {
        fx.users
            .register(RegisterRequest {
                email: email.to_string(),
                password: "correct-horse".to_string(),
                password_confirm: None,
            })
            .await
            .unwrap()
            .id
    }

    fn create_request(username: &str) -> CreateProfileRequest {
        CreateProfileRequest {
            username: username.to_string(),
            first_name: None,
            last_name: None,
            bio: Some("hello".to_string()),
            email: None,
            follow: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_is_get_or_create() {
        let fx = fixture().await;
        let user_id = register(&fx, "alice@example.com").await;

        let (first, created) = fx.profiles.create_profile(user_id, create_request("alice")).await.unwrap();
        assert!(created);
        assert_eq!(first.email, "alice@example.com");

        let (second, created) = fx.profiles.create_profile(user_id, create_request("other")).await.unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.username, "alice");
    }

    #[tokio::test]
    async fn test_duplicate_username() {
        let fx = fixture().await;
        let a = register(&fx, "a@example.com").await;
        let b = register(&fx, "b@example.com").await;

        fx.profiles.create_profile(a, create_request("taken")).await.unwrap();
        let err = fx.profiles.create_profile(b, create_request("TAKEN")).await.unwrap_err();
        assert!(matches!(err, AppError::Duplicate { ref field, .. } if field == "username"));
    }

    #[tokio::test]
    async fn test_create_with_initial_follows() {
        let fx = fixture().await;
        let a = register(&fx, "a@example.com").await;
        let b = register(&fx, "b@example.com").await;

        let (target, _) = fx.profiles.create_profile(a, create_request("target")).await.unwrap();
        let mut request = create_request("fan");
        request.follow = vec![target.id];
        let (fan, _) = fx.profiles.create_profile(b, request).await.unwrap();

        assert_eq!(fan.following_count, 1);
        assert_eq!(fx.profiles.get_profile(target.id).await.unwrap().followers_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_follow_target_leaves_no_profile() {
        let fx = fixture().await;
        let user_id = register(&fx, "lonely@example.com").await;

        let mut request = create_request("lonely");
        request.follow = vec![9999];
        let err = fx.profiles.create_profile(user_id, request).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidField { ref field, .. } if field == "follow"));
        assert!(fx.profiles.get_by_user(user_id).await.unwrap().is_none());

        // 用户名未被占用，可以重新创建
        let (profile, created) = fx.profiles.create_profile(user_id, create_request("lonely")).await.unwrap();
        assert!(created);
        assert_eq!(profile.following_count, 0);
    }

    #[tokio::test]
    async fn test_search_by_username_and_email() {
        let fx = fixture().await;
        for (email, username) in [
            ("alice@wonder.land", "alice"),
            ("bob@builder.io", "bobby"),
            ("carol@WONDER.land", "carol_w"),
        ] {
            let user_id = register(&fx, email).await;
            fx.profiles.create_profile(user_id, create_request(username)).await.unwrap();
        }

        let all = Pagination::new(None, None, 20);
        let by_email = fx.profiles.list_profiles(Some("wonder"), all).await.unwrap();
        assert_eq!(by_email.total, 2);

        let by_username = fx.profiles.list_profiles(Some("BOB"), all).await.unwrap();
        assert_eq!(by_username.total, 1);
        assert_eq!(by_username.data[0].username, "bobby");

        let everyone = fx.profiles.list_profiles(None, all).await.unwrap();
        assert_eq!(everyone.total, 3);

        let nobody = fx.profiles.list_profiles(Some("%"), all).await.unwrap();
        assert_eq!(nobody.total, 0);
    }

    #[tokio::test]
    async fn test_only_owner_can_update_or_delete() {
        let fx = fixture().await;
        let owner = register(&fx, "owner@example.com").await;
        let stranger = register(&fx, "stranger@example.com").await;
        let (profile, _) = fx.profiles.create_profile(owner, create_request("owner")).await.unwrap();

        let patch = UpdateProfileRequest {
            bio: Some("hacked".to_string()),
            ..Default::default()
        };
        let err = fx.profiles.update_profile(stranger, profile.id, patch).await.unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
        assert!(matches!(
            fx.profiles.delete_profile(stranger, profile.id).await,
            Err(AppError::Authorization(_))
        ));

        let patch = UpdateProfileRequest {
            bio: Some("updated".to_string()),
            ..Default::default()
        };
        let updated = fx.profiles.update_profile(owner, profile.id, patch).await.unwrap();
        assert_eq!(updated.bio, "updated");
        assert_eq!(updated.username, "owner");

        fx.profiles.delete_profile(owner, profile.id).await.unwrap();
        assert!(matches!(fx.profiles.get_profile(profile.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_require_profile() {
        let fx = fixture().await;
        let user_id = register(&fx, "nobody@example.com").await;
        assert!(matches!(
            fx.profiles.require_profile(user_id).await,
            Err(AppError::BadRequest(_))
        ));
    }
}

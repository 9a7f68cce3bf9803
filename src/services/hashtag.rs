use crate::{
    error::{AppError, Result},
    models::hashtag::*,
    services::{
        database::{contains_pattern, PaginatedResult, Pagination},
        Database,
    },
    utils::validation::normalize_hashtag,
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use std::sync::Arc;
use tracing::{debug, info};
use validator::Validate;

const DUPLICATE_NAME: &str = "hashtag with this name already exists.";

#[derive(Clone)]
pub struct HashtagService {
    db: Arc<Database>,
}

impl HashtagService {
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self { db })
    }

    pub async fn create_hashtag(&self, request: HashtagRequest) -> Result<Hashtag> {
        request.validate()?;
        let name = normalize_hashtag(&request.name)?;
        debug!("Creating hashtag: {}", name);

        let hashtag = sqlx::query_as::<_, Hashtag>(
            "INSERT INTO hashtags (name, created_at) VALUES (?, ?) RETURNING id, name, created_at",
        )
        .bind(&name)
        .bind(Utc::now())
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| AppError::from_unique_violation(e, "name", DUPLICATE_NAME))?;

        info!("Hashtag #{} created with id {}", hashtag.name, hashtag.id);
        Ok(hashtag)
    }

    pub async fn get_hashtag(&self, id: i64) -> Result<Hashtag> {
        sqlx::query_as::<_, Hashtag>("SELECT id, name, created_at FROM hashtags WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AppError::not_found("Hashtag"))
    }

    pub async fn list_hashtags(&self, search: Option<&str>, pagination: Pagination) -> Result<PaginatedResult<Hashtag>> {
        let pattern = search
            .filter(|term| !term.trim().is_empty())
            .map(|term| contains_pattern(term.trim_start_matches('#')));

        let total: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM hashtags WHERE (?1 IS NULL OR name LIKE ?1 ESCAPE '\')"#,
        )
        .bind(&pattern)
        .fetch_one(self.db.pool())
        .await?;

        let hashtags = sqlx::query_as::<_, Hashtag>(
            r#"
            SELECT id, name, created_at FROM hashtags
            WHERE (?1 IS NULL OR name LIKE ?1 ESCAPE '\')
            ORDER BY name
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(&pattern)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(self.db.pool())
        .await?;

        Ok(PaginatedResult::new(hashtags, total, pagination))
    }

    pub async fn update_hashtag(&self, id: i64, request: HashtagRequest) -> Result<Hashtag> {
        request.validate()?;
        let name = normalize_hashtag(&request.name)?;

        let hashtag = sqlx::query_as::<_, Hashtag>(
            "UPDATE hashtags SET name = ? WHERE id = ? RETURNING id, name, created_at",
        )
        .bind(&name)
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| AppError::from_unique_violation(e, "name", DUPLICATE_NAME))?
        .ok_or_else(|| AppError::not_found("Hashtag"))?;

        info!("Hashtag {} renamed to #{}", id, hashtag.name);
        Ok(hashtag)
    }

    pub async fn delete_hashtag(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM hashtags WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Hashtag"));
        }

        info!("Hashtag {} deleted", id);
        Ok(())
    }

    /// 确认所有 ID 都存在，否则返回 `hashtags` 字段上的 400
    pub async fn ensure_exist(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut unique = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let mut query = QueryBuilder::<Sqlite>::new("SELECT id FROM hashtags WHERE id IN (");
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
                "hashtags",
                &format!("Invalid pk \"{}\" - object does not exist.", missing),
            ));
        }

        Ok(())
    }

    /// 某个帖子的标签，按名称排序
    pub async fn hashtags_for_post(&self, post_id: i64) -> Result<Vec<Hashtag>> {
        let hashtags = sqlx::query_as::<_, Hashtag>(
            r#"
            SELECT h.id, h.name, h.created_at
            FROM hashtags h
            JOIN post_hashtags ph ON ph.hashtag_id = h.id
            WHERE ph.post_id = ?
            ORDER BY h.name
            "#,
        )
        .bind(post_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(hashtags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn service() -> HashtagService {
        let db = Arc::new(Database::new(&Config::for_tests()).await.unwrap());
        HashtagService::new(db).await.unwrap()
    }

    fn request(name: &str) -> HashtagRequest {
        HashtagRequest {
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_names_are_normalized_and_unique() {
        let hashtags = service().await;
        let created = hashtags.create_hashtag(request("#Rust")).await.unwrap();
        assert_eq!(created.name, "rust");

        let err = hashtags.create_hashtag(request("rust")).await.unwrap_err();
        assert!(matches!(err, AppError::Duplicate { ref field, .. } if field == "name"));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let hashtags = service().await;
        let tag = hashtags.create_hashtag(request("old")).await.unwrap();

        let renamed = hashtags.update_hashtag(tag.id, request("new")).await.unwrap();
        assert_eq!(renamed.name, "new");
        assert!(matches!(
            hashtags.update_hashtag(9999, request("x")).await,
            Err(AppError::NotFound(_))
        ));

        hashtags.delete_hashtag(tag.id).await.unwrap();
        assert!(matches!(hashtags.get_hashtag(tag.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_ensure_exist() {
        let hashtags = service().await;
        let a = hashtags.create_hashtag(request("a")).await.unwrap();
        let b = hashtags.create_hashtag(request("b")).await.unwrap();

        assert!(hashtags.ensure_exist(&[]).await.is_ok());
        assert!(hashtags.ensure_exist(&[a.id, b.id, a.id]).await.is_ok());
        assert!(matches!(
            hashtags.ensure_exist(&[a.id, 9999]).await,
            Err(AppError::InvalidField { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_search() {
        let hashtags = service().await;
        for name in ["rustlang", "rustacean", "golang"] {
            hashtags.create_hashtag(request(name)).await.unwrap();
        }

        let page = hashtags
            .list_hashtags(Some("#rust"), Pagination::new(None, None, 20))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.data[0].name, "rustacean");
    }
}

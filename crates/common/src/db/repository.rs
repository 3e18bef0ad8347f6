//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations
//! with proper error handling.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

/// Fields of a new article; `file` must already reference a stored blob
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub title: String,
    pub summary: String,
    pub content: String,
    pub file: String,
}

/// Partial update of an article; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct ArticlePatch {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub file: Option<String>,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Create a new article
    pub async fn create_article(&self, fields: NewArticle) -> Result<Article> {
        let now = chrono::Utc::now();

        let article = ArticleActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(fields.title),
            summary: Set(fields.summary),
            content: Set(fields.content),
            file: Set(fields.file),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        article.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Find article by ID
    pub async fn find_article(&self, id: Uuid) -> Result<Article> {
        ArticleEntity::find_by_id(id)
            .one(self.read_conn())
            .await?
            .ok_or_else(|| article_not_found(id))
    }

    /// All articles, newest first
    pub async fn list_articles(&self) -> Result<Vec<Article>> {
        ArticleEntity::find()
            .order_by_desc(ArticleColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Apply a partial update; `updated_at` is refreshed on every call
    pub async fn update_article(&self, id: Uuid, patch: ArticlePatch) -> Result<Article> {
        let existing = ArticleEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| article_not_found(id))?;

        let mut article = existing.into_active_model();
        if let Some(title) = patch.title {
            article.title = Set(title);
        }
        if let Some(summary) = patch.summary {
            article.summary = Set(summary);
        }
        if let Some(content) = patch.content {
            article.content = Set(content);
        }
        if let Some(file) = patch.file {
            article.file = Set(file);
        }
        article.updated_at = Set(chrono::Utc::now().into());

        match article.update(self.write_conn()).await {
            Ok(updated) => Ok(updated),
            // Deleted between the read and the write
            Err(DbErr::RecordNotUpdated) => Err(article_not_found(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete article by ID, returning the removed row
    pub async fn delete_article(&self, id: Uuid) -> Result<Article> {
        let existing = ArticleEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| article_not_found(id))?;

        let result = ArticleEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Err(article_not_found(id));
        }

        Ok(existing)
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    /// Find user by username
    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        UserEntity::find()
            .filter(UserColumn::Username.eq(username))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Create a user from an already-hashed password
    pub async fn create_user(&self, username: &str, password_hash: String) -> Result<User> {
        let user = UserActiveModel {
            id: Set(Uuid::new_v4()),
            username: Set(username.to_string()),
            password_hash: Set(password_hash),
            created_at: Set(chrono::Utc::now().into()),
        };

        user.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// All users, oldest first
    pub async fn list_users(&self) -> Result<Vec<User>> {
        UserEntity::find()
            .order_by_asc(UserColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}

fn article_not_found(id: Uuid) -> AppError {
    AppError::ArticleNotFound { id: id.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use std::time::Duration;

    async fn repo() -> Repository {
        let pool = DbPool::new(&DatabaseConfig::in_memory()).await.unwrap();
        pool.ensure_schema().await.unwrap();
        Repository::new(pool)
    }

    fn new_article(title: &str) -> NewArticle {
        NewArticle {
            title: title.to_string(),
            summary: format!("{} summary", title),
            content: format!("{} content", title),
            file: format!("uploads/{}.jpg", title),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = repo().await;
        let created = repo.create_article(new_article("first")).await.unwrap();

        let found = repo.find_article(created.id).await.unwrap();
        assert_eq!(found, created);
        assert_eq!(found.file, "uploads/first.jpg");
        assert_eq!(found.created_at, found.updated_at);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let repo = repo().await;
        let a = repo.create_article(new_article("a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = repo.create_article(new_article("b")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let c = repo.create_article(new_article("c")).await.unwrap();

        let ids: Vec<Uuid> = repo.list_articles().await.unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
    }

    #[tokio::test]
    async fn test_update_merges_and_refreshes_updated_at() {
        let repo = repo().await;
        let created = repo.create_article(new_article("orig")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let updated = repo
            .update_article(created.id, ArticlePatch {
                title: Some("renamed".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.summary, created.summary);
        assert_eq!(updated.file, created.file);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at > created.updated_at);
    }

    #[tokio::test]
    async fn test_missing_ids_are_not_found() {
        let repo = repo().await;
        let id = Uuid::new_v4();

        assert!(matches!(repo.find_article(id).await, Err(AppError::ArticleNotFound { .. })));
        assert!(matches!(
            repo.update_article(id, ArticlePatch::default()).await,
            Err(AppError::ArticleNotFound { .. })
        ));
        assert!(matches!(repo.delete_article(id).await, Err(AppError::ArticleNotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_returns_row() {
        let repo = repo().await;
        let created = repo.create_article(new_article("doomed")).await.unwrap();

        let deleted = repo.delete_article(created.id).await.unwrap();
        assert_eq!(deleted.id, created.id);
        assert!(repo.list_articles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_users_unique_by_name() {
        let repo = repo().await;
        repo.create_user("ines", "$argon2id$stub".to_string()).await.unwrap();

        assert!(repo.create_user("ines", "$argon2id$other".to_string()).await.is_err());
        let user = repo.find_user_by_username("ines").await.unwrap().unwrap();
        assert_eq!(user.username, "ines");
        assert!(repo.find_user_by_username("nobody").await.unwrap().is_none());
        assert_eq!(repo.list_users().await.unwrap().len(), 1);
    }
}
